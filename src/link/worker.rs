//! TCP Worker
//!
//! Single responsibility: Own the socket of one connection attempt. Connect,
//! move bytes both ways, report what happens, close.
//!
//! A worker lives for exactly one connection. It owns the `TcpStream`; no
//! other task ever sees it.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use super::events::LinkEvent;
use super::session::{ConnectionState, LinkShared};
use crate::dump;
use crate::error::LinkError;

/// Read reservation per `try_read` call.
const READ_CHUNK: usize = 16 * 1024;

/// Most bytes delivered as one `BytesReceived` batch. A peer that keeps
/// sending gets split into batches of at most this size, with queued
/// commands served in between.
pub const MAX_READ_BATCH: usize = 64 * 1024;

/// Where one worker connects to, captured when the attempt starts.
#[derive(Debug, Clone)]
pub(crate) struct ConnectTarget {
    pub(crate) name: String,
    pub(crate) addr: SocketAddr,
}

pub(crate) enum WorkerCommand {
    Write(Bytes),
    Flush(oneshot::Sender<()>),
    Stop,
}

/// Lifecycle side of a running worker.
pub(crate) struct WorkerHandle {
    commands: mpsc::UnboundedSender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn spawn(shared: Arc<LinkShared>, target: ConnectTarget) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            shared,
            target,
            commands: rx,
        };
        Self {
            commands,
            task: tokio::spawn(worker.run()),
        }
    }

    /// Queue a command. Commands sent to a finished worker are dropped.
    pub(crate) fn request(&self, command: WorkerCommand) {
        let _ = self.commands.send(command);
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker task to end.
    pub(crate) async fn join(self) -> Result<(), JoinError> {
        drop(self.commands);
        self.task.await
    }
}

/// Why the connected loop ended.
enum Exit {
    Requested,
    Lost,
}

enum ReadOutcome {
    /// Socket drained, or the batch is full
    Batch,
    /// Peer closed its side
    Closed,
    Failed(io::Error),
}

struct Worker {
    shared: Arc<LinkShared>,
    target: ConnectTarget,
    commands: mpsc::UnboundedReceiver<WorkerCommand>,
}

impl Worker {
    async fn run(mut self) {
        let stream = match self.connect().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(link = %self.target.name, addr = %self.target.addr, error = %e, "Link connect failed");
                self.shared.set_state(ConnectionState::Idle);
                self.shared.emit(LinkEvent::error(self.connect_failure_detail(&e)));
                return;
            }
        };

        info!(link = %self.target.name, addr = %self.target.addr, "Link connected");
        self.shared.set_state(ConnectionState::Connected);
        self.shared.emit(LinkEvent::Connected);

        let exit = self.serve(&stream).await;
        if let Exit::Lost = exit {
            info!(link = %self.target.name, "Link lost");
        }
        self.close(stream).await;
    }

    /// One bounded connect attempt.
    ///
    /// Whether the OS reports a failed handshake or just lets it hang is
    /// platform specific. Both end up as exactly one error here.
    async fn connect(&self) -> Result<TcpStream, LinkError> {
        let bound = self.shared.options.connect_timeout;
        match timeout(bound, TcpStream::connect(self.target.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(LinkError::Connect(e.to_string())),
            Err(_) => Err(LinkError::Timeout(format!(
                "{} not reached within {:?}",
                self.target.addr, bound
            ))),
        }
    }

    fn connect_failure_detail(&self, error: &LinkError) -> String {
        match error {
            LinkError::Connect(reason) => self.socket_error_detail(reason),
            _ => format!("Error on link {}. Connection failed", self.target.name),
        }
    }

    fn socket_error_detail(&self, reason: &str) -> String {
        format!("Error on link {}. Error on socket: {}.", self.target.name, reason)
    }

    async fn serve(&mut self, stream: &TcpStream) -> Exit {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Write(data)) => {
                        if let Err(e) = self.write(stream, &data).await {
                            if self.report(e) {
                                return Exit::Lost;
                            }
                        }
                    }
                    Some(WorkerCommand::Flush(done)) => {
                        let _ = done.send(());
                    }
                    Some(WorkerCommand::Stop) | None => return Exit::Requested,
                },

                ready = stream.readable() => {
                    if let Err(e) = ready {
                        if self.report(e) {
                            return Exit::Lost;
                        }
                        continue;
                    }

                    let outcome = read_available(stream, &mut buf);
                    self.deliver(&mut buf);
                    match outcome {
                        ReadOutcome::Batch => {}
                        ReadOutcome::Closed => {
                            self.shared.emit(LinkEvent::error(
                                self.socket_error_detail("The remote host closed the connection"),
                            ));
                            return Exit::Lost;
                        }
                        ReadOutcome::Failed(e) => {
                            if self.report(e) {
                                return Exit::Lost;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Hand all of `data` to the socket.
    async fn write(&self, stream: &TcpStream, data: &Bytes) -> io::Result<()> {
        if self.shared.options.dump_writes {
            dump::log_write(&self.target.name, self.target.addr, data);
        }

        let mut written = 0;
        while written < data.len() {
            stream.writable().await?;
            match stream.try_write(&data[written..]) {
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e),
            }
        }

        self.shared.out_rate.record(data.len());
        trace!(link = %self.target.name, bytes = data.len(), "Bytes written");
        Ok(())
    }

    /// Emit whatever the last read collected as one batch.
    fn deliver(&self, buf: &mut BytesMut) {
        if buf.is_empty() {
            return;
        }
        let data = buf.split().freeze();
        self.shared.in_rate.record(data.len());
        trace!(link = %self.target.name, bytes = data.len(), "Bytes received");
        self.shared.emit(LinkEvent::BytesReceived { data });
    }

    /// Report a socket error. Returns `true` if the connection is gone.
    fn report(&self, error: io::Error) -> bool {
        let fatal = is_fatal(&error);
        warn!(link = %self.target.name, error = %error, fatal, "Link socket error");
        self.shared
            .emit(LinkEvent::error(self.socket_error_detail(&error.to_string())));
        fatal
    }

    async fn close(mut self, mut stream: TcpStream) {
        self.shared.set_state(ConnectionState::Disconnecting);

        // Answer flushes queued behind the stop request
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let WorkerCommand::Flush(done) = command {
                let _ = done.send(());
            }
        }

        if let Err(e) = stream.shutdown().await {
            debug!(link = %self.target.name, error = %e, "Socket shutdown failed");
        }
        drop(stream);

        info!(link = %self.target.name, "Link disconnected");
        self.shared.set_state(ConnectionState::Idle);
        self.shared.emit(LinkEvent::Disconnected);
    }
}

/// Read what the socket has right now into `buf`, up to [`MAX_READ_BATCH`].
///
/// Stopping at the cap leaves the socket readable, so the next `readable()`
/// resolves at once and the rest arrives as a further batch.
fn read_available(stream: &TcpStream, buf: &mut BytesMut) -> ReadOutcome {
    while buf.len() < MAX_READ_BATCH {
        let room = (MAX_READ_BATCH - buf.len()).min(READ_CHUNK);
        buf.reserve(room);
        let mut window = (&mut *buf).limit(room);
        match stream.try_read_buf(&mut window) {
            Ok(0) => return ReadOutcome::Closed,
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return ReadOutcome::Batch,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return ReadOutcome::Failed(e),
        }
    }
    ReadOutcome::Batch
}

fn is_fatal(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_fatal_error_kinds() {
        assert!(is_fatal(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(is_fatal(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(!is_fatal(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(!is_fatal(&io::Error::from(io::ErrorKind::Other)));
    }

    #[tokio::test]
    async fn test_read_batches_are_capped() {
        const SENT: usize = 4 * MAX_READ_BATCH;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(&vec![7u8; SENT]).await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = BytesMut::new();
        let mut total = 0;
        while total < SENT {
            stream.readable().await.unwrap();
            let outcome = read_available(&stream, &mut buf);
            assert!(buf.len() <= MAX_READ_BATCH, "batch of {} bytes", buf.len());
            total += buf.split().len();
            match outcome {
                ReadOutcome::Batch => {}
                ReadOutcome::Closed => break,
                ReadOutcome::Failed(e) => panic!("read failed: {}", e),
            }
        }

        assert_eq!(total, SENT);
        writer.await.unwrap();
    }
}
