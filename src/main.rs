//! Elohim Link client
//!
//! Opens a managed link to a remote TCP endpoint and bridges it to the
//! terminal: stdin goes out over the link, received bytes go to stdout.
//!
//! ## Usage
//!
//! ```bash
//! # Connect with defaults (127.0.0.1:1883)
//! elohim-link
//!
//! # Connect to a named host
//! elohim-link --host broker.local --port 1883
//!
//! # Use a config file; SIGHUP re-reads it and restarts the link
//! elohim-link --config /path/to/config.toml
//!
//! # Emit events as JSON lines instead of raw bytes
//! elohim-link --json
//! ```
//!
//! The client exits on Ctrl+C, on stdin EOF, or when the link goes idle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use elohim_link::config::default_config_path;
use elohim_link::{
    AddressResolver, Config, ConnectionState, LinkConfiguration, LinkEvent, LinkSession,
    SharedLinkConfiguration,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "elohim-link")]
#[command(about = "Managed point-to-point byte link")]
struct Args {
    /// Path to config file (defaults to the user config dir, if present)
    #[arg(short, long, env = "ELOHIM_LINK_CONFIG")]
    config: Option<PathBuf>,

    /// Remote host (address or name)
    #[arg(long, env = "ELOHIM_LINK_HOST")]
    host: Option<String>,

    /// Remote port
    #[arg(long, env = "ELOHIM_LINK_PORT")]
    port: Option<u16>,

    /// Link name used in logs and errors
    #[arg(long)]
    name: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Log a hex/ascii dump of every write
    #[arg(long)]
    dump_writes: bool,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

impl Args {
    /// Explicit `--config`, else the default location when a file exists there.
    fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let path = default_config_path();
            path.is_file().then_some(path)
        })
    }

    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config_path() {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout_ms = ms;
        }
        if self.dump_writes {
            config.dump_writes = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("elohim_link=info".parse()?))
        .init();

    let args = Args::parse();
    let config_path = args.config_path();
    let config = args.load_config()?;
    let resolver = AddressResolver::default();

    let mut link_config = LinkConfiguration::new(config.name.clone());
    link_config.set_port(config.port);
    link_config
        .set_host(&config.host, &resolver)
        .await
        .with_context(|| format!("resolving {}", config.host))?;
    let link_config = link_config.into_shared();

    info!(
        link = %config.name,
        host = %config.host,
        port = config.port,
        "Starting elohim-link"
    );

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let session = LinkSession::with_options(
        Arc::clone(&link_config),
        event_tx,
        config.session_options(),
    )
    .await;

    if !session.connect().await {
        bail!("link {} did not start connecting", config.name);
    }

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut input = vec![0u8; 4096];

    let rate_every = Duration::from_secs(config.rate_log_interval_secs.max(1));
    let mut rate_tick = tokio::time::interval(rate_every);
    rate_tick.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    #[cfg(unix)]
    let mut hangup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;

    let mut restart_pending = false;

    loop {
        #[cfg(unix)]
        let reload = hangup.recv();
        #[cfg(not(unix))]
        let reload = std::future::pending::<Option<()>>();

        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down...");
                break;
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                let settled = matches!(event, LinkEvent::CommunicationError { .. } | LinkEvent::Disconnected);
                if matches!(event, LinkEvent::Disconnected) && restart_pending {
                    restart_pending = false;
                    print_event(&event, args.json, &mut stdout).await?;
                    continue;
                }
                print_event(&event, args.json, &mut stdout).await?;
                if settled && session.state() == ConnectionState::Idle {
                    info!("Link idle, exiting");
                    break;
                }
            }

            read = stdin.read(&mut input) => match read {
                Ok(0) => {
                    info!("stdin closed");
                    break;
                }
                Ok(n) => session.write(Bytes::copy_from_slice(&input[..n])),
                Err(e) => {
                    error!(error = %e, "stdin read failed");
                    break;
                }
            },

            _ = rate_tick.tick(), if config.rate_log_interval_secs > 0 => {
                info!(
                    in_rate = session.current_in_rate(),
                    out_rate = session.current_out_rate(),
                    in_total = session.in_bytes_total(),
                    out_total = session.out_bytes_total(),
                    "Link throughput (bytes/sec)"
                );
            }

            Some(_) = reload => {
                if let Some(path) = &config_path {
                    restart_pending = reload_config(path, &link_config, &resolver).await;
                } else {
                    warn!("SIGHUP ignored, no config file");
                }
            }
        }
    }

    if let Err(e) = session.flush().await {
        warn!(error = %e, "Flush before exit failed");
    }
    session.disconnect().await;
    session.close().await;

    // Drain what the worker emitted while closing
    while let Ok(event) = events.try_recv() {
        print_event(&event, args.json, &mut stdout).await?;
    }
    stdout.flush().await?;

    Ok(())
}

/// Re-read the config file into the shared link configuration and ask the
/// session to reconnect. Returns whether a restart was requested.
async fn reload_config(
    path: &Path,
    link_config: &SharedLinkConfiguration,
    resolver: &AddressResolver,
) -> bool {
    let fresh = match Config::load(path) {
        Ok(c) => c,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Config reload failed, keeping current link");
            return false;
        }
    };

    let mut link = link_config.write().await;
    if link.set_host(&fresh.host, resolver).await.is_err() {
        return false;
    }
    link.set_port(fresh.port);
    info!(address = %link.socket_addr(), "Config reloaded");
    link.request_restart()
}

async fn print_event(
    event: &LinkEvent,
    json: bool,
    stdout: &mut tokio::io::Stdout,
) -> anyhow::Result<()> {
    if json {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        return Ok(());
    }

    match event {
        LinkEvent::BytesReceived { data } => stdout.write_all(data).await?,
        LinkEvent::Connected => info!("Connected"),
        LinkEvent::Disconnected => info!("Disconnected"),
        LinkEvent::CommunicationError { title, detail } => {
            error!(title = %title, "{}", detail)
        }
    }
    Ok(())
}
