//! Link events
//!
//! Everything a link has to say to its owner goes through a [`LinkEventSink`].
//! Events are delivered from the worker task, one at a time, in the order
//! they happen.

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, trace};

/// Title used for every communication error raised by a link.
pub const LINK_ERROR_TITLE: &str = "Link Error";

/// Notifications produced by a link session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LinkEvent {
    Connected,
    Disconnected,
    BytesReceived {
        #[serde(serialize_with = "serialize_bytes")]
        data: Bytes,
    },
    CommunicationError {
        title: String,
        detail: String,
    },
}

impl LinkEvent {
    pub(crate) fn error(detail: impl Into<String>) -> Self {
        LinkEvent::CommunicationError {
            title: LINK_ERROR_TITLE.to_string(),
            detail: detail.into(),
        }
    }
}

fn serialize_bytes<S: serde::Serializer>(data: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bytes(data)
}

/// Consumer side of a link.
pub trait LinkEventSink: Send + Sync + 'static {
    fn on_event(&self, event: LinkEvent);
}

impl LinkEventSink for mpsc::UnboundedSender<LinkEvent> {
    fn on_event(&self, event: LinkEvent) {
        // Receiver gone means nobody is listening anymore
        if self.send(event).is_err() {
            trace!("Link event dropped, receiver closed");
        }
    }
}

impl LinkEventSink for broadcast::Sender<LinkEvent> {
    fn on_event(&self, event: LinkEvent) {
        let _ = self.send(event);
    }
}

/// Sink that only logs.
pub struct LoggingEventSink;

impl LinkEventSink for LoggingEventSink {
    fn on_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => debug!("Link connected"),
            LinkEvent::Disconnected => debug!("Link disconnected"),
            LinkEvent::BytesReceived { data } => trace!(bytes = data.len(), "Link bytes received"),
            LinkEvent::CommunicationError { title, detail } => {
                debug!(title = %title, detail = %detail, "Link communication error")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_event_title() {
        let event = LinkEvent::error("Error on link test. Connection failed");
        assert_eq!(
            event,
            LinkEvent::CommunicationError {
                title: "Link Error".into(),
                detail: "Error on link test. Connection failed".into(),
            }
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(LinkEvent::Connected).unwrap();
        assert_eq!(json["type"], "connected");

        let json = serde_json::to_value(LinkEvent::BytesReceived {
            data: Bytes::from_static(b"hi"),
        })
        .unwrap();
        assert_eq!(json["type"], "bytes_received");
        assert_eq!(json["data"], serde_json::json!([104, 105]));
    }

    #[tokio::test]
    async fn test_channel_sink_survives_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.on_event(LinkEvent::Disconnected);
    }
}
