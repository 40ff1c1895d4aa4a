//! Point-to-Point Link Module
//!
//! A managed, reconnectable TCP byte link. The link owns its socket on a
//! dedicated worker task and reports everything that happens to it as
//! [`LinkEvent`]s.
//!
//! # Architecture
//!
//! | Module          | Responsibility                                      |
//! |-----------------|-----------------------------------------------------|
//! | `configuration` | Name, address, port; restart hook for the session  |
//! | `session`       | State machine, lifecycle of the worker task         |
//! | `worker`        | Socket ownership: connect, read, write, close       |
//! | `events`        | Event type and the sink contract                    |
//! | `rate`          | Lock-free throughput accounting                     |
//!
//! # Key Design Principles
//!
//! ## 1. One Owner Per Socket
//!
//! - Only the worker task touches the `TcpStream`
//! - The owner talks to it through one ordered request queue
//! - Rates are atomics: read anywhere, written by the worker only
//!
//! ## 2. Strict Worker Lifecycle
//!
//! - At most one worker per session
//! - A new worker starts only after the previous one has been joined
//! - `disconnect()` returns after the socket is released
//!
//! ## 3. One Error Per Failed Connect
//!
//! - A connect attempt is bounded (1s by default)
//! - A refused connection and a silent timeout each produce exactly one
//!   `CommunicationError`
//!
//! # Usage
//!
//! ```ignore
//! use elohim_link::link::{LinkConfiguration, LinkEvent, LinkSession};
//! use elohim_link::AddressResolver;
//!
//! let mut config = LinkConfiguration::new("broker");
//! config.set_host("localhost", &AddressResolver::default()).await?;
//! config.set_port(1883);
//! let config = config.into_shared();
//!
//! let (tx, mut events) = tokio::sync::mpsc::unbounded_channel();
//! let session = LinkSession::new(config.clone(), tx).await;
//! session.connect().await;
//!
//! while let Some(event) = events.recv().await {
//!     if let LinkEvent::BytesReceived { data } = event {
//!         session.write(data);
//!     }
//! }
//! ```

mod worker;

pub mod configuration;
pub mod events;
pub mod rate;
pub mod session;

pub use configuration::{LinkConfiguration, LinkSettings, SharedLinkConfiguration, DEFAULT_LINK_PORT};
pub use events::{LinkEvent, LinkEventSink, LoggingEventSink, LINK_ERROR_TITLE};
pub use rate::RateAccumulator;
pub use worker::MAX_READ_BATCH;
pub use session::{
    ConnectionState, LinkSession, SessionId, SessionOptions, DEFAULT_CONNECT_TIMEOUT,
    TCP_LINK_SPEED_BPS,
};
