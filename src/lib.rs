//! Elohim Link - Managed point-to-point byte links
//!
//! Owns a TCP connection on a dedicated worker task and turns everything the
//! socket does into a uniform event stream.
//!
//! ## Architecture
//!
//! ```text
//! host text ──► AddressResolver ──► LinkConfiguration ◄──weak── LinkSession
//!                                   (name, addr, port)             │
//!                                                                  ▼
//!                                                             worker task
//!                                                             (TcpStream)
//!                                                                  │
//!                                          LinkEventSink ◄── LinkEvent
//! ```
//!
//! ## Events
//!
//! | Event                | When                                          |
//! |----------------------|-----------------------------------------------|
//! | `Connected`          | handshake completed within the connect bound  |
//! | `BytesReceived`      | one batch per read-readiness notification     |
//! | `CommunicationError` | connect failed, or a socket error occurred    |
//! | `Disconnected`       | socket released; always the last event        |
//!
//! The link carries raw bytes only. Whatever protocol runs on top is the
//! caller's business.

pub mod config;
pub mod dump;
pub mod error;
pub mod link;
pub mod resolver;

// Re-exports
pub use config::Config;
pub use error::LinkError;
pub use link::{
    ConnectionState, LinkConfiguration, LinkEvent, LinkEventSink, LinkSession, LinkSettings,
    SessionOptions, SharedLinkConfiguration,
};
pub use resolver::{AddressPolicy, AddressResolver, NameLookup, SystemLookup};
