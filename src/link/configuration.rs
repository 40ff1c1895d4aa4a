//! Link Configuration
//!
//! Single responsibility: The durable parameters of a link (name, address,
//! port) and the hook that lets a settings change restart the live session.
//!
//! # Session binding
//!
//! A configuration knows about at most one session, and only through a weak
//! control handle. It never keeps a session alive. Dropping the session
//! makes [`LinkConfiguration::request_restart`] a no-op even before the
//! binding itself is cleared.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use super::session::{Control, SessionId};
use crate::error::Result;
use crate::resolver::AddressResolver;

/// Port used when none is configured (MQTT broker port).
pub const DEFAULT_LINK_PORT: u16 = 1883;

/// Configuration shared between the owner and its session.
pub type SharedLinkConfiguration = Arc<RwLock<LinkConfiguration>>;

/// Persisted form of a link configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
}

fn default_port() -> u16 {
    DEFAULT_LINK_PORT
}

fn default_host() -> String {
    Ipv4Addr::UNSPECIFIED.to_string()
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

/// Non-owning edge from a configuration to the session using it.
#[derive(Clone)]
pub(crate) struct SessionBinding {
    pub(crate) id: SessionId,
    pub(crate) control: mpsc::WeakUnboundedSender<Control>,
}

/// Where and how to reach the remote end of a link.
pub struct LinkConfiguration {
    name: String,
    /// `0.0.0.0` until a host is configured
    address: IpAddr,
    port: u16,
    binding: Option<SessionBinding>,
}

impl LinkConfiguration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_LINK_PORT,
            binding: None,
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &LinkSettings) -> Self {
        let mut config = Self::new(name);
        config.load_settings(settings);
        config
    }

    /// Wrap for sharing with a session.
    pub fn into_shared(self) -> SharedLinkConfiguration {
        Arc::new(RwLock::new(self))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn set_address(&mut self, address: IpAddr) {
        self.address = address;
    }

    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    /// Resolve `host` and use the result as the address.
    ///
    /// On failure the current address is kept and the error returned.
    pub async fn set_host(&mut self, host: &str, resolver: &AddressResolver) -> Result<IpAddr> {
        match resolver.resolve(host).await {
            Ok(address) => {
                debug!(link = %self.name, host = %host, address = %address, "Host resolved");
                self.address = address;
                Ok(address)
            }
            Err(e) => {
                warn!(link = %self.name, host = %host, "Could not resolve host");
                Err(e)
            }
        }
    }

    /// Take name, address and port from `source`. The session binding is
    /// left as it is.
    pub fn copy_from(&mut self, source: &LinkConfiguration) {
        self.name = source.name.clone();
        self.address = source.address;
        self.port = source.port;
    }

    pub fn save_settings(&self) -> LinkSettings {
        LinkSettings {
            port: self.port,
            host: self.address.to_string(),
        }
    }

    /// Apply persisted settings. An unparsable host keeps the current address.
    pub fn load_settings(&mut self, settings: &LinkSettings) {
        self.port = settings.port;
        match settings.host.trim().parse::<IpAddr>() {
            Ok(address) => self.address = address,
            Err(_) => warn!(
                link = %self.name,
                host = %settings.host,
                "Ignoring stored host, not an address"
            ),
        }
    }

    /// Ask the bound session, if any, to reconnect with the current values.
    ///
    /// Returns immediately. The reconnect itself runs on the session's
    /// lifecycle task. Returns `false` when there is no live session.
    pub fn request_restart(&self) -> bool {
        let Some(binding) = &self.binding else {
            return false;
        };
        let Some(control) = binding.control.upgrade() else {
            debug!(link = %self.name, session = %binding.id, "Restart requested for ended session");
            return false;
        };

        info!(link = %self.name, session = %binding.id, "Restart requested");
        control.send(Control::Restart { done: None }).is_ok()
    }

    pub fn bound_session(&self) -> Option<SessionId> {
        self.binding.as_ref().map(|b| b.id)
    }

    pub(crate) fn bind(&mut self, binding: SessionBinding) {
        if let Some(previous) = &self.binding {
            warn!(
                link = %self.name,
                previous = %previous.id,
                session = %binding.id,
                "Configuration rebound to a new session"
            );
        }
        self.binding = Some(binding);
    }

    /// Clear the binding if it still points at `id`.
    pub(crate) fn unbind(&mut self, id: SessionId) {
        if self.binding.as_ref().is_some_and(|b| b.id == id) {
            self.binding = None;
        }
    }
}

impl Clone for LinkConfiguration {
    /// Copies name, address and port. The clone is unbound.
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            address: self.address,
            port: self.port,
            binding: None,
        }
    }
}

impl fmt::Debug for LinkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkConfiguration")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("bound_session", &self.bound_session())
            .finish()
    }
}
