//! Host name resolution for link configuration
//!
//! Turns the host text a user typed into a connectable address. Literal
//! addresses are returned as-is without touching the network. Anything else
//! goes through a [`NameLookup`], and the first candidate allowed by the
//! [`AddressPolicy`] wins.
//!
//! The default policy skips IPv6 candidates entirely, so a host that only
//! publishes AAAA records resolves to nothing. That is long-standing,
//! observable behaviour; use [`AddressPolicy::PreferIpv4`] to fall back to
//! IPv6 instead.

use std::io;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};

/// Which lookup candidates are acceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressPolicy {
    /// First non-IPv6 candidate, or nothing.
    #[default]
    Ipv4Only,
    /// First non-IPv6 candidate, else the first IPv6 one.
    PreferIpv4,
}

impl AddressPolicy {
    fn select(self, candidates: &[IpAddr]) -> Option<IpAddr> {
        let v4 = candidates.iter().copied().find(|addr| !addr.is_ipv6());
        match self {
            AddressPolicy::Ipv4Only => v4,
            AddressPolicy::PreferIpv4 => v4.or_else(|| candidates.first().copied()),
        }
    }
}

/// Name lookup backend.
#[async_trait]
pub trait NameLookup: Send + Sync {
    /// Return every address the name maps to, in resolver order.
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Lookup through the operating system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLookup;

#[async_trait]
impl NameLookup for SystemLookup {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|sa| sa.ip()).collect())
    }
}

/// Resolves host text to an address.
#[derive(Clone)]
pub struct AddressResolver {
    lookup: Arc<dyn NameLookup>,
    policy: AddressPolicy,
}

impl Default for AddressResolver {
    fn default() -> Self {
        Self::new(SystemLookup)
    }
}

impl AddressResolver {
    pub fn new(lookup: impl NameLookup + 'static) -> Self {
        Self {
            lookup: Arc::new(lookup),
            policy: AddressPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: AddressPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> AddressPolicy {
        self.policy
    }

    /// Resolve `host` to a single address.
    ///
    /// Returns [`LinkError::Resolve`] when the lookup fails or yields no
    /// candidate the policy accepts.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr> {
        let host = host.trim();
        if let Some(addr) = parse_literal(host) {
            return Ok(addr);
        }

        let candidates = match self.lookup.lookup(host).await {
            Ok(c) => c,
            Err(e) => {
                warn!(host = %host, error = %e, "Name lookup failed");
                return Err(LinkError::Resolve(host.to_string()));
            }
        };
        debug!(host = %host, candidates = ?candidates, "Name lookup complete");

        self.policy
            .select(&candidates)
            .ok_or_else(|| LinkError::Resolve(host.to_string()))
    }
}

/// Dotted-quad IPv4 or the IPv6 loopback.
fn parse_literal(host: &str) -> Option<IpAddr> {
    match host.parse::<IpAddr>().ok()? {
        addr @ IpAddr::V4(_) => Some(addr),
        IpAddr::V6(v6) if v6 == Ipv6Addr::LOCALHOST => Some(IpAddr::V6(v6)),
        IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Lookup that returns a fixed answer and counts calls.
    struct FixedLookup {
        answer: Option<Vec<IpAddr>>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedLookup {
        fn new(answer: Option<Vec<IpAddr>>) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    answer,
                    calls: Arc::clone(&calls),
                },
                calls,
            )
        }
    }

    #[async_trait]
    impl NameLookup for FixedLookup {
        async fn lookup(&self, _host: &str) -> io::Result<Vec<IpAddr>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.answer
                .clone()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such host"))
        }
    }

    fn v6(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_ipv4_literal_skips_lookup() {
        let (lookup, calls) = FixedLookup::new(None);
        let resolver = AddressResolver::new(lookup);

        let addr = resolver.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ipv6_loopback_literal_skips_lookup() {
        let (lookup, calls) = FixedLookup::new(None);
        let resolver = AddressResolver::new(lookup);

        let addr = resolver.resolve("::1").await.unwrap();
        assert_eq!(addr, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prefers_ipv4_candidate() {
        let (lookup, _) = FixedLookup::new(Some(vec![
            v6("2001:db8::10"),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        ]));
        let resolver = AddressResolver::new(lookup);

        let addr = resolver.resolve("broker.example").await.unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)));
    }

    #[tokio::test]
    async fn test_first_ipv4_wins() {
        let (lookup, _) = FixedLookup::new(Some(vec![
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)),
        ]));
        let resolver = AddressResolver::new(lookup);

        let addr = resolver.resolve("broker.example").await.unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
    }

    #[tokio::test]
    async fn test_ipv6_only_host_not_found_by_default() {
        let (lookup, _) = FixedLookup::new(Some(vec![v6("2001:db8::10")]));
        let resolver = AddressResolver::new(lookup);

        let err = resolver.resolve("v6only.example").await.unwrap_err();
        assert!(matches!(err, LinkError::Resolve(ref h) if h == "v6only.example"));
    }

    #[tokio::test]
    async fn test_prefer_ipv4_policy_falls_back_to_ipv6() {
        let (lookup, _) = FixedLookup::new(Some(vec![v6("2001:db8::10")]));
        let resolver = AddressResolver::new(lookup).with_policy(AddressPolicy::PreferIpv4);

        let addr = resolver.resolve("v6only.example").await.unwrap();
        assert_eq!(addr, v6("2001:db8::10"));
    }

    #[tokio::test]
    async fn test_lookup_failure_is_resolve_error() {
        let (lookup, calls) = FixedLookup::new(None);
        let resolver = AddressResolver::new(lookup);

        assert!(resolver.resolve("nowhere.invalid").await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_parse_literal() {
        assert!(parse_literal("10.0.0.1").is_some());
        assert!(parse_literal("::1").is_some());
        assert!(parse_literal("fe80::1").is_none());
        assert!(parse_literal("localhost").is_none());
    }
}
