//! Host resolution seams.
//!
//! [`HostResolver`] is what the validator uses to see where a name points.
//! [`GuardedDnsResolver`] plugs the same address policy into `reqwest`, so the
//! address actually connected to is checked too (closes the DNS-rebinding gap
//! between validation and connect).

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tokio::sync::Semaphore;

use super::destination::blocked_range;

/// Caps concurrent lookups issued by the guarded resolver.
static DNS_PERMITS: Lazy<Arc<Semaphore>> = Lazy::new(|| Arc::new(Semaphore::new(64)));

/// Resolves a host name to its addresses.
#[async_trait]
pub trait HostResolver: Send + Sync + fmt::Debug {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>>;
}

/// The operating system resolver via `tokio::net::lookup_host`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, port)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// Fixed host table; unknown names fail with `NotFound`.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Adds an entry. Addresses that do not parse are skipped.
    pub fn with_host<I, S>(mut self, host: &str, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = addrs
            .into_iter()
            .filter_map(|addr| addr.as_ref().parse::<IpAddr>().ok())
            .collect();
        self.hosts.insert(host.to_ascii_lowercase(), parsed);
        self
    }
}

#[async_trait]
impl HostResolver for StaticResolver {
    async fn resolve(&self, host: &str, _port: u16) -> io::Result<Vec<IpAddr>> {
        self.hosts
            .get(&host.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown host {host}")))
    }
}

/// `reqwest` DNS hook that refuses names resolving to any blocked address.
#[derive(Debug, Clone)]
pub struct GuardedDnsResolver {
    inner: Arc<dyn HostResolver>,
}

impl GuardedDnsResolver {
    pub fn new(inner: Arc<dyn HostResolver>) -> Self {
        Self { inner }
    }
}

impl Default for GuardedDnsResolver {
    fn default() -> Self {
        Self::new(Arc::new(SystemResolver))
    }
}

impl Resolve for GuardedDnsResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let inner = self.inner.clone();
        Box::pin(async move {
            let _permit = DNS_PERMITS
                .acquire()
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;

            let host = name.as_str().to_string();
            let addrs = inner
                .resolve(&host, 0)
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;

            if let Some((addr, range)) = addrs
                .iter()
                .find_map(|addr| blocked_range(*addr).map(|range| (*addr, range)))
            {
                return Err(Box::new(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    format!("destination blocked: '{host}' resolves to {range} address {addr}"),
                )) as Box<dyn std::error::Error + Send + Sync>);
            }

            let addrs: Addrs = Box::new(
                addrs
                    .into_iter()
                    .map(|ip| SocketAddr::new(ip, 0))
                    .collect::<Vec<_>>()
                    .into_iter(),
            );
            Ok(addrs)
        })
    }
}
