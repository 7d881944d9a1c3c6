//! Destination validation (SSRF guard).
//!
//! Every URL the orchestrator contacts, including the final URL after
//! redirects, passes through [`DestinationValidator`]. A destination is
//! refused when it uses a non-HTTP scheme, names a loopback/internal host, or
//! is (or resolves to) an address outside the public unicast space.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use thiserror::Error;
use url::{Host, Url};

use super::resolver::{HostResolver, SystemResolver};

/// Hostname suffixes treated as internal unless configured otherwise.
pub const DEFAULT_INTERNAL_SUFFIXES: &[&str] = &[".local", ".internal", ".corp", ".lan"];

/// Why a destination was refused.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DestinationRejection {
    #[error("URL is empty")]
    Empty,
    #[error("URL could not be parsed: {0}")]
    Malformed(String),
    #[error("scheme '{0}' is not allowed (only http and https)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    #[error("host '{host}' is a {range} address ({addr})")]
    BlockedAddress {
        host: String,
        addr: IpAddr,
        range: BlockedRange,
    },
    #[error("host '{0}' refers to the local machine")]
    Localhost(String),
    #[error("host '{host}' is internal (matches '{suffix}')")]
    InternalHostname { host: String, suffix: String },
}

impl DestinationRejection {
    /// Stable machine-readable reason.
    pub fn code(&self) -> &'static str {
        match self {
            DestinationRejection::Empty => "empty_url",
            DestinationRejection::Malformed(_) => "malformed_url",
            DestinationRejection::UnsupportedScheme(_) => "unsupported_scheme",
            DestinationRejection::MissingHost => "missing_host",
            DestinationRejection::BlockedAddress { .. } => "blocked_address",
            DestinationRejection::Localhost(_) => "localhost",
            DestinationRejection::InternalHostname { .. } => "internal_hostname",
        }
    }
}

/// Non-public address ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockedRange {
    Loopback,
    Private,
    LinkLocal,
    Unspecified,
    SharedAddressSpace,
    Multicast,
    Reserved,
    UniqueLocal,
}

impl fmt::Display for BlockedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BlockedRange::Loopback => "loopback",
            BlockedRange::Private => "private",
            BlockedRange::LinkLocal => "link-local",
            BlockedRange::Unspecified => "unspecified",
            BlockedRange::SharedAddressSpace => "carrier-grade NAT",
            BlockedRange::Multicast => "multicast",
            BlockedRange::Reserved => "reserved",
            BlockedRange::UniqueLocal => "unique-local",
        };
        f.write_str(label)
    }
}

/// Classifies `ip`, returning the blocked range it falls in.
pub fn blocked_range(ip: IpAddr) -> Option<BlockedRange> {
    match ip {
        IpAddr::V4(v4) => blocked_ipv4(v4),
        IpAddr::V6(v6) => blocked_ipv6(v6),
    }
}

fn blocked_ipv4(ip: Ipv4Addr) -> Option<BlockedRange> {
    let o = ip.octets();
    if o[0] == 0 {
        return Some(BlockedRange::Unspecified);
    }
    if o[0] == 127 {
        return Some(BlockedRange::Loopback);
    }
    if o[0] == 10 || (o[0] == 172 && (16..=31).contains(&o[1])) || (o[0] == 192 && o[1] == 168) {
        return Some(BlockedRange::Private);
    }
    if o[0] == 169 && o[1] == 254 {
        return Some(BlockedRange::LinkLocal);
    }
    // 100.64.0.0/10
    if o[0] == 100 && (o[1] & 0xc0) == 64 {
        return Some(BlockedRange::SharedAddressSpace);
    }
    if (224..=239).contains(&o[0]) {
        return Some(BlockedRange::Multicast);
    }
    // 240.0.0.0/4, broadcast included
    if o[0] >= 240 {
        return Some(BlockedRange::Reserved);
    }
    None
}

fn blocked_ipv6(ip: Ipv6Addr) -> Option<BlockedRange> {
    if ip.is_unspecified() {
        return Some(BlockedRange::Unspecified);
    }
    if ip.is_loopback() {
        return Some(BlockedRange::Loopback);
    }
    let s = ip.segments();
    // ::ffff:a.b.c.d
    if let Some(v4) = ip.to_ipv4_mapped() {
        return blocked_ipv4(v4);
    }
    // ::a.b.c.d (deprecated compatible form)
    if s[..6] == [0; 6] {
        return blocked_ipv4(Ipv4Addr::new(
            (s[6] >> 8) as u8,
            s[6] as u8,
            (s[7] >> 8) as u8,
            s[7] as u8,
        ));
    }
    if (s[0] & 0xfe00) == 0xfc00 {
        return Some(BlockedRange::UniqueLocal);
    }
    if (s[0] & 0xffc0) == 0xfe80 {
        return Some(BlockedRange::LinkLocal);
    }
    if (s[0] & 0xff00) == 0xff00 {
        return Some(BlockedRange::Multicast);
    }
    None
}

/// Allow/deny decisions for outbound destinations.
#[derive(Debug, Clone)]
pub struct DestinationValidator {
    internal_suffixes: Vec<String>,
    resolver: Arc<dyn HostResolver>,
}

impl DestinationValidator {
    pub fn new() -> Self {
        Self {
            internal_suffixes: normalise_suffixes(DEFAULT_INTERNAL_SUFFIXES.iter().copied()),
            resolver: Arc::new(SystemResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Replace the internal hostname suffixes. A leading dot is implied.
    pub fn with_internal_suffixes<I, S>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.internal_suffixes = normalise_suffixes(suffixes);
        self
    }

    pub fn resolver(&self) -> &Arc<dyn HostResolver> {
        &self.resolver
    }

    pub fn internal_suffixes(&self) -> &[String] {
        &self.internal_suffixes
    }

    /// Full check, resolving domain names through the configured resolver.
    ///
    /// The destination is refused if any resolved address is blocked. A failed
    /// lookup is not a refusal; the fetch itself reports it.
    pub async fn validate(&self, raw: &str) -> Result<Url, DestinationRejection> {
        let url = self.validate_static(raw)?;
        self.check_resolved(&url).await?;
        Ok(url)
    }

    /// Full check of an already parsed URL (used after redirects).
    pub async fn validate_url(&self, url: &Url) -> Result<(), DestinationRejection> {
        self.check_url_static(url)?;
        self.check_resolved(url).await
    }

    /// Syntactic checks only, no DNS.
    pub fn validate_static(&self, raw: &str) -> Result<Url, DestinationRejection> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DestinationRejection::Empty);
        }
        let url =
            Url::parse(trimmed).map_err(|err| DestinationRejection::Malformed(err.to_string()))?;
        self.check_url_static(&url)?;
        Ok(url)
    }

    pub fn check_url_static(&self, url: &Url) -> Result<(), DestinationRejection> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(DestinationRejection::UnsupportedScheme(other.to_string())),
        }

        match url.host() {
            None => Err(DestinationRejection::MissingHost),
            Some(Host::Ipv4(ip)) => check_ip(&ip.to_string(), IpAddr::V4(ip)),
            Some(Host::Ipv6(ip)) => check_ip(&ip.to_string(), IpAddr::V6(ip)),
            Some(Host::Domain(domain)) => self.check_domain(domain),
        }
    }

    fn check_domain(&self, domain: &str) -> Result<(), DestinationRejection> {
        let host = normalise_host(domain);
        if host.is_empty() {
            return Err(DestinationRejection::MissingHost);
        }
        if is_localhost_domain(&host) {
            return Err(DestinationRejection::Localhost(host));
        }
        if let Some(suffix) = self
            .internal_suffixes
            .iter()
            .find(|suffix| host.ends_with(suffix.as_str()) || host == suffix[1..])
        {
            return Err(DestinationRejection::InternalHostname {
                host,
                suffix: suffix.clone(),
            });
        }
        Ok(())
    }

    async fn check_resolved(&self, url: &Url) -> Result<(), DestinationRejection> {
        let Some(Host::Domain(domain)) = url.host() else {
            return Ok(());
        };
        let host = normalise_host(domain);
        let port = url.port_or_known_default().unwrap_or(80);
        match self.resolver.resolve(&host, port).await {
            Ok(addrs) => {
                for addr in addrs {
                    check_ip(&host, addr)?;
                }
                Ok(())
            }
            Err(err) => {
                log::debug!("resolution of {host} failed, deferring to fetch: {err}");
                Ok(())
            }
        }
    }
}

impl Default for DestinationValidator {
    fn default() -> Self {
        Self::new()
    }
}

fn check_ip(host: &str, addr: IpAddr) -> Result<(), DestinationRejection> {
    match blocked_range(addr) {
        Some(range) => Err(DestinationRejection::BlockedAddress {
            host: host.to_string(),
            addr,
            range,
        }),
        None => Ok(()),
    }
}

fn normalise_host(domain: &str) -> String {
    domain.trim_end_matches('.').to_ascii_lowercase()
}

fn normalise_suffixes<I, S>(suffixes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    suffixes
        .into_iter()
        .map(|s| s.as_ref().trim().trim_matches('.').to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .map(|s| format!(".{s}"))
        .collect()
}

fn is_localhost_domain(host: &str) -> bool {
    matches!(host, "localhost" | "localhost.localdomain") || host.ends_with(".localhost")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::resolver::StaticResolver;

    fn validator() -> DestinationValidator {
        DestinationValidator::new().with_resolver(Arc::new(StaticResolver::default()))
    }

    #[test]
    fn rejects_non_http_schemes() {
        let v = validator();
        for url in [
            "file:///etc/passwd",
            "ftp://example.com",
            "gopher://example.com",
            "data:text/plain,hi",
            "javascript:alert(1)",
        ] {
            let err = v.validate_static(url).unwrap_err();
            assert_eq!(err.code(), "unsupported_scheme", "{url}");
        }
    }

    #[test]
    fn rejects_empty_and_malformed_input() {
        let v = validator();
        assert_eq!(v.validate_static("").unwrap_err(), DestinationRejection::Empty);
        assert_eq!(v.validate_static("   ").unwrap_err(), DestinationRejection::Empty);
        assert_eq!(v.validate_static("not a url").unwrap_err().code(), "malformed_url");
        assert_eq!(v.validate_static("http://").unwrap_err().code(), "malformed_url");
        assert_eq!(v.validate_static("http://[::1").unwrap_err().code(), "malformed_url");
    }

    #[test]
    fn rejects_blocked_literals() {
        let v = validator();
        for url in [
            "http://127.0.0.1",
            "http://127.8.9.10:8080/admin",
            "http://10.0.0.1",
            "http://172.16.0.1",
            "http://172.31.255.255",
            "http://192.168.1.1",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0",
            "http://100.64.0.1",
            "http://224.0.0.1",
            "http://255.255.255.255",
            "http://[::1]",
            "http://[::]",
            "http://[fe80::1]",
            "http://[fc00::1]",
            "http://[fd12:3456::1]",
            "http://[ff02::1]",
            "http://[::ffff:127.0.0.1]",
            "http://[::ffff:169.254.169.254]",
            "http://2130706433",
            "http://0x7f.0.0.1",
        ] {
            let err = v.validate_static(url).unwrap_err();
            assert_eq!(err.code(), "blocked_address", "{url}");
        }
    }

    #[test]
    fn rejects_local_and_internal_names() {
        let v = validator();
        assert_eq!(v.validate_static("http://localhost").unwrap_err().code(), "localhost");
        assert_eq!(v.validate_static("http://LOCALHOST.").unwrap_err().code(), "localhost");
        assert_eq!(
            v.validate_static("http://localhost.localdomain").unwrap_err().code(),
            "localhost"
        );
        assert_eq!(v.validate_static("http://app.localhost").unwrap_err().code(), "localhost");
        for url in [
            "http://printer.local",
            "https://db.internal/",
            "http://wiki.corp",
            "http://nas.lan.",
        ] {
            assert_eq!(v.validate_static(url).unwrap_err().code(), "internal_hostname", "{url}");
        }
    }

    #[test]
    fn accepts_public_destinations() {
        let v = validator();
        for url in [
            "https://example.com",
            "http://example.com:8080/path?q=1",
            "http://8.8.8.8",
            "http://100.128.0.1",
            "https://[2001:db8::1]/",
            "https://localhost-news.com",
            "https://local.example.com",
        ] {
            assert!(v.validate_static(url).is_ok(), "{url}");
        }
    }

    #[test]
    fn custom_suffixes_replace_defaults() {
        let v = validator().with_internal_suffixes(["home.arpa"]);
        assert_eq!(v.internal_suffixes(), &[".home.arpa".to_string()]);
        assert!(v.validate_static("http://printer.local").is_ok());
        assert!(v.validate_static("http://router.home.arpa").is_err());
    }

    #[tokio::test]
    async fn rejects_names_resolving_to_blocked_addresses() {
        let resolver = StaticResolver::default()
            .with_host("rebind.example.com", ["93.184.216.34", "127.0.0.1"])
            .with_host("public.example.com", ["93.184.216.34"]);
        let v = DestinationValidator::new().with_resolver(Arc::new(resolver));

        let err = v.validate("http://rebind.example.com/").await.unwrap_err();
        assert!(matches!(
            err,
            DestinationRejection::BlockedAddress { range: BlockedRange::Loopback, .. }
        ));
        assert!(v.validate("http://public.example.com/").await.is_ok());
    }

    #[tokio::test]
    async fn resolution_failure_is_not_a_rejection() {
        let v = validator();
        assert!(v.validate("https://unknown.example.org").await.is_ok());
    }

    #[test]
    fn classifies_ranges() {
        assert_eq!(
            blocked_range("172.20.1.1".parse().unwrap()),
            Some(BlockedRange::Private)
        );
        assert_eq!(blocked_range("172.32.0.1".parse().unwrap()), None);
        assert_eq!(
            blocked_range("::127.0.0.1".parse().unwrap()),
            Some(BlockedRange::Loopback)
        );
        assert_eq!(blocked_range("::ffff:8.8.8.8".parse().unwrap()), None);
    }
}
