//! Proxy rotation and health tracking.
//!
//! [`ProxyRotation`] is the ordered candidate list of a single request.
//! Rotation only moves forward: once the last candidate is in use, further
//! rotation requests keep it. [`ProxyHealth`] outlives requests and counts
//! outcomes per endpoint across all of them.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyStats {
    pub successes: u64,
    pub failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    pub last_used: Option<Instant>,
    pub last_failure: Option<Instant>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyHealthReport {
    pub total_proxies: usize,
    /// Endpoints whose latest outcome was a failure.
    pub failing_proxies: usize,
    pub details: HashMap<String, ProxyStats>,
}

/// Ordered proxy candidates for one request.
#[derive(Debug, Clone, Default)]
pub struct ProxyRotation {
    proxies: Vec<String>,
    current_index: usize,
}

impl ProxyRotation {
    /// Blank and duplicate endpoints are dropped.
    pub fn new<I>(proxies: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut rotation = Self::default();
        for proxy in proxies {
            rotation.add_proxy(proxy);
        }
        rotation
    }

    pub fn add_proxy(&mut self, proxy: impl Into<String>) {
        let endpoint = proxy.into().trim().to_string();
        if endpoint.is_empty() || self.proxies.contains(&endpoint) {
            return;
        }
        self.proxies.push(endpoint);
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// Proxy for the next attempt, `None` means a direct connection.
    pub fn current(&self) -> Option<&str> {
        self.proxies.get(self.current_index).map(String::as_str)
    }

    /// Continue from `proxy` instead of the first candidate. Returns false
    /// (and changes nothing) when `proxy` is not a candidate.
    pub fn resume_at(&mut self, proxy: &str) -> bool {
        match self.proxies.iter().position(|candidate| candidate == proxy) {
            Some(index) => {
                self.current_index = index;
                true
            }
            None => false,
        }
    }

    /// Advance to the next candidate. Returns the new proxy, or `None` when
    /// no untried candidate remains (the current one is kept).
    pub fn rotate(&mut self) -> Option<&str> {
        if self.current_index + 1 >= self.proxies.len() {
            return None;
        }
        self.current_index += 1;
        self.current()
    }
}

/// Per-endpoint outcome counters shared by every request.
#[derive(Debug, Default)]
pub struct ProxyHealth {
    stats: Mutex<HashMap<String, ProxyStats>>,
}

impl ProxyHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_use(&self, proxy: &str) {
        self.update(proxy, |stats| stats.last_used = Some(Instant::now()));
    }

    pub fn report_success(&self, proxy: &str) {
        self.update(proxy, |stats| {
            stats.successes += 1;
            stats.consecutive_failures = 0;
        });
    }

    pub fn report_failure(&self, proxy: &str) {
        self.update(proxy, |stats| {
            stats.failures += 1;
            stats.consecutive_failures += 1;
            stats.last_failure = Some(Instant::now());
        });
    }

    pub fn stats(&self, proxy: &str) -> Option<ProxyStats> {
        self.lock().get(proxy).cloned()
    }

    pub fn report(&self) -> ProxyHealthReport {
        let details = self.lock().clone();
        let failing_proxies = details
            .values()
            .filter(|stats| stats.consecutive_failures > 0)
            .count();
        ProxyHealthReport {
            total_proxies: details.len(),
            failing_proxies,
            details,
        }
    }

    fn update(&self, proxy: &str, apply: impl FnOnce(&mut ProxyStats)) {
        let mut stats = self.lock();
        apply(stats.entry(proxy.to_string()).or_default());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ProxyStats>> {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
