use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use super::retry::RetryPolicy;
use crate::config::FetchProfile;
use crate::external_deps::provider::CookieMap;
use crate::extract::ExtractedValue;

/// Everything the orchestrator needs for one logical fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    url: String,
    profile: FetchProfile,
    selectors: BTreeMap<String, String>,
    session_key: Option<String>,
    cookies: CookieMap,
    retry: RetryPolicy,
    proxies: Vec<String>,
}

impl FetchRequest {
    pub fn new(url: impl Into<String>, profile: FetchProfile) -> Self {
        Self {
            url: url.into(),
            profile,
            selectors: BTreeMap::new(),
            session_key: None,
            cookies: CookieMap::new(),
            retry: RetryPolicy::default(),
            proxies: Vec::new(),
        }
    }

    pub fn with_selector(mut self, name: impl Into<String>, selector: impl Into<String>) -> Self {
        self.selectors.insert(name.into(), selector.into());
        self
    }

    pub fn with_selectors<I, K, V>(mut self, selectors: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.selectors
            .extend(selectors.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Run inside the named session instead of a throwaway context.
    pub fn with_session(mut self, key: impl Into<String>) -> Self {
        self.session_key = Some(key.into());
        self
    }

    /// Cookies applied when a new context is created for this request.
    pub fn with_cookies(mut self, cookies: CookieMap) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Ordered proxy candidates. When empty the profile's own proxy is used.
    pub fn with_proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn profile(&self) -> &FetchProfile {
        &self.profile
    }

    pub fn selectors(&self) -> &BTreeMap<String, String> {
        &self.selectors
    }

    pub fn session_key(&self) -> Option<&str> {
        self.session_key.as_deref()
    }

    pub fn cookies(&self) -> &CookieMap {
        &self.cookies
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn proxies(&self) -> &[String] {
        &self.proxies
    }
}

/// A successful fetch.
#[derive(Debug, Clone)]
pub struct FetchResult<Pg> {
    pub status: u16,
    pub final_url: Url,
    pub page: Pg,
    pub attempts: u32,
    pub elapsed: Duration,
    /// Present when the request carried selectors.
    pub extracted: Option<BTreeMap<String, ExtractedValue>>,
    /// Proxy used by the successful attempt.
    pub proxy: Option<String>,
}
