//! Plain HTTP provider built on `reqwest`, with `scraper` page handles.
//!
//! Each context gets its own client and cookie jar, so cookies accumulate per
//! session. JavaScript is never executed; challenge pages come back as
//! ordinary pages and are classified by the orchestrator.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use rand::seq::SliceRandom;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::redirect::Policy;
use reqwest::{Client, Proxy};
use scraper::{Html, Selector};
use url::Url;

use super::{CookieMap, ElementHandle, FetchProvider, PageHandle, ProviderError, QueryError};
use crate::config::FetchProfile;
use crate::security::{DestinationRejection, DestinationValidator, GuardedDnsResolver};

const CHROME_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
];

const FIREFOX_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:130.0) Gecko/20100101 Firefox/130.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.6; rv:130.0) Gecko/20100101 Firefox/130.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:129.0) Gecko/20100101 Firefox/129.0",
];

const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Per-context client state.
pub struct HttpContext {
    client: Client,
    jar: Arc<Jar>,
    pending_cookies: Mutex<CookieMap>,
    user_agent: String,
}

impl HttpContext {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Seeds the jar with the initial cookies, scoped to the first URL fetched.
    fn apply_pending_cookies(&self, url: &Url) {
        let pending = {
            let mut guard = self
                .pending_cookies
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::take(&mut *guard)
        };
        for (name, value) in pending {
            self.jar.add_cookie_str(&format!("{name}={value}; Path=/"), url);
        }
    }
}

/// HTTP-only [`FetchProvider`].
#[derive(Debug, Clone)]
pub struct ReqwestFetchProvider {
    validator: DestinationValidator,
    guard_dns: bool,
    max_redirects: usize,
}

impl ReqwestFetchProvider {
    pub fn new() -> Self {
        Self {
            validator: DestinationValidator::new(),
            guard_dns: true,
            max_redirects: 10,
        }
    }

    /// Validator applied to every redirect hop.
    pub fn with_validator(mut self, validator: DestinationValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Refuse connections to names that resolve to blocked addresses.
    ///
    /// Only direct connections are guarded. With a proxy the client resolves
    /// nothing but the proxy's own name, which may legitimately be internal
    /// (`proxy.corp`, a 10.x address); the target was already checked by the
    /// orchestrator and redirect hops by the redirect policy.
    pub fn with_dns_guard(mut self, enabled: bool) -> Self {
        self.guard_dns = enabled;
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    fn guards_dns_for(&self, profile: &FetchProfile) -> bool {
        self.guard_dns && profile.proxy().is_none()
    }

    fn pick_user_agent(profile: &FetchProfile) -> &'static str {
        let pool = if profile.google_search() {
            CHROME_AGENTS
        } else {
            FIREFOX_AGENTS
        };
        if profile.randomize_user_agent() {
            pool.choose(&mut rand::thread_rng()).copied().unwrap_or(pool[0])
        } else {
            pool[0]
        }
    }

    fn default_headers(
        profile: &FetchProfile,
        user_agent: &str,
    ) -> Result<HeaderMap, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, header_value(user_agent)?);
        headers.insert(header::ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header_value(profile.accept_language())?,
        );
        if profile.block_trackers() {
            headers.insert(HeaderName::from_static("dnt"), HeaderValue::from_static("1"));
        }
        for (name, value) in profile.extra_headers() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|err| {
                ProviderError::Configuration(format!("invalid header name '{name}': {err}"))
            })?;
            headers.insert(name, header_value(value)?);
        }
        Ok(headers)
    }

    fn build_client(
        &self,
        profile: &FetchProfile,
        jar: Arc<Jar>,
        user_agent: &str,
    ) -> Result<Client, ProviderError> {
        let validator = self.validator.clone();
        let max_redirects = self.max_redirects;
        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() >= max_redirects {
                return attempt.error(format!("more than {max_redirects} redirects"));
            }
            match validator.check_url_static(attempt.url()) {
                Ok(()) => attempt.follow(),
                Err(rejection) => attempt.error(rejection),
            }
        });

        let mut builder = Client::builder()
            .cookie_provider(jar)
            .default_headers(Self::default_headers(profile, user_agent)?)
            .timeout(profile.timeout())
            .redirect(policy)
            .gzip(true)
            .brotli(true);

        if let Some(proxy) = profile.proxy() {
            let proxy = Proxy::all(proxy)
                .map_err(|err| ProviderError::Configuration(format!("proxy '{proxy}': {err}")))?;
            builder = builder.proxy(proxy);
        }
        if self.guards_dns_for(profile) {
            builder = builder.dns_resolver(Arc::new(GuardedDnsResolver::new(
                self.validator.resolver().clone(),
            )));
        }

        builder
            .build()
            .map_err(|err| ProviderError::Configuration(err.to_string()))
    }
}

impl Default for ReqwestFetchProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FetchProvider for ReqwestFetchProvider {
    type Context = HttpContext;
    type Page = HtmlPage;

    fn name(&self) -> &'static str {
        "reqwest"
    }

    async fn create_context(
        &self,
        profile: &FetchProfile,
        cookies: &CookieMap,
    ) -> Result<HttpContext, ProviderError> {
        let jar = Arc::new(Jar::default());
        let user_agent = Self::pick_user_agent(profile).to_string();
        let client = self.build_client(profile, jar.clone(), &user_agent)?;
        log::debug!(
            "created http context (proxy={}, cookies={})",
            profile.proxy().unwrap_or("none"),
            cookies.len()
        );
        Ok(HttpContext {
            client,
            jar,
            pending_cookies: Mutex::new(cookies.clone()),
            user_agent,
        })
    }

    async fn close_context(&self, _context: &HttpContext) -> Result<(), ProviderError> {
        // The client's connection pool is released when the last handle drops.
        Ok(())
    }

    async fn fetch(
        &self,
        context: &HttpContext,
        url: &Url,
        profile: &FetchProfile,
    ) -> Result<HtmlPage, ProviderError> {
        context.apply_pending_cookies(url);

        let response = context
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| classify_error(err, profile))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|err| classify_error(err, profile))?;

        log::debug!("{} {} -> {} ({} bytes)", self.name(), final_url, status, body.len());
        Ok(HtmlPage::new(final_url, status, headers, body))
    }

    async fn cookies(&self, context: &HttpContext, url: &Url) -> CookieMap {
        context.apply_pending_cookies(url);
        let Some(value) = context.jar.cookies(url) else {
            return CookieMap::new();
        };
        value
            .to_str()
            .unwrap_or_default()
            .split(';')
            .filter_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value)
        .map_err(|err| ProviderError::Configuration(format!("invalid header value: {err}")))
}

fn classify_error(err: reqwest::Error, profile: &FetchProfile) -> ProviderError {
    if err.is_timeout() {
        return ProviderError::Timeout(profile.timeout());
    }
    if err.is_redirect() {
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            if let Some(rejection) = inner.downcast_ref::<DestinationRejection>() {
                return ProviderError::Destination(rejection.clone());
            }
            source = inner.source();
        }
    }
    ProviderError::Transport(err.to_string())
}

/// A fetched HTML document.
///
/// `scraper::Html` is not `Send`, so the body is kept as text and parsed per
/// query; matches are copied out as owned snapshots.
#[derive(Debug, Clone)]
pub struct HtmlPage {
    final_url: Url,
    status: u16,
    headers: HeaderMap,
    body: String,
}

impl HtmlPage {
    pub fn new(final_url: Url, status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            final_url,
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        }
    }

    /// Page with no response headers, mostly for tests and fixtures.
    pub fn from_html(final_url: Url, status: u16, html: impl Into<String>) -> Self {
        Self {
            final_url,
            status,
            headers: HeaderMap::new(),
            body: html.into(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl PageHandle for HtmlPage {
    fn final_url(&self) -> &Url {
        &self.final_url
    }

    fn status_code(&self) -> u16 {
        self.status
    }

    fn content(&self) -> &str {
        &self.body
    }

    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn query(&self, css: &str) -> Result<Vec<Box<dyn ElementHandle>>, QueryError> {
        let selector = Selector::parse(css).map_err(|err| QueryError::InvalidSelector {
            selector: css.to_string(),
            reason: err.to_string(),
        })?;
        let document = Html::parse_document(&self.body);
        Ok(document
            .select(&selector)
            .map(|element| {
                Box::new(ElementSnapshot {
                    text: element.text().collect(),
                    html: element.inner_html(),
                    attributes: element
                        .value()
                        .attrs()
                        .map(|(name, value)| (name.to_string(), value.to_string()))
                        .collect(),
                }) as Box<dyn ElementHandle>
            })
            .collect())
    }
}

#[derive(Debug, Clone)]
struct ElementSnapshot {
    text: String,
    html: String,
    attributes: Vec<(String, String)>,
}

impl ElementHandle for ElementSnapshot {
    fn text(&self) -> String {
        self.text.clone()
    }

    fn html(&self) -> String {
        self.html.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(attr, _)| attr.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(html: &str) -> HtmlPage {
        HtmlPage::from_html(Url::parse("https://example.com/").unwrap(), 200, html)
    }

    #[test]
    fn queries_elements_in_document_order() {
        let page = page(r#"<ul><li class="a">one</li><li>two <b>bold</b></li></ul>"#);
        let items = page.query("li").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text(), "one");
        assert_eq!(items[1].text(), "two bold");
        assert_eq!(items[1].html(), "two <b>bold</b>");
        assert_eq!(items[0].attribute("class").as_deref(), Some("a"));
        assert_eq!(items[1].attribute("class"), None);
    }

    #[test]
    fn invalid_css_is_a_query_error() {
        let page = page("<p>hi</p>");
        assert!(matches!(
            page.query("p[").err(),
            Some(QueryError::InvalidSelector { .. })
        ));
    }

    #[test]
    fn user_agent_follows_browser_family() {
        let chrome = FetchProfile::standard();
        assert!(ReqwestFetchProvider::pick_user_agent(&chrome).contains("Chrome"));
        let firefox = FetchProfile::minimal();
        assert!(ReqwestFetchProvider::pick_user_agent(&firefox).contains("Firefox"));
    }

    #[test]
    fn dns_guard_applies_to_direct_connections_only() {
        let provider = ReqwestFetchProvider::new();
        let direct = FetchProfile::standard();
        let proxied = direct.with_proxy(Some("http://proxy.corp:3128".into())).unwrap();
        assert!(provider.guards_dns_for(&direct));
        assert!(!provider.guards_dns_for(&proxied));
        assert!(!provider.with_dns_guard(false).guards_dns_for(&direct));
    }

    #[test]
    fn rejects_bad_extra_headers() {
        let profile = FetchProfile::builder()
            .header("bad header", "x")
            .build()
            .unwrap();
        let err = ReqwestFetchProvider::default_headers(&profile, "ua").unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn initial_cookies_are_visible_before_first_fetch() {
        let provider = ReqwestFetchProvider::new();
        let mut cookies = CookieMap::new();
        cookies.insert("sid".into(), "abc".into());
        let context = provider
            .create_context(&FetchProfile::standard(), &cookies)
            .await
            .unwrap();
        let url = Url::parse("https://example.com/account").unwrap();
        let jar = provider.cookies(&context, &url).await;
        assert_eq!(jar.get("sid").map(String::as_str), Some("abc"));
    }
}
