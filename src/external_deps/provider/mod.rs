//! Fetch provider capability.
//!
//! The orchestrator never renders or downloads anything itself. A
//! [`FetchProvider`] owns contexts (cookie jar plus fingerprint), performs the
//! fetch, and hands back a [`PageHandle`] the selector evaluator can query.

mod http_client;

pub use self::http_client::{HtmlPage, HttpContext, ReqwestFetchProvider};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use http::HeaderMap;
use thiserror::Error;
use url::Url;

use crate::config::FetchProfile;
use crate::security::DestinationRejection;

/// Cookie name to value.
pub type CookieMap = BTreeMap<String, String>;

/// Errors surfaced by providers.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request blocked: {0}")]
    Blocked(String),
    #[error("anti-bot challenge served: {0}")]
    Challenge(String),
    #[error("refused to follow redirect: {0}")]
    Destination(DestinationRejection),
    #[error("provider misconfigured: {0}")]
    Configuration(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

/// A matched element.
pub trait ElementHandle: Send + Sync {
    /// Concatenated text content.
    fn text(&self) -> String;
    /// Inner markup.
    fn html(&self) -> String;
    fn attribute(&self, name: &str) -> Option<String>;
}

/// A fetched page.
pub trait PageHandle: Send + Sync {
    /// URL after redirects.
    fn final_url(&self) -> &Url;
    fn status_code(&self) -> u16;
    fn content(&self) -> &str;
    fn headers(&self) -> &HeaderMap;
    /// Matches `css` in document order.
    fn query(&self, css: &str) -> Result<Vec<Box<dyn ElementHandle>>, QueryError>;
}

/// Browser or HTTP engine driven by the orchestrator.
#[async_trait]
pub trait FetchProvider: Send + Sync + 'static {
    type Context: Send + Sync + 'static;
    type Page: PageHandle + 'static;

    fn name(&self) -> &'static str;

    /// Builds a context for `profile`; `cookies` must be in effect before its first fetch.
    async fn create_context(
        &self,
        profile: &FetchProfile,
        cookies: &CookieMap,
    ) -> Result<Self::Context, ProviderError>;

    async fn close_context(&self, context: &Self::Context) -> Result<(), ProviderError>;

    async fn fetch(
        &self,
        context: &Self::Context,
        url: &Url,
        profile: &FetchProfile,
    ) -> Result<Self::Page, ProviderError>;

    /// Cookies the context would send to `url`.
    async fn cookies(&self, _context: &Self::Context, _url: &Url) -> CookieMap {
        CookieMap::new()
    }
}
