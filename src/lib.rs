//! # stealthfetch-rs
//!
//! Hardened fetch orchestration: SSRF-guarded destinations, bounded retries
//! with backoff and proxy rotation, keyed session reuse, and a small selector
//! language for projecting pages into named fields.
//!
//! The engine that performs the fetch sits behind the
//! [`FetchProvider`](external_deps::provider::FetchProvider) trait. A plain
//! HTTP provider built on reqwest ships with the crate; it does not execute
//! JavaScript, so challenge pages are detected and reported rather than
//! solved.
//!
//! ## Features
//!
//! - Destination policy rejecting loopback, private, link-local and metadata addresses
//! - Redirect and DNS re-checks against the same policy
//! - Retry with exponential backoff and proxy rotation
//! - Session store with per-key locking
//! - `sel`, `sel::html`, `sel@attr` and `sel@a@b` selector projections
//! - Paced batches with per-item failure reporting
//!
//! ## Example
//!
//! ```no_run
//! use stealthfetch_rs::{ContentMode, StealthFetch};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = StealthFetch::new()?;
//!     let outcome = fetcher
//!         .scrape_simple("https://example.com", Some("h1"), ContentMode::Text, None)
//!         .await;
//!     println!("{}", serde_json::to_string_pretty(&outcome)?);
//!     fetcher.shutdown().await;
//!     Ok(())
//! }
//! ```

mod stealthfetch;

pub mod challenges;
pub mod config;
pub mod external_deps;
pub mod extract;
pub mod fetch;
pub mod modules;
pub mod outcome;
pub mod security;

pub use crate::stealthfetch::{
    ContentMode,
    InputError,
    MAX_TIMEOUT_MS,
    MIN_TIMEOUT_MS,
    StealthFetch,
    StealthFetchBuilder,
    StealthFetchConfig,
    StealthFetchError,
    StealthFetchResult,
    StealthOverrides,
    generate_session_id,
};

pub use crate::challenges::detectors::{Detection, PageClass, PageClassifier};

pub use crate::config::{
    ConfigError,
    FetchProfile,
    FetchProfileBuilder,
    ProfileError,
    ProfilePreset,
    Settings,
    WaitState,
};

pub use crate::external_deps::provider::{
    CookieMap,
    ElementHandle,
    FetchProvider,
    HtmlPage,
    HttpContext,
    PageHandle,
    ProviderError,
    QueryError,
    ReqwestFetchProvider,
};

pub use crate::extract::{ExtractMode, ExtractedValue, SelectorSpec, SelectorSyntaxError};

pub use crate::fetch::{
    BatchCoordinator,
    BatchError,
    BatchResult,
    FailureKind,
    FetchFailure,
    FetchRequest,
    FetchResult,
    RetryOrchestrator,
    RetryPolicy,
};

pub use crate::modules::{
    EventDispatcher,
    EventHandler,
    FetchEvent,
    LoggingHandler,
    ProxyHealth,
    ProxyHealthReport,
    ProxyRotation,
    SessionStore,
};

pub use crate::outcome::{BatchItemError, BatchOutcome, ScrapeOutcome};

pub use crate::security::{
    DestinationRejection,
    DestinationValidator,
    HostResolver,
    StaticResolver,
    SystemResolver,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
