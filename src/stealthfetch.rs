//! High level fetch facade.
//!
//! Wires the destination validator, session store, retry orchestrator and
//! batch coordinator around one [`FetchProvider`] and exposes the scrape
//! operations as flat, serialisable [`ScrapeOutcome`] records.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use thiserror::Error;

use crate::config::{
	ConfigError, FetchProfile, FetchProfileBuilder, ProfileError, ProfilePreset, Settings,
};
use crate::external_deps::provider::{CookieMap, FetchProvider, PageHandle, ReqwestFetchProvider};
use crate::extract;
use crate::fetch::{
	BatchCoordinator, BatchError, FetchRequest, FetchResult, RetryOrchestrator, RetryPolicy,
};
use crate::modules::events::{EventDispatcher, EventHandler};
use crate::modules::proxy::ProxyHealthReport;
use crate::modules::sessions::SessionStore;
use crate::outcome::{BatchOutcome, ScrapeOutcome, flatten_headers};
use crate::security::{DestinationValidator, HostResolver};

/// Smallest per-request timeout accepted by the facade, in milliseconds.
pub const MIN_TIMEOUT_MS: u64 = 1_000;
/// Largest per-request timeout accepted by the facade, in milliseconds.
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Result alias used by the facade.
pub type StealthFetchResult<T> = Result<T, StealthFetchError>;

/// Errors raised while building the facade or before a batch starts.
#[derive(Debug, Error)]
pub enum StealthFetchError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("invalid input: {0}")]
	Input(#[from] InputError),
	#[error("batch rejected: {0}")]
	Batch(#[from] BatchError),
}

/// Caller input the facade refuses. Single-URL operations report it as an
/// `invalid_input` outcome; `scrape_batch` returns it as an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
	#[error("URL cannot be empty")]
	EmptyUrl,
	#[error("Timeout must be between {MIN_TIMEOUT_MS} and {MAX_TIMEOUT_MS} milliseconds")]
	TimeoutOutOfRange(u64),
	#[error("Extract must be one of: text, html, both")]
	UnknownContentMode(String),
	#[error("Delay must be a non-negative number of seconds")]
	InvalidDelay(f64),
	#[error("invalid profile: {0}")]
	Profile(#[from] ProfileError),
}

/// Which page content `scrape_simple` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentMode {
	#[default]
	Text,
	Html,
	Both,
}

impl ContentMode {
	fn wants_text(self) -> bool {
		matches!(self, ContentMode::Text | ContentMode::Both)
	}

	fn wants_html(self) -> bool {
		matches!(self, ContentMode::Html | ContentMode::Both)
	}
}

impl FromStr for ContentMode {
	type Err = InputError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"text" => Ok(ContentMode::Text),
			"html" => Ok(ContentMode::Html),
			"both" => Ok(ContentMode::Both),
			_ => Err(InputError::UnknownContentMode(s.to_string())),
		}
	}
}

/// Per-call adjustments layered over a preset. `None` keeps the preset value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StealthOverrides {
	pub solve_challenge: Option<bool>,
	pub network_idle: Option<bool>,
	pub load_dom: Option<bool>,
	pub timeout_ms: Option<u64>,
	pub proxy: Option<String>,
}

/// Facade configuration used by the builder.
#[derive(Clone)]
pub struct StealthFetchConfig {
	pub settings: Settings,
	pub proxies: Vec<String>,
	pub jitter: Duration,
	pub challenge_settle: Duration,
	pub enable_logging: bool,
	pub handlers: Vec<Arc<dyn EventHandler>>,
	pub resolver: Option<Arc<dyn HostResolver>>,
}

impl Default for StealthFetchConfig {
	fn default() -> Self {
		Self {
			settings: Settings::default(),
			proxies: Vec::new(),
			jitter: Duration::ZERO,
			challenge_settle: Duration::from_secs(3),
			enable_logging: true,
			handlers: Vec::new(),
			resolver: None,
		}
	}
}

/// Fluent builder for [`StealthFetch`].
pub struct StealthFetchBuilder {
	config: StealthFetchConfig,
}

impl StealthFetchBuilder {
	pub fn new() -> Self {
		Self {
			config: StealthFetchConfig::default(),
		}
	}

	pub fn with_settings(mut self, settings: Settings) -> Self {
		self.config.settings = settings;
		self
	}

	/// Proxy candidates tried in order by every request.
	pub fn with_proxies<I, S>(mut self, proxies: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.proxies = proxies.into_iter().map(Into::into).collect();
		self
	}

	pub fn with_jitter(mut self, jitter: Duration) -> Self {
		self.config.jitter = jitter;
		self
	}

	pub fn with_challenge_settle(mut self, settle: Duration) -> Self {
		self.config.challenge_settle = settle;
		self
	}

	/// Resolver used for destination checks (and DNS pinning by the HTTP provider).
	pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
		self.config.resolver = Some(resolver);
		self
	}

	pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
		self.config.handlers.push(handler);
		self
	}

	pub fn disable_logging(mut self) -> Self {
		self.config.enable_logging = false;
		self
	}

	/// Builds a facade over the bundled reqwest provider.
	pub fn build(self) -> StealthFetchResult<StealthFetch<ReqwestFetchProvider>> {
		let validator = validator_for(&self.config);
		let provider = ReqwestFetchProvider::new().with_validator(validator);
		StealthFetch::with_config(self.config, provider)
	}

	/// Builds a facade over a caller-supplied provider.
	pub fn build_with_provider<P: FetchProvider>(self, provider: P) -> StealthFetchResult<StealthFetch<P>> {
		StealthFetch::with_config(self.config, provider)
	}
}

impl Default for StealthFetchBuilder {
	fn default() -> Self {
		Self::new()
	}
}

fn validator_for(config: &StealthFetchConfig) -> DestinationValidator {
	let mut validator =
		DestinationValidator::new().with_internal_suffixes(config.settings.internal_suffixes.iter().cloned());
	if let Some(resolver) = &config.resolver {
		validator = validator.with_resolver(resolver.clone());
	}
	validator
}

/// Entry point for every scrape operation.
pub struct StealthFetch<P: FetchProvider> {
	settings: Settings,
	proxies: Vec<String>,
	retry: RetryPolicy,
	orchestrator: Arc<RetryOrchestrator<P>>,
	batch: BatchCoordinator<P>,
}

impl StealthFetch<ReqwestFetchProvider> {
	/// Obtain a builder to customise the facade.
	pub fn builder() -> StealthFetchBuilder {
		StealthFetchBuilder::new()
	}

	/// Facade with default settings over the reqwest provider.
	pub fn new() -> StealthFetchResult<Self> {
		StealthFetchBuilder::new().build()
	}

	/// Facade configured from `PROXY_URL`, `DEFAULT_TIMEOUT` and friends.
	pub fn from_env() -> StealthFetchResult<Self> {
		StealthFetchBuilder::new().with_settings(Settings::from_env()?).build()
	}
}

impl<P: FetchProvider> StealthFetch<P> {
	fn with_config(config: StealthFetchConfig, provider: P) -> StealthFetchResult<Self> {
		config.settings.validate()?;

		let mut events = if config.enable_logging {
			let level = config.settings.log_level_filter().unwrap_or(log::LevelFilter::Info);
			EventDispatcher::with_logging_at(level)
		} else {
			EventDispatcher::new()
		};
		for handler in &config.handlers {
			events.register_handler(handler.clone());
		}

		let provider = Arc::new(provider);
		let sessions = Arc::new(SessionStore::new(provider.clone()).with_events(events.clone()));
		let orchestrator = Arc::new(
			RetryOrchestrator::new(provider)
				.with_sessions(sessions)
				.with_validator(validator_for(&config))
				.with_events(events),
		);

		let retry = config
			.settings
			.retry_policy()
			.with_jitter(config.jitter)
			.with_challenge_settle(config.challenge_settle);

		let mut proxies = config.proxies;
		if proxies.is_empty() {
			proxies.extend(config.settings.proxy_url.clone());
		}

		let batch = BatchCoordinator::new(orchestrator.clone())
			.with_max_batch_size(config.settings.max_batch_size)
			.with_retry(retry.clone())
			.with_proxies(proxies.iter().cloned());

		Ok(Self {
			settings: config.settings,
			proxies,
			retry,
			orchestrator,
			batch,
		})
	}

	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	pub fn orchestrator(&self) -> &Arc<RetryOrchestrator<P>> {
		&self.orchestrator
	}

	pub fn sessions(&self) -> &Arc<SessionStore<P>> {
		self.orchestrator.sessions()
	}

	/// Outcome counters of every proxy requests have been routed through.
	pub fn proxy_health(&self) -> ProxyHealthReport {
		self.orchestrator.proxy_health().report()
	}

	/// Plain fetch with the `minimal` preset. A selector's matches are
	/// reported under `selectors.content`; `timeout_ms` defaults to the
	/// configured default timeout. Refused input comes back as an outcome
	/// with `error_kind` `invalid_input`.
	pub async fn scrape_simple(
		&self,
		url: &str,
		selector: Option<&str>,
		mode: ContentMode,
		timeout_ms: Option<u64>,
	) -> ScrapeOutcome {
		log::debug!("scrape_simple url={url} selector={selector:?} mode={mode:?}");
		let request = match self.simple_request(url, selector, timeout_ms) {
			Ok(request) => request,
			Err(err) => return finish("scrape_simple", ScrapeOutcome::invalid_input(url, &err)),
		};

		let outcome = match self.orchestrator.fetch(&request).await {
			Ok(result) => {
				let mut outcome = ScrapeOutcome::succeeded(url, &result);
				if mode.wants_text() {
					outcome.text = Some(extract::page_text(&result.page));
				}
				if mode.wants_html() {
					outcome.html = Some(result.page.content().to_string());
				}
				outcome.selectors = result.extracted;
				outcome
			}
			Err(failure) => ScrapeOutcome::failed(url, &failure),
		};
		finish("scrape_simple", outcome)
	}

	/// Full-protection fetch with `preset`, adjusted by `overrides`. An
	/// override proxy is tried before the configured candidates.
	pub async fn scrape_stealth(
		&self,
		url: &str,
		preset: ProfilePreset,
		overrides: StealthOverrides,
	) -> ScrapeOutcome {
		log::debug!("scrape_stealth url={url} preset={preset}");
		let request = match self.stealth_request(url, preset, overrides) {
			Ok(request) => request,
			Err(err) => return finish("scrape_stealth", ScrapeOutcome::invalid_input(url, &err)),
		};

		let outcome = match self.orchestrator.fetch(&request).await {
			Ok(result) => full_outcome(url, &result),
			Err(failure) => ScrapeOutcome::failed(url, &failure),
		};
		finish("scrape_stealth", outcome)
	}

	/// Fetch inside a named session, creating it (and an id) when needed.
	/// The outcome reports the session id and the context's cookies.
	pub async fn scrape_session(
		&self,
		url: &str,
		session_id: Option<&str>,
		cookies: Option<CookieMap>,
		preset: ProfilePreset,
	) -> ScrapeOutcome {
		let session_id = match session_id.map(str::trim).filter(|id| !id.is_empty()) {
			Some(id) => id.to_string(),
			None => generate_session_id(),
		};
		log::debug!("scrape_session url={url} session={session_id} preset={preset}");
		if let Err(err) = require_url(url) {
			let outcome = ScrapeOutcome::invalid_input(url, &err).with_session(session_id);
			return finish("scrape_session", outcome);
		}

		let request = self
			.request(url, preset.profile())
			.with_session(session_id.clone())
			.with_cookies(cookies.unwrap_or_default());

		let outcome = match self.orchestrator.fetch(&request).await {
			Ok(result) => {
				let mut outcome = full_outcome(url, &result);
				if let Some(context) = self.sessions().context(&session_id).await {
					let jar = self
						.orchestrator
						.provider()
						.cookies(&context, &result.final_url)
						.await;
					outcome.cookies = Some(jar);
				}
				outcome
			}
			Err(failure) => ScrapeOutcome::failed(url, &failure),
		};
		finish("scrape_session", outcome.with_session(session_id))
	}

	/// Projects the page into the named `selectors`.
	pub async fn extract_structured(
		&self,
		url: &str,
		selectors: &BTreeMap<String, String>,
		preset: ProfilePreset,
	) -> ScrapeOutcome {
		log::debug!("extract_structured url={url} fields={} preset={preset}", selectors.len());
		if let Err(err) = require_url(url) {
			return finish("extract_structured", ScrapeOutcome::invalid_input(url, &err));
		}

		let request = self
			.request(url, preset.profile())
			.with_selectors(selectors.iter().map(|(k, v)| (k.clone(), v.clone())));

		let outcome = match self.orchestrator.fetch(&request).await {
			Ok(result) => {
				let mut outcome = ScrapeOutcome::succeeded(url, &result);
				outcome.text = Some(extract::page_text(&result.page));
				outcome.extracted = Some(result.extracted.unwrap_or_default());
				outcome
			}
			Err(failure) => ScrapeOutcome::failed(url, &failure),
		};
		finish("extract_structured", outcome)
	}

	/// Fetches `urls` in order, at least `delay_secs` apart. An unusable
	/// delay or an oversized batch is refused up front; individual failures
	/// are reported in the outcome.
	pub async fn scrape_batch<S: AsRef<str>>(
		&self,
		urls: &[S],
		preset: ProfilePreset,
		delay_secs: f64,
	) -> StealthFetchResult<BatchOutcome> {
		let delay =
			Duration::try_from_secs_f64(delay_secs).map_err(|_| InputError::InvalidDelay(delay_secs))?;
		log::debug!("scrape_batch size={} preset={preset} delay={delay_secs}s", urls.len());

		let batch = self.batch.run_batch(urls, &preset.profile(), delay).await?;

		let results: Vec<ScrapeOutcome> = urls
			.iter()
			.zip(batch.results)
			.map(|(url, result)| match result {
				Ok(result) => {
					let mut outcome = ScrapeOutcome::succeeded(url.as_ref(), &result);
					outcome.text = Some(extract::page_text(&result.page));
					outcome
				}
				Err(failure) => ScrapeOutcome::failed(url.as_ref(), &failure),
			})
			.collect();

		let outcome = BatchOutcome::from_results(results);
		log::info!(
			"scrape_batch total={} successful={} failed={}",
			outcome.total,
			outcome.successful,
			outcome.failed
		);
		Ok(outcome)
	}

	/// Closes every session. Returns how many were open.
	pub async fn shutdown(&self) -> usize {
		let closed = self.sessions().close_all().await;
		log::info!("shutdown closed_sessions={closed}");
		closed
	}

	fn request(&self, url: &str, profile: FetchProfile) -> FetchRequest {
		FetchRequest::new(url, profile)
			.with_retry(self.retry.clone())
			.with_proxies(self.proxies.iter().cloned())
	}

	fn simple_request(
		&self,
		url: &str,
		selector: Option<&str>,
		timeout_ms: Option<u64>,
	) -> Result<FetchRequest, InputError> {
		require_url(url)?;
		let timeout = match timeout_ms {
			Some(ms) => checked_timeout(ms)?,
			None => self.settings.default_timeout(),
		};
		let profile = FetchProfile::minimal().to_builder().timeout(timeout).build()?;
		let request = self.request(url, profile);
		Ok(match selector {
			Some(selector) => request.with_selector("content", selector),
			None => request,
		})
	}

	fn stealth_request(
		&self,
		url: &str,
		preset: ProfilePreset,
		overrides: StealthOverrides,
	) -> Result<FetchRequest, InputError> {
		require_url(url)?;
		let mut builder: FetchProfileBuilder = preset.profile().to_builder();
		if let Some(solve) = overrides.solve_challenge {
			builder = builder.solve_challenge(solve);
		}
		if let Some(idle) = overrides.network_idle {
			builder = builder.network_idle(idle);
		}
		if let Some(dom) = overrides.load_dom {
			builder = builder.load_dom(dom);
		}
		if let Some(ms) = overrides.timeout_ms {
			builder = builder.timeout(checked_timeout(ms)?);
		}
		if let Some(proxy) = &overrides.proxy {
			builder = builder.proxy(proxy.clone());
		}
		let profile = builder.build()?;

		let mut request = self.request(url, profile);
		if let Some(proxy) = overrides.proxy {
			let candidates: Vec<String> = std::iter::once(proxy).chain(self.proxies.iter().cloned()).collect();
			request = request.with_proxies(candidates);
		}
		Ok(request)
	}
}

fn require_url(url: &str) -> Result<(), InputError> {
	if url.trim().is_empty() {
		return Err(InputError::EmptyUrl);
	}
	Ok(())
}

fn checked_timeout(ms: u64) -> Result<Duration, InputError> {
	if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&ms) {
		return Err(InputError::TimeoutOutOfRange(ms));
	}
	Ok(Duration::from_millis(ms))
}

/// `session_<UTC yyyymmddHHMMSS>_<1000..=9999>`
pub fn generate_session_id() -> String {
	let suffix: u16 = rand::thread_rng().gen_range(1000..=9999);
	format!("session_{}_{suffix}", Utc::now().format("%Y%m%d%H%M%S"))
}

fn full_outcome<Pg: PageHandle>(url: &str, result: &FetchResult<Pg>) -> ScrapeOutcome {
	let mut outcome = ScrapeOutcome::succeeded(url, result);
	outcome.text = Some(extract::page_text(&result.page));
	outcome.html = Some(result.page.content().to_string());
	outcome.headers = Some(flatten_headers(result.page.headers()));
	outcome.extracted = result.extracted.clone();
	outcome
}

fn finish(operation: &str, outcome: ScrapeOutcome) -> ScrapeOutcome {
	match &outcome.error {
		None => log::info!(
			"{operation} url={} status={:?} attempts={:?}",
			outcome.url,
			outcome.status_code,
			outcome.attempts
		),
		Some(error) => log::warn!("{operation} url={} error={error}", outcome.url),
	}
	outcome
}
