//! Retry orchestration.
//!
//! One call to [`RetryOrchestrator::fetch`] validates the destination, runs up
//! to `budget` provider attempts with backoff and proxy rotation, re-checks
//! where redirects ended up, and projects the page through any selectors.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::failure::{FailureKind, FetchFailure};
use super::request::{FetchRequest, FetchResult};
use crate::challenges::detectors::{PageClass, PageClassifier};
use crate::config::FetchProfile;
use crate::external_deps::provider::{FetchProvider, PageHandle};
use crate::extract;
use crate::modules::events::{
    AttemptEvent, AttemptFailedEvent, EventDispatcher, FetchEvent, RejectedEvent, RetryEvent,
    SuccessEvent,
};
use crate::modules::proxy::{ProxyHealth, ProxyRotation};
use crate::modules::sessions::SessionStore;
use crate::security::{DestinationRejection, DestinationValidator};

/// Drives a [`FetchProvider`] through validation, retries and extraction.
pub struct RetryOrchestrator<P: FetchProvider> {
    provider: Arc<P>,
    sessions: Arc<SessionStore<P>>,
    validator: DestinationValidator,
    classifier: PageClassifier,
    events: EventDispatcher,
    proxy_health: Arc<ProxyHealth>,
}

impl<P: FetchProvider> RetryOrchestrator<P> {
    pub fn new(provider: Arc<P>) -> Self {
        let sessions = Arc::new(SessionStore::new(provider.clone()));
        Self {
            provider,
            sessions,
            validator: DestinationValidator::new(),
            classifier: PageClassifier::new(),
            events: EventDispatcher::new(),
            proxy_health: Arc::new(ProxyHealth::new()),
        }
    }

    /// Share a session store, e.g. one wired to the same event handlers.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore<P>>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_validator(mut self, validator: DestinationValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn sessions(&self) -> &Arc<SessionStore<P>> {
        &self.sessions
    }

    pub fn validator(&self) -> &DestinationValidator {
        &self.validator
    }

    /// Outcome counters for every proxy this orchestrator has routed through.
    pub fn proxy_health(&self) -> &Arc<ProxyHealth> {
        &self.proxy_health
    }

    pub async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult<P::Page>, FetchFailure> {
        self.run(req).await
    }

    /// Like [`fetch`](Self::fetch), abandoning the work when `cancel` fires.
    ///
    /// An in-flight provider call or backoff sleep is dropped; a context being
    /// created at that moment is never stored in the session store.
    pub async fn fetch_with_cancel(
        &self,
        req: &FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchResult<P::Page>, FetchFailure> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("fetch of {} cancelled", req.url());
                Err(FetchFailure::Cancelled)
            }
            result = self.run(req) => result,
        }
    }

    async fn run(&self, req: &FetchRequest) -> Result<FetchResult<P::Page>, FetchFailure> {
        let started = Instant::now();
        let url = match self.validator.validate(req.url()).await {
            Ok(url) => url,
            Err(rejection) => {
                self.emit_rejected(req.url(), &rejection);
                return Err(rejection.into());
            }
        };

        let policy = req.retry();
        let mut proxies = if req.proxies().is_empty() {
            ProxyRotation::new(req.profile().proxy())
        } else {
            ProxyRotation::new(req.proxies().iter().cloned())
        };
        if let Some(key) = req.session_key() {
            // keep an existing session on the proxy it rotated to
            if let Some(proxy) = self.sessions.proxy_for(key, req.profile()).await {
                proxies.resume_at(&proxy);
            }
        }
        let mut previous: Option<FailureKind> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let proxy = proxies.current().map(str::to_string);
            if let Some(proxy) = &proxy {
                self.proxy_health.record_use(proxy);
            }
            self.events.dispatch(FetchEvent::Attempt(AttemptEvent {
                url: url.to_string(),
                attempt,
                proxy: proxy.clone(),
                session: req.session_key().map(str::to_string),
                timestamp: Utc::now(),
            }));

            let outcome = match effective_profile(req.profile(), proxy.as_deref()) {
                Ok(profile) => self.attempt(req, &url, &profile).await,
                Err(failure) => Err(failure),
            };

            let failure = match outcome {
                Ok(page) => {
                    if let Some(proxy) = &proxy {
                        self.proxy_health.report_success(proxy);
                    }
                    return Ok(self.finish(req, &url, page, attempt, started, proxy));
                }
                Err(failure) => failure,
            };

            if let Some(proxy) = &proxy {
                self.proxy_health.report_failure(proxy);
            }
            self.events.dispatch(FetchEvent::AttemptFailed(AttemptFailedEvent {
                url: url.to_string(),
                attempt,
                kind: failure.kind(),
                reason: failure.to_string(),
                timestamp: Utc::now(),
            }));

            if !is_retryable(&failure, req.profile()) {
                return Err(failure);
            }
            if attempt >= policy.budget() {
                return Err(FetchFailure::ExhaustedRetries {
                    attempts: attempt,
                    last: Box::new(failure),
                });
            }

            let rotate = match failure {
                FetchFailure::Blocked(_) => true,
                FetchFailure::TransportError(_) => previous == Some(FailureKind::TransportError),
                _ => false,
            };
            let rotated_to = if rotate {
                proxies.rotate().map(str::to_string)
            } else {
                None
            };

            let mut wait = policy.delay_for(attempt);
            if matches!(failure, FetchFailure::ChallengeDetected(_)) {
                wait = wait.saturating_add(policy.challenge_settle());
            }
            self.events.dispatch(FetchEvent::Retry(RetryEvent {
                url: url.to_string(),
                attempt: attempt + 1,
                reason: failure.to_string(),
                scheduled_after: wait,
                rotated_to,
                timestamp: Utc::now(),
            }));

            previous = Some(failure.kind());
            tokio::time::sleep(wait).await;
        }
    }

    /// One provider round trip, classified.
    async fn attempt(
        &self,
        req: &FetchRequest,
        url: &Url,
        profile: &FetchProfile,
    ) -> Result<P::Page, FetchFailure> {
        let page = match req.session_key() {
            Some(key) => {
                let lease = self
                    .sessions
                    .lease_routed(key, req.profile(), profile, req.cookies())
                    .await?;
                self.bounded_fetch(lease.context(), url, profile).await?
            }
            None => {
                let context = self.provider.create_context(profile, req.cookies()).await?;
                let result = self.bounded_fetch(&context, url, profile).await;
                if let Err(err) = self.provider.close_context(&context).await {
                    log::warn!("failed to close transient context: {err}");
                }
                result?
            }
        };

        if page.final_url() != url {
            self.validator.validate_url(page.final_url()).await?;
        }

        if let Some(detection) = self.classifier.classify_page(&page) {
            log::debug!(
                "{} classified as {} via {:?}",
                page.final_url(),
                detection.signature,
                detection.matched_indicators
            );
            return Err(match detection.class {
                PageClass::Challenge => FetchFailure::ChallengeDetected(detection.reason()),
                PageClass::Blocked => FetchFailure::Blocked(detection.reason()),
            });
        }

        Ok(page)
    }

    async fn bounded_fetch(
        &self,
        context: &P::Context,
        url: &Url,
        profile: &FetchProfile,
    ) -> Result<P::Page, FetchFailure> {
        let limit = profile.timeout();
        match tokio::time::timeout(limit, self.provider.fetch(context, url, profile)).await {
            Ok(result) => result.map_err(FetchFailure::from),
            Err(_) => Err(FetchFailure::TimedOut(limit)),
        }
    }

    fn finish(
        &self,
        req: &FetchRequest,
        url: &Url,
        page: P::Page,
        attempts: u32,
        started: Instant,
        proxy: Option<String>,
    ) -> FetchResult<P::Page> {
        let extracted = (!req.selectors().is_empty())
            .then(|| extract::extract(&page, req.selectors().iter()));
        let elapsed = started.elapsed();

        self.events.dispatch(FetchEvent::Success(SuccessEvent {
            url: url.to_string(),
            final_url: page.final_url().to_string(),
            status: page.status_code(),
            attempts,
            latency: elapsed,
            timestamp: Utc::now(),
        }));

        FetchResult {
            status: page.status_code(),
            final_url: page.final_url().clone(),
            page,
            attempts,
            elapsed,
            extracted,
            proxy,
        }
    }

    fn emit_rejected(&self, url: &str, rejection: &DestinationRejection) {
        self.events.dispatch(FetchEvent::Rejected(RejectedEvent {
            url: url.to_string(),
            code: rejection.code(),
            reason: rejection.to_string(),
            timestamp: Utc::now(),
        }));
    }
}

/// `profile` routed through `proxy`, unchanged when it already is.
fn effective_profile(
    profile: &FetchProfile,
    proxy: Option<&str>,
) -> Result<FetchProfile, FetchFailure> {
    if proxy == profile.proxy() {
        return Ok(profile.clone());
    }
    profile
        .with_proxy(proxy.map(str::to_string))
        .map_err(|err| FetchFailure::TransportError(err.to_string()))
}

fn is_retryable(failure: &FetchFailure, profile: &FetchProfile) -> bool {
    match failure {
        FetchFailure::InvalidDestination(_) | FetchFailure::Cancelled => false,
        FetchFailure::ChallengeDetected(_) => profile.solve_challenge(),
        FetchFailure::ExhaustedRetries { .. } => false,
        FetchFailure::Blocked(_) | FetchFailure::TimedOut(_) | FetchFailure::TransportError(_) => {
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_retry_depends_on_profile() {
        let challenge = FetchFailure::ChallengeDetected("interstitial".into());
        assert!(!is_retryable(&challenge, &FetchProfile::standard()));
        assert!(is_retryable(&challenge, &FetchProfile::maximum()));
        assert!(!is_retryable(
            &FetchFailure::InvalidDestination(DestinationRejection::Empty),
            &FetchProfile::maximum()
        ));
    }

    #[test]
    fn effective_profile_swaps_proxy_only_when_needed() {
        let base = FetchProfile::standard();
        let same = effective_profile(&base, None).unwrap();
        assert_eq!(same, base);
        let proxied = effective_profile(&base, Some("http://203.0.113.5:3128")).unwrap();
        assert_eq!(proxied.proxy(), Some("http://203.0.113.5:3128"));
        assert!(matches!(
            effective_profile(&base, Some("::nonsense")),
            Err(FetchFailure::TransportError(_))
        ));
    }
}
