//! Sequential batches with start-to-start pacing.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use super::failure::FetchFailure;
use super::orchestrator::RetryOrchestrator;
use super::request::{FetchRequest, FetchResult};
use super::retry::RetryPolicy;
use crate::config::FetchProfile;
use crate::external_deps::provider::FetchProvider;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("batch of {size} URLs exceeds the limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// Per-URL outcomes in input order.
#[derive(Debug)]
pub struct BatchResult<Pg> {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<Result<FetchResult<Pg>, FetchFailure>>,
}

impl<Pg> BatchResult<Pg> {
    fn from_results(results: Vec<Result<FetchResult<Pg>, FetchFailure>>) -> Self {
        let successful = results.iter().filter(|result| result.is_ok()).count();
        Self {
            total: results.len(),
            successful,
            failed: results.len() - successful,
            results,
        }
    }
}

/// Runs URLs one after another through a shared orchestrator.
pub struct BatchCoordinator<P: FetchProvider> {
    orchestrator: Arc<RetryOrchestrator<P>>,
    max_batch_size: usize,
    retry: RetryPolicy,
    proxies: Vec<String>,
}

impl<P: FetchProvider> BatchCoordinator<P> {
    pub fn new(orchestrator: Arc<RetryOrchestrator<P>>) -> Self {
        Self {
            orchestrator,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            retry: RetryPolicy::default(),
            proxies: Vec::new(),
        }
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_proxies<I, S>(mut self, proxies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.proxies = proxies.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Fetches every URL in order. Successive starts are at least `delay`
    /// apart; a failing URL is recorded and the batch moves on.
    pub async fn run_batch<S: AsRef<str>>(
        &self,
        urls: &[S],
        profile: &FetchProfile,
        delay: Duration,
    ) -> Result<BatchResult<P::Page>, BatchError> {
        if urls.len() > self.max_batch_size {
            return Err(BatchError::TooLarge {
                size: urls.len(),
                limit: self.max_batch_size,
            });
        }

        let mut results = Vec::with_capacity(urls.len());
        let mut last_start: Option<Instant> = None;

        for (index, url) in urls.iter().enumerate() {
            if let Some(previous) = last_start {
                // remaining gap; a huge delay saturates instead of overflowing Instant
                tokio::time::sleep(delay.saturating_sub(previous.elapsed())).await;
            }
            last_start = Some(Instant::now());

            let request = FetchRequest::new(url.as_ref(), profile.clone())
                .with_retry(self.retry.clone())
                .with_proxies(self.proxies.iter().cloned());
            let result = self.orchestrator.fetch(&request).await;
            if let Err(failure) = &result {
                log::warn!("batch item {index} ({}) failed: {failure}", url.as_ref());
            }
            results.push(result);
        }

        Ok(BatchResult::from_results(results))
    }
}
