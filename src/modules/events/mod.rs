//! Event system for fetch orchestration.
//!
//! Every attempt classification, retry decision and session lifecycle change
//! is dispatched as a [`FetchEvent`] to registered handlers.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::fetch::failure::FailureKind;

#[derive(Debug, Clone)]
pub struct AttemptEvent {
    pub url: String,
    pub attempt: u32,
    pub proxy: Option<String>,
    pub session: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptFailedEvent {
    pub url: String,
    pub attempt: u32,
    pub kind: FailureKind,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub url: String,
    /// Attempt number about to start.
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    /// Set when the retry moves to another proxy.
    pub rotated_to: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SuccessEvent {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub attempts: u32,
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RejectedEvent {
    pub url: String,
    pub code: &'static str,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionAction {
    Created,
    Reused,
    Replaced,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub key: String,
    pub action: SessionAction,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum FetchEvent {
    Attempt(AttemptEvent),
    AttemptFailed(AttemptFailedEvent),
    Retry(RetryEvent),
    Success(SuccessEvent),
    Rejected(RejectedEvent),
    Session(SessionEvent),
}

impl FetchEvent {
    /// Level [`LoggingHandler`] writes this event at.
    pub fn level(&self) -> log::Level {
        match self {
            FetchEvent::Attempt(_) | FetchEvent::Session(_) => log::Level::Debug,
            FetchEvent::Retry(_) | FetchEvent::Success(_) => log::Level::Info,
            FetchEvent::AttemptFailed(_) | FetchEvent::Rejected(_) => log::Level::Warn,
        }
    }
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &FetchEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Dispatcher with a [`LoggingHandler`] registered.
    pub fn with_logging() -> Self {
        Self::with_logging_at(log::LevelFilter::Trace)
    }

    /// Dispatcher whose [`LoggingHandler`] drops events above `max_level`.
    pub fn with_logging_at(max_level: log::LevelFilter) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler::new(max_level)));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn dispatch(&self, event: FetchEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug, Clone, Copy)]
pub struct LoggingHandler {
    max_level: log::LevelFilter,
}

impl LoggingHandler {
    pub fn new(max_level: log::LevelFilter) -> Self {
        Self { max_level }
    }

    pub fn max_level(&self) -> log::LevelFilter {
        self.max_level
    }

    pub fn logs(&self, event: &FetchEvent) -> bool {
        event.level() <= self.max_level
    }
}

impl Default for LoggingHandler {
    fn default() -> Self {
        Self::new(log::LevelFilter::Trace)
    }
}

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &FetchEvent) {
        if !self.logs(event) {
            return;
        }
        match event {
            FetchEvent::Attempt(attempt) => {
                log::debug!(
                    "event=attempt url={} attempt={} proxy={} session={}",
                    attempt.url,
                    attempt.attempt,
                    attempt.proxy.as_deref().unwrap_or("direct"),
                    attempt.session.as_deref().unwrap_or("-")
                );
            }
            FetchEvent::AttemptFailed(failed) => {
                log::warn!(
                    "event=attempt_failed url={} attempt={} kind={} reason=\"{}\"",
                    failed.url,
                    failed.attempt,
                    failed.kind,
                    failed.reason
                );
            }
            FetchEvent::Retry(retry) => {
                log::info!(
                    "event=retry url={} attempt={} after={:.2}s proxy={} reason=\"{}\"",
                    retry.url,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.rotated_to.as_deref().unwrap_or("unchanged"),
                    retry.reason
                );
            }
            FetchEvent::Success(success) => {
                log::info!(
                    "event=success url={} final_url={} status={} attempts={} latency={:.2}s",
                    success.url,
                    success.final_url,
                    success.status,
                    success.attempts,
                    success.latency.as_secs_f64()
                );
            }
            FetchEvent::Rejected(rejected) => {
                log::warn!(
                    "event=rejected url={} code={} reason=\"{}\"",
                    rejected.url,
                    rejected.code,
                    rejected.reason
                );
            }
            FetchEvent::Session(session) => {
                log::debug!("event=session key={} action={:?}", session.key, session.action);
            }
        }
    }
}
