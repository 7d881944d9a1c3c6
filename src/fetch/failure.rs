use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::external_deps::provider::ProviderError;
use crate::security::DestinationRejection;

/// Classified fetch failure.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FetchFailure {
    #[error("destination not allowed: {0}")]
    InvalidDestination(DestinationRejection),
    #[error("anti-bot challenge detected: {0}")]
    ChallengeDetected(String),
    #[error("request blocked: {0}")]
    Blocked(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("gave up after {attempts} attempts: {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<FetchFailure>,
    },
    #[error("cancelled")]
    Cancelled,
}

impl FetchFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchFailure::InvalidDestination(_) => FailureKind::InvalidDestination,
            FetchFailure::ChallengeDetected(_) => FailureKind::ChallengeDetected,
            FetchFailure::Blocked(_) => FailureKind::Blocked,
            FetchFailure::TimedOut(_) => FailureKind::TimedOut,
            FetchFailure::TransportError(_) => FailureKind::TransportError,
            FetchFailure::ExhaustedRetries { .. } => FailureKind::ExhaustedRetries,
            FetchFailure::Cancelled => FailureKind::Cancelled,
        }
    }

    /// Innermost classification, looking through `ExhaustedRetries`.
    pub fn root(&self) -> &FetchFailure {
        match self {
            FetchFailure::ExhaustedRetries { last, .. } => last.root(),
            other => other,
        }
    }
}

impl From<ProviderError> for FetchFailure {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout(after) => FetchFailure::TimedOut(after),
            ProviderError::Blocked(reason) => FetchFailure::Blocked(reason),
            ProviderError::Challenge(reason) => FetchFailure::ChallengeDetected(reason),
            ProviderError::Destination(rejection) => FetchFailure::InvalidDestination(rejection),
            ProviderError::Transport(reason) => FetchFailure::TransportError(reason),
            ProviderError::Configuration(reason) => {
                FetchFailure::TransportError(format!("provider configuration: {reason}"))
            }
        }
    }
}

impl From<DestinationRejection> for FetchFailure {
    fn from(rejection: DestinationRejection) -> Self {
        FetchFailure::InvalidDestination(rejection)
    }
}

/// Serialisable tag for [`FetchFailure`], plus `InvalidInput` for calls the
/// facade refuses before fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    InvalidDestination,
    ChallengeDetected,
    Blocked,
    TimedOut,
    TransportError,
    ExhaustedRetries,
    Cancelled,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::InvalidInput => "invalid_input",
            FailureKind::InvalidDestination => "invalid_destination",
            FailureKind::ChallengeDetected => "challenge_detected",
            FailureKind::Blocked => "blocked",
            FailureKind::TimedOut => "timed_out",
            FailureKind::TransportError => "transport_error",
            FailureKind::ExhaustedRetries => "exhausted_retries",
            FailureKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
