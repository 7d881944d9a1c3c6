//! Flat, serialisable records returned by the facade.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use http::HeaderMap;
use serde::Serialize;

use crate::external_deps::provider::{CookieMap, PageHandle};
use crate::extract::ExtractedValue;
use crate::fetch::{FailureKind, FetchFailure, FetchResult};

/// RFC 3339 UTC timestamp with a `Z` suffix.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Result of one scrape operation. `error` excludes the content fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScrapeOutcome {
    pub url: String,
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    pub title: Option<String>,
    pub text: Option<String>,
    pub html: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selectors: Option<BTreeMap<String, ExtractedValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted: Option<BTreeMap<String, ExtractedValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookies: Option<CookieMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    pub timestamp: String,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl ScrapeOutcome {
    fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            status_code: None,
            final_url: None,
            title: None,
            text: None,
            html: None,
            headers: None,
            selectors: None,
            extracted: None,
            session_id: None,
            cookies: None,
            attempts: None,
            timestamp: timestamp(),
            error: None,
            error_kind: None,
        }
    }

    /// Outcome carrying only the failure.
    pub fn failed(url: &str, failure: &FetchFailure) -> Self {
        Self {
            error: Some(failure.to_string()),
            error_kind: Some(failure.kind()),
            ..Self::empty(url)
        }
    }

    /// Outcome for a call refused before any fetch.
    pub fn invalid_input(url: &str, error: &impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            error_kind: Some(FailureKind::InvalidInput),
            ..Self::empty(url)
        }
    }

    /// Status, final URL, title and attempt count from a successful fetch.
    pub fn succeeded<Pg: PageHandle>(url: &str, result: &FetchResult<Pg>) -> Self {
        Self {
            status_code: Some(result.status),
            final_url: Some(result.final_url.to_string()),
            title: crate::extract::page_title(&result.page),
            attempts: Some(result.attempts),
            ..Self::empty(url)
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Header map flattened to strings; repeated names are joined with `, `.
pub fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    flat
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemError {
    pub index: usize,
    pub url: String,
    pub error: String,
}

/// Result of a batch, `results[i]` belonging to the i-th input URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<ScrapeOutcome>,
    pub errors: Vec<BatchItemError>,
    pub timestamp: String,
}

impl BatchOutcome {
    pub fn from_results(results: Vec<ScrapeOutcome>) -> Self {
        let errors: Vec<BatchItemError> = results
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| {
                outcome.error.as_ref().map(|error| BatchItemError {
                    index,
                    url: outcome.url.clone(),
                    error: error.clone(),
                })
            })
            .collect();
        Self {
            total: results.len(),
            successful: results.len() - errors.len(),
            failed: errors.len(),
            results,
            errors,
            timestamp: timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn timestamps_are_utc_with_z() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'), "{ts}");
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn failed_outcome_has_no_content() {
        let outcome = ScrapeOutcome::failed(
            "https://example.com",
            &FetchFailure::Blocked("Forbidden (status 403)".into()),
        );
        assert!(!outcome.is_success());
        assert_eq!(outcome.status_code, None);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error_kind"], "blocked");
        assert!(json["text"].is_null());
        assert!(json.get("session_id").is_none());
    }

    #[test]
    fn joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-type", HeaderValue::from_static("text/html"));
        let flat = flatten_headers(&headers);
        assert_eq!(flat["set-cookie"], "a=1, b=2");
        assert_eq!(flat["content-type"], "text/html");
    }

    #[test]
    fn batch_counts_follow_results() {
        let ok = ScrapeOutcome::empty("https://a.example");
        let bad = ScrapeOutcome::failed("https://b.example", &FetchFailure::Cancelled);
        let batch = BatchOutcome::from_results(vec![ok, bad]);
        assert_eq!((batch.total, batch.successful, batch.failed), (2, 1, 1));
        assert_eq!(batch.errors[0].index, 1);

        let empty = BatchOutcome::from_results(Vec::new());
        assert_eq!((empty.total, empty.successful, empty.failed), (0, 0, 0));
    }
}
