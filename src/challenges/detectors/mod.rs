//! Interstitial and block page detection.
//!
//! Matches fetched pages against known anti-bot signatures. Challenge
//! signatures are checked before block signatures, so a 403 carrying a
//! "Just a moment..." interstitial is reported as a challenge.

use http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::external_deps::provider::PageHandle;

/// Broad outcome of a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageClass {
    /// Interstitial that a capable provider might get past.
    Challenge,
    /// Access refused or rate limited.
    Blocked,
}

#[derive(Debug, Clone)]
struct Signature {
    id: &'static str,
    name: &'static str,
    class: PageClass,
    /// Only consulted on 4xx/5xx responses.
    error_status_only: bool,
    patterns: Vec<Regex>,
}

impl Signature {
    fn new(
        id: &'static str,
        name: &'static str,
        class: PageClass,
        error_status_only: bool,
        raw_patterns: &[&str],
    ) -> Self {
        Self {
            id,
            name,
            class,
            error_status_only,
            patterns: raw_patterns.iter().map(|pattern| build_regex(pattern)).collect(),
        }
    }

    fn matches(&self, body: &str) -> Vec<String> {
        self.patterns
            .iter()
            .filter(|regex| regex.is_match(body))
            .map(|regex| regex.as_str().to_string())
            .collect()
    }
}

static KNOWN_SIGNATURES: Lazy<Vec<Signature>> = Lazy::new(|| {
    vec![
        Signature::new(
            "cf_interstitial",
            "Cloudflare interstitial",
            PageClass::Challenge,
            false,
            &[
                r#"<title>\s*Just a moment\.\.\.\s*</title>"#,
                r"Checking (?:if the site connection is secure|your browser before accessing)",
                r"window\._cf_chl_opt\s*=",
                r#"<form[^>]*id="challenge-form""#,
                r#"/cdn-cgi/challenge-platform/"#,
                r#"<div[^>]*class="cf-browser-verification"#,
            ],
        ),
        Signature::new(
            "cf_turnstile",
            "Cloudflare Turnstile",
            PageClass::Challenge,
            true,
            &[
                r#"class="cf-turnstile""#,
                r#"src="https://challenges\.cloudflare\.com/turnstile/v0/api\.js"#,
            ],
        ),
        Signature::new(
            "generic_captcha_wall",
            "Captcha wall",
            PageClass::Challenge,
            true,
            &[
                r#"class="g-recaptcha""#,
                r#"class="h-captcha""#,
                r"<title>[^<]*(?:captcha|are you a robot|human verification)[^<]*</title>",
            ],
        ),
        Signature::new(
            "cf_rate_limit",
            "Cloudflare rate limit",
            PageClass::Blocked,
            false,
            &[
                r#"<span[^>]*class="cf-error-code">1015<"#,
                r"You are being rate limited",
            ],
        ),
        Signature::new(
            "cf_access_denied",
            "Cloudflare access denied",
            PageClass::Blocked,
            false,
            &[
                r#"<span[^>]*class="cf-error-code">10(?:06|07|08|10|12|20)<"#,
                r"The owner of this website has banned your access",
                r"has banned you temporarily",
            ],
        ),
        Signature::new(
            "generic_block",
            "Generic block page",
            PageClass::Blocked,
            true,
            &[
                r"<title>[^<]*(?:access denied|forbidden|blocked|too many requests|rate limit)[^<]*</title>",
                r"<h1>[^<]*(?:access denied|too many requests)[^<]*</h1>",
            ],
        ),
    ]
});

/// A positive classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub class: PageClass,
    pub signature: &'static str,
    pub name: &'static str,
    pub status: u16,
    pub matched_indicators: Vec<String>,
}

impl Detection {
    /// One-line reason used in failure messages.
    pub fn reason(&self) -> String {
        format!("{} (status {})", self.name, self.status)
    }
}

/// Classifies fetched pages as challenges, blocks, or ordinary content.
#[derive(Debug, Clone, Default)]
pub struct PageClassifier;

impl PageClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify_page<P: PageHandle + ?Sized>(&self, page: &P) -> Option<Detection> {
        self.classify(page.status_code(), page.headers(), page.content())
    }

    pub fn classify(&self, status: u16, headers: &HeaderMap, body: &str) -> Option<Detection> {
        let error_status = status >= 400;

        for class in [PageClass::Challenge, PageClass::Blocked] {
            for signature in KNOWN_SIGNATURES.iter().filter(|s| s.class == class) {
                if signature.error_status_only && !error_status {
                    continue;
                }
                let matched = signature.matches(body);
                if !matched.is_empty() {
                    return Some(Detection {
                        class,
                        signature: signature.id,
                        name: signature.name,
                        status,
                        matched_indicators: matched,
                    });
                }
            }
        }

        if matches!(status, 403 | 429) {
            let mut matched = vec![format!("status {status}")];
            if let Some(server) = headers.get(http::header::SERVER).and_then(|v| v.to_str().ok()) {
                matched.push(format!("server {server}"));
            }
            return Some(Detection {
                class: PageClass::Blocked,
                signature: if status == 429 { "http_429" } else { "http_403" },
                name: if status == 429 {
                    "Too many requests"
                } else {
                    "Forbidden"
                },
                status,
                matched_indicators: matched,
            });
        }

        None
    }
}

fn build_regex(pattern: &str) -> Regex {
    regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .dot_matches_new_line(true)
        .build()
        .unwrap_or_else(|err| panic!("invalid detection regex `{}`: {}", pattern, err))
}
