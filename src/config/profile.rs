//! Immutable fetch profiles.
//!
//! A [`FetchProfile`] enumerates every behavioural switch handed to the
//! provider. Profiles are never mutated: overrides go through
//! [`FetchProfile::to_builder`] and produce a new value, which is what the
//! session store compares when deciding whether a cached context is reusable.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Shortest accepted per-attempt timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
/// Longest accepted per-attempt timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Element state the provider waits for when a wait selector is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitState {
    Attached,
    Detached,
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Randomised pause range applied by providers between page interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelayRange {
    #[serde(with = "duration_ms")]
    pub min: Duration,
    #[serde(with = "duration_ms")]
    pub max: Duration,
}

impl DelayRange {
    /// Whole milliseconds, so a range survives serialisation unchanged.
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error(
        "timeout must be between {min}ms and {max}ms, got {0}ms",
        min = MIN_TIMEOUT.as_millis(),
        max = MAX_TIMEOUT.as_millis()
    )]
    TimeoutOutOfRange(u128),
    #[error("random delay range is inverted ({min}ms > {max}ms)")]
    InvertedDelay { min: u128, max: u128 },
    #[error("wait_selector_state requires a wait_selector")]
    WaitStateWithoutSelector,
    #[error("viewport dimensions must be non-zero")]
    EmptyViewport,
    #[error("invalid proxy url '{0}'")]
    InvalidProxy(String),
    #[error("unknown profile preset '{0}' (expected minimal, standard, maximum or no-js)")]
    UnknownPreset(String),
}

/// Named presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfilePreset {
    Minimal,
    Standard,
    Maximum,
    NoJs,
}

impl ProfilePreset {
    pub const ALL: [ProfilePreset; 4] = [
        ProfilePreset::Minimal,
        ProfilePreset::Standard,
        ProfilePreset::Maximum,
        ProfilePreset::NoJs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ProfilePreset::Minimal => "minimal",
            ProfilePreset::Standard => "standard",
            ProfilePreset::Maximum => "maximum",
            ProfilePreset::NoJs => "no-js",
        }
    }

    pub fn profile(self) -> FetchProfile {
        self.builder()
            .build()
            .unwrap_or_else(|err| panic!("preset {} is inconsistent: {err}", self.name()))
    }

    fn builder(self) -> FetchProfileBuilder {
        match self {
            ProfilePreset::Minimal => FetchProfileBuilder {
                humanize: false,
                os_randomize: false,
                block_webrtc: false,
                allow_webgl: false,
                google_search: false,
                block_images: true,
                block_trackers: false,
                disable_resources: true,
                network_idle: false,
                load_dom: false,
                timeout: Duration::from_secs(15),
                random_delay: DelayRange::from_millis(100, 500),
                ..FetchProfileBuilder::standard()
            },
            ProfilePreset::Standard => FetchProfileBuilder::standard(),
            ProfilePreset::Maximum => FetchProfileBuilder {
                solve_challenge: true,
                geoip: true,
                use_browser_pool: true,
                wait_selector: Some("body".into()),
                wait_selector_state: Some(WaitState::Visible),
                timeout: Duration::from_secs(60),
                random_delay: DelayRange::from_millis(2_000, 5_000),
                timezone: "America/New_York".into(),
                ..FetchProfileBuilder::standard()
            },
            ProfilePreset::NoJs => FetchProfileBuilder {
                humanize: false,
                os_randomize: false,
                block_webrtc: false,
                allow_webgl: false,
                google_search: false,
                block_images: true,
                block_ads: false,
                block_trackers: false,
                network_idle: false,
                load_dom: false,
                timeout: Duration::from_secs(15),
                enable_js: false,
                random_delay: DelayRange::from_millis(100, 300),
                ..FetchProfileBuilder::standard()
            },
        }
    }
}

impl fmt::Display for ProfilePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProfilePreset {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimal" => Ok(ProfilePreset::Minimal),
            "standard" => Ok(ProfilePreset::Standard),
            "maximum" => Ok(ProfilePreset::Maximum),
            "no-js" | "no_js" | "nojs" => Ok(ProfilePreset::NoJs),
            _ => Err(ProfileError::UnknownPreset(s.to_string())),
        }
    }
}

/// Fully specified, immutable provider profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FetchProfileBuilder")]
pub struct FetchProfile {
    headless: bool,
    solve_challenge: bool,
    humanize: bool,
    #[serde(with = "duration_ms")]
    humanize_duration: Duration,
    geoip: bool,
    os_randomize: bool,
    block_webrtc: bool,
    allow_webgl: bool,
    google_search: bool,
    block_images: bool,
    block_ads: bool,
    block_trackers: bool,
    disable_resources: bool,
    network_idle: bool,
    load_dom: bool,
    wait_selector: Option<String>,
    wait_selector_state: Option<WaitState>,
    #[serde(with = "duration_ms")]
    timeout: Duration,
    proxy: Option<String>,
    enable_js: bool,
    randomize_user_agent: bool,
    use_browser_pool: bool,
    random_delay: DelayRange,
    viewport: Viewport,
    timezone: String,
    locale: String,
    accept_language: String,
    extra_headers: BTreeMap<String, String>,
}

impl FetchProfile {
    pub fn builder() -> FetchProfileBuilder {
        FetchProfileBuilder::standard()
    }

    pub fn preset(preset: ProfilePreset) -> Self {
        preset.profile()
    }

    pub fn minimal() -> Self {
        ProfilePreset::Minimal.profile()
    }

    pub fn standard() -> Self {
        ProfilePreset::Standard.profile()
    }

    pub fn maximum() -> Self {
        ProfilePreset::Maximum.profile()
    }

    pub fn no_js() -> Self {
        ProfilePreset::NoJs.profile()
    }

    /// Start a builder seeded with this profile's values.
    pub fn to_builder(&self) -> FetchProfileBuilder {
        FetchProfileBuilder {
            headless: self.headless,
            solve_challenge: self.solve_challenge,
            humanize: self.humanize,
            humanize_duration: self.humanize_duration,
            geoip: self.geoip,
            os_randomize: self.os_randomize,
            block_webrtc: self.block_webrtc,
            allow_webgl: self.allow_webgl,
            google_search: self.google_search,
            block_images: self.block_images,
            block_ads: self.block_ads,
            block_trackers: self.block_trackers,
            disable_resources: self.disable_resources,
            network_idle: self.network_idle,
            load_dom: self.load_dom,
            wait_selector: self.wait_selector.clone(),
            wait_selector_state: self.wait_selector_state,
            timeout: self.timeout,
            proxy: self.proxy.clone(),
            enable_js: self.enable_js,
            randomize_user_agent: self.randomize_user_agent,
            use_browser_pool: self.use_browser_pool,
            random_delay: self.random_delay,
            viewport: self.viewport,
            timezone: self.timezone.clone(),
            locale: self.locale.clone(),
            accept_language: self.accept_language.clone(),
            extra_headers: self.extra_headers.clone(),
        }
    }

    /// Same profile routed through `proxy`.
    pub fn with_proxy(&self, proxy: Option<String>) -> Result<Self, ProfileError> {
        let mut builder = self.to_builder();
        builder.proxy = proxy;
        builder.build()
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    pub fn solve_challenge(&self) -> bool {
        self.solve_challenge
    }

    pub fn humanize(&self) -> bool {
        self.humanize
    }

    pub fn humanize_duration(&self) -> Duration {
        self.humanize_duration
    }

    pub fn geoip(&self) -> bool {
        self.geoip
    }

    pub fn os_randomize(&self) -> bool {
        self.os_randomize
    }

    pub fn block_webrtc(&self) -> bool {
        self.block_webrtc
    }

    pub fn allow_webgl(&self) -> bool {
        self.allow_webgl
    }

    pub fn google_search(&self) -> bool {
        self.google_search
    }

    pub fn block_images(&self) -> bool {
        self.block_images
    }

    pub fn block_ads(&self) -> bool {
        self.block_ads
    }

    pub fn block_trackers(&self) -> bool {
        self.block_trackers
    }

    pub fn disable_resources(&self) -> bool {
        self.disable_resources
    }

    pub fn network_idle(&self) -> bool {
        self.network_idle
    }

    pub fn load_dom(&self) -> bool {
        self.load_dom
    }

    pub fn wait_selector(&self) -> Option<&str> {
        self.wait_selector.as_deref()
    }

    pub fn wait_selector_state(&self) -> Option<WaitState> {
        self.wait_selector_state
    }

    /// Upper bound for a single attempt.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    pub fn enable_js(&self) -> bool {
        self.enable_js
    }

    pub fn randomize_user_agent(&self) -> bool {
        self.randomize_user_agent
    }

    pub fn use_browser_pool(&self) -> bool {
        self.use_browser_pool
    }

    pub fn random_delay(&self) -> DelayRange {
        self.random_delay
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn accept_language(&self) -> &str {
        &self.accept_language
    }

    pub fn extra_headers(&self) -> &BTreeMap<String, String> {
        &self.extra_headers
    }
}

impl Default for FetchProfile {
    fn default() -> Self {
        FetchProfile::standard()
    }
}

/// Mutable staging area for a [`FetchProfile`].
///
/// Missing fields fall back to the `standard` preset when deserialising.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchProfileBuilder {
    pub headless: bool,
    pub solve_challenge: bool,
    pub humanize: bool,
    #[serde(with = "duration_ms")]
    pub humanize_duration: Duration,
    pub geoip: bool,
    pub os_randomize: bool,
    pub block_webrtc: bool,
    pub allow_webgl: bool,
    pub google_search: bool,
    pub block_images: bool,
    pub block_ads: bool,
    pub block_trackers: bool,
    pub disable_resources: bool,
    pub network_idle: bool,
    pub load_dom: bool,
    pub wait_selector: Option<String>,
    pub wait_selector_state: Option<WaitState>,
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub enable_js: bool,
    pub randomize_user_agent: bool,
    pub use_browser_pool: bool,
    pub random_delay: DelayRange,
    pub viewport: Viewport,
    pub timezone: String,
    pub locale: String,
    pub accept_language: String,
    pub extra_headers: BTreeMap<String, String>,
}

impl FetchProfileBuilder {
    fn standard() -> Self {
        Self {
            headless: true,
            solve_challenge: false,
            humanize: true,
            humanize_duration: Duration::from_millis(1500),
            geoip: false,
            os_randomize: true,
            block_webrtc: true,
            allow_webgl: true,
            google_search: true,
            block_images: false,
            block_ads: true,
            block_trackers: true,
            disable_resources: false,
            network_idle: true,
            load_dom: true,
            wait_selector: None,
            wait_selector_state: None,
            timeout: Duration::from_secs(30),
            proxy: None,
            enable_js: true,
            randomize_user_agent: true,
            use_browser_pool: false,
            random_delay: DelayRange::from_millis(500, 2_000),
            viewport: Viewport::default(),
            timezone: "UTC".into(),
            locale: "en-US".into(),
            accept_language: DEFAULT_ACCEPT_LANGUAGE.into(),
            extra_headers: BTreeMap::new(),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout_ms(self, millis: u64) -> Self {
        self.timeout(Duration::from_millis(millis))
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn solve_challenge(mut self, enabled: bool) -> Self {
        self.solve_challenge = enabled;
        self
    }

    pub fn network_idle(mut self, enabled: bool) -> Self {
        self.network_idle = enabled;
        self
    }

    pub fn load_dom(mut self, enabled: bool) -> Self {
        self.load_dom = enabled;
        self
    }

    pub fn wait_for(mut self, selector: impl Into<String>, state: WaitState) -> Self {
        self.wait_selector = Some(selector.into());
        self.wait_selector_state = Some(state);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Result<FetchProfile, ProfileError> {
        if self.timeout < MIN_TIMEOUT || self.timeout > MAX_TIMEOUT {
            return Err(ProfileError::TimeoutOutOfRange(self.timeout.as_millis()));
        }
        if self.random_delay.min > self.random_delay.max {
            return Err(ProfileError::InvertedDelay {
                min: self.random_delay.min.as_millis(),
                max: self.random_delay.max.as_millis(),
            });
        }
        if self.wait_selector_state.is_some() && self.wait_selector.is_none() {
            return Err(ProfileError::WaitStateWithoutSelector);
        }
        if self.viewport.width == 0 || self.viewport.height == 0 {
            return Err(ProfileError::EmptyViewport);
        }
        let proxy = match self.proxy {
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => {
                let parsed =
                    Url::parse(raw.trim()).map_err(|_| ProfileError::InvalidProxy(raw.clone()))?;
                if !matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks5h")
                    || parsed.host_str().is_none()
                {
                    return Err(ProfileError::InvalidProxy(raw));
                }
                Some(raw.trim().to_string())
            }
            None => None,
        };

        Ok(FetchProfile {
            headless: self.headless,
            solve_challenge: self.solve_challenge,
            humanize: self.humanize,
            humanize_duration: self.humanize_duration,
            geoip: self.geoip,
            os_randomize: self.os_randomize,
            block_webrtc: self.block_webrtc,
            allow_webgl: self.allow_webgl,
            google_search: self.google_search,
            block_images: self.block_images,
            block_ads: self.block_ads,
            block_trackers: self.block_trackers,
            disable_resources: self.disable_resources,
            network_idle: self.network_idle,
            load_dom: self.load_dom,
            wait_selector: self.wait_selector,
            wait_selector_state: self.wait_selector_state,
            timeout: self.timeout,
            proxy,
            enable_js: self.enable_js,
            randomize_user_agent: self.randomize_user_agent,
            use_browser_pool: self.use_browser_pool,
            random_delay: self.random_delay,
            viewport: self.viewport,
            timezone: self.timezone,
            locale: self.locale,
            accept_language: self.accept_language,
            extra_headers: self.extra_headers,
        })
    }
}

impl Default for FetchProfileBuilder {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<FetchProfileBuilder> for FetchProfile {
    type Error = ProfileError;

    fn try_from(builder: FetchProfileBuilder) -> Result<Self, Self::Error> {
        builder.build()
    }
}

/// Serialises durations as whole milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_profile_round_trips_through_json() {
        let profile = FetchProfile::standard();
        let json = serde_json::to_string(&profile).unwrap();
        let back: FetchProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(profile, back);
    }

    #[test]
    fn every_preset_builds_and_round_trips() {
        for preset in ProfilePreset::ALL {
            let profile = preset.profile();
            let value = serde_json::to_value(&profile).unwrap();
            let back: FetchProfile = serde_json::from_value(value).unwrap();
            assert_eq!(profile, back, "preset {preset}");
        }
    }

    #[test]
    fn preset_delays_are_whole_milliseconds() {
        let delay = FetchProfile::minimal().random_delay();
        assert_eq!(delay.min, Duration::from_millis(100));
        assert_eq!(delay.max, Duration::from_millis(500));
        assert_eq!(FetchProfile::no_js().random_delay().min, Duration::from_millis(100));

        let json = serde_json::to_value(FetchProfile::no_js()).unwrap();
        assert_eq!(json["random_delay"], serde_json::json!({"min": 100, "max": 300}));
    }

    #[test]
    fn presets_differ_where_expected() {
        assert!(FetchProfile::maximum().solve_challenge());
        assert!(!FetchProfile::standard().solve_challenge());
        assert!(!FetchProfile::no_js().enable_js());
        assert_eq!(FetchProfile::minimal().timeout(), Duration::from_secs(15));
        assert_eq!(FetchProfile::maximum().timeout(), Duration::from_secs(60));
        assert_eq!(FetchProfile::maximum().wait_selector(), Some("body"));
    }

    #[test]
    fn parses_preset_names_case_insensitively() {
        assert_eq!("STANDARD".parse::<ProfilePreset>(), Ok(ProfilePreset::Standard));
        assert_eq!("no_js".parse::<ProfilePreset>(), Ok(ProfilePreset::NoJs));
        assert!(matches!(
            "stealthy".parse::<ProfilePreset>(),
            Err(ProfileError::UnknownPreset(_))
        ));
    }

    #[test]
    fn rejects_out_of_range_timeouts() {
        let err = FetchProfile::builder().timeout_ms(999).build().unwrap_err();
        assert_eq!(err, ProfileError::TimeoutOutOfRange(999));
        assert_eq!(
            err.to_string(),
            "timeout must be between 1000ms and 300000ms, got 999ms"
        );
        assert!(FetchProfile::builder().timeout_ms(300_001).build().is_err());
        assert!(FetchProfile::builder().timeout_ms(300_000).build().is_ok());
    }

    #[test]
    fn deserialisation_enforces_invariants() {
        let result = serde_json::from_str::<FetchProfile>(r#"{"timeout": 10}"#);
        assert!(result.is_err());

        let partial: FetchProfile = serde_json::from_str(r#"{"solve_challenge": true}"#).unwrap();
        assert!(partial.solve_challenge());
        assert_eq!(partial.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn overrides_produce_a_new_value() {
        let base = FetchProfile::standard();
        let proxied = base
            .with_proxy(Some("http://10.1.1.1:3128".into()))
            .unwrap();
        assert_ne!(base, proxied);
        assert_eq!(proxied.proxy(), Some("http://10.1.1.1:3128"));
        assert_eq!(base.proxy(), None);
        assert!(base.with_proxy(Some("not a proxy".into())).is_err());
    }
}
