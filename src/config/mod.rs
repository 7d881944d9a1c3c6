//! Settings and fetch profiles.
//!
//! - [`Settings`]: environment/JSON runtime settings
//! - [`FetchProfile`]: immutable per-request behaviour, built from presets

pub mod profile;
pub mod settings;

pub use profile::{
    DelayRange, FetchProfile, FetchProfileBuilder, ProfileError, ProfilePreset, Viewport,
    WaitState, MAX_TIMEOUT, MIN_TIMEOUT,
};
pub use settings::{ConfigError, Settings};
