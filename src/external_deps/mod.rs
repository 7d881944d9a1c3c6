//! Integrations that rely on third-party engines.
//!
//! The [`provider`] module defines the capability boundary to whatever
//! actually performs the fetch, plus the bundled reqwest implementation.

pub mod provider;

pub use provider::ReqwestFetchProvider;
