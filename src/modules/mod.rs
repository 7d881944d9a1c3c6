//! Cross-cutting services module
//!
//! Session caching, proxy rotation and event dispatch shared by the fetch
//! layer.

pub mod events;
pub mod proxy;
pub mod sessions;

// Re-export commonly used types
pub use events::{
    AttemptEvent, AttemptFailedEvent, EventDispatcher, EventHandler, FetchEvent, LoggingHandler,
    RejectedEvent, RetryEvent, SessionAction, SessionEvent, SuccessEvent,
};
pub use proxy::{ProxyHealth, ProxyHealthReport, ProxyRotation, ProxyStats};
pub use sessions::{SessionInfo, SessionLease, SessionStore};
