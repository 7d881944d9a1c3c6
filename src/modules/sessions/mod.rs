//! Session store.
//!
//! Maps session keys to live provider contexts. The map lock is only held to
//! find or insert a key's slot; creating, using and tearing down a context all
//! happen under that slot's async mutex, so different keys never wait on each
//! other. A slot only ever holds a fully created context.
//!
//! A session is matched on the profile its caller requested. The proxy the
//! context actually egresses through is kept next to it, so proxy rotation
//! replaces the context without making the session look reconfigured.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::FetchProfile;
use crate::external_deps::provider::{CookieMap, FetchProvider, ProviderError};
use crate::modules::events::{EventDispatcher, FetchEvent, SessionAction, SessionEvent};

struct Session<C> {
    profile: FetchProfile,
    proxy: Option<String>,
    context: Arc<C>,
    created_at: DateTime<Utc>,
    last_used: DateTime<Utc>,
    use_count: u64,
}

type Slot<C> = Arc<AsyncMutex<Option<Session<C>>>>;

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub key: String,
    pub profile: FetchProfile,
    pub proxy: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub use_count: u64,
}

/// Exclusive use of a session's context. The slot stays locked until dropped.
pub struct SessionLease<C> {
    key: String,
    context: Arc<C>,
    _guard: OwnedMutexGuard<Option<Session<C>>>,
}

impl<C> SessionLease<C> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }
}

/// Concurrency-safe cache of provider contexts keyed by session id.
pub struct SessionStore<P: FetchProvider> {
    provider: Arc<P>,
    slots: Mutex<HashMap<String, Slot<P::Context>>>,
    events: EventDispatcher,
}

impl<P: FetchProvider> SessionStore<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            slots: Mutex::new(HashMap::new()),
            events: EventDispatcher::new(),
        }
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    /// Context for `key`, created or replaced as needed.
    pub async fn get_or_create(
        &self,
        key: &str,
        profile: &FetchProfile,
        cookies: &CookieMap,
    ) -> Result<Arc<P::Context>, ProviderError> {
        let lease = self.lease(key, profile, cookies).await?;
        Ok(lease.context.clone())
    }

    /// Like [`get_or_create`](Self::get_or_create), but keeps the key locked
    /// until the returned lease is dropped.
    ///
    /// `cookies` only seed a newly created context.
    pub async fn lease(
        &self,
        key: &str,
        profile: &FetchProfile,
        cookies: &CookieMap,
    ) -> Result<SessionLease<P::Context>, ProviderError> {
        self.lease_routed(key, profile, profile, cookies).await
    }

    /// Lease for `requested`, whose context is built from `routed` (the same
    /// profile with the proxy chosen for this attempt). The context is reused
    /// while both the requested profile and the proxy stay the same.
    pub async fn lease_routed(
        &self,
        key: &str,
        requested: &FetchProfile,
        routed: &FetchProfile,
        cookies: &CookieMap,
    ) -> Result<SessionLease<P::Context>, ProviderError> {
        let slot = self.slot(key);
        let mut guard = slot.clone().lock_owned().await;
        let now = Utc::now();

        if let Some(session) = guard.as_mut().filter(|session| {
            session.profile == *requested && session.proxy.as_deref() == routed.proxy()
        }) {
            session.last_used = now;
            session.use_count += 1;
            let context = session.context.clone();
            self.emit(key, SessionAction::Reused);
            return Ok(SessionLease {
                key: key.to_string(),
                context,
                _guard: guard,
            });
        }

        let action = match guard.take() {
            Some(old) => {
                self.teardown(key, &old).await;
                SessionAction::Replaced
            }
            None => SessionAction::Created,
        };

        let context = match self.provider.create_context(routed, cookies).await {
            Ok(context) => Arc::new(context),
            Err(err) => {
                drop(guard);
                self.prune(key, &slot);
                return Err(err);
            }
        };
        *guard = Some(Session {
            profile: requested.clone(),
            proxy: routed.proxy().map(str::to_string),
            context: context.clone(),
            created_at: now,
            last_used: now,
            use_count: 1,
        });

        self.emit(key, action);
        Ok(SessionLease {
            key: key.to_string(),
            context,
            _guard: guard,
        })
    }

    /// Closes the session under `key`. Returns whether one existed.
    pub async fn close(&self, key: &str) -> bool {
        let Some(slot) = self.lock_slots().get(key).cloned() else {
            return false;
        };

        let mut guard = slot.lock().await;
        let closed = match guard.take() {
            Some(session) => {
                self.teardown(key, &session).await;
                true
            }
            None => false,
        };
        drop(guard);
        self.prune(key, &slot);
        closed
    }

    /// Closes every session, waiting for in-flight leases. Returns how many were closed.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<(String, Slot<P::Context>)> = self.lock_slots().drain().collect();
        let mut closed = 0;
        for (key, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(session) = guard.take() {
                self.teardown(&key, &session).await;
                closed += 1;
            }
        }
        closed
    }

    pub async fn info(&self, key: &str) -> Option<SessionInfo> {
        let slot = self.lock_slots().get(key).cloned()?;
        let guard = slot.lock().await;
        guard.as_ref().map(|session| SessionInfo {
            key: key.to_string(),
            profile: session.profile.clone(),
            proxy: session.proxy.clone(),
            created_at: session.created_at,
            last_used: session.last_used,
            use_count: session.use_count,
        })
    }

    /// Proxy of the session under `key`, if it was created for `requested`.
    pub async fn proxy_for(&self, key: &str, requested: &FetchProfile) -> Option<String> {
        let slot = self.lock_slots().get(key).cloned()?;
        let guard = slot.lock().await;
        guard
            .as_ref()
            .filter(|session| session.profile == *requested)
            .and_then(|session| session.proxy.clone())
    }

    /// The live context under `key`, without touching its usage stats.
    pub async fn context(&self, key: &str) -> Option<Arc<P::Context>> {
        let slot = self.lock_slots().get(key).cloned()?;
        let guard = slot.lock().await;
        guard.as_ref().map(|session| session.context.clone())
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot<P::Context>> = self.lock_slots().values().cloned().collect();
        let mut live = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                live += 1;
            }
        }
        live
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, Slot<P::Context>>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, key: &str) -> Slot<P::Context> {
        self.lock_slots()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Drops an empty slot nobody else is holding.
    fn prune(&self, key: &str, slot: &Slot<P::Context>) {
        let mut slots = self.lock_slots();
        let unused = slots
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && Arc::strong_count(slot) == 2);
        if unused && slot.try_lock().is_ok_and(|guard| guard.is_none()) {
            slots.remove(key);
        }
    }

    async fn teardown(&self, key: &str, session: &Session<P::Context>) {
        if let Err(err) = self.provider.close_context(&session.context).await {
            log::warn!("failed to close context for session {key}: {err}");
        }
        self.emit(key, SessionAction::Closed);
    }

    fn emit(&self, key: &str, action: SessionAction) {
        self.events.dispatch(FetchEvent::Session(SessionEvent {
            key: key.to_string(),
            action,
            timestamp: Utc::now(),
        }));
    }
}
