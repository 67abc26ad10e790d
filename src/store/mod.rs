//! Session store: owner of [`GatewayState`].
//!
//! Tracks which brokers hold a session and which one is active. Expiry is
//! checked lazily: every read re-validates `now < expires_at` and treats
//! expired sessions as absent, so no background timer is needed.
//!
//! Every mutation is applied to a copy of the state, written to [`Storage`]
//! and only then swapped in, all under one lock. A failed write leaves the
//! in-memory state untouched.

pub mod backend;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::constants::{STORAGE_KEY_ACTIVE, STORAGE_KEY_SESSIONS};
use crate::error::{GatewayError, Result};
use crate::types::Session;

pub use backend::{FileStorage, MemoryStorage, Storage};

/// Clock used for expiry checks.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Sessions by broker name plus the active broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayState {
    pub sessions: BTreeMap<String, Session>,
    pub active: Option<String>,
}

impl GatewayState {
    fn live_names(&self, now: DateTime<Utc>) -> impl Iterator<Item = &String> {
        self.sessions
            .iter()
            .filter(move |(_, s)| s.is_live(now))
            .map(|(name, _)| name)
    }

    fn is_live(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.sessions.get(name).is_some_and(|s| s.is_live(now))
    }

    fn live_active(&self, now: DateTime<Utc>) -> Option<&String> {
        self.active.as_ref().filter(|name| self.is_live(name, now))
    }
}

/// Persisted, lock-guarded [`GatewayState`].
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    state: Mutex<GatewayState>,
    clock: Clock,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Load persisted state from `storage`.
    ///
    /// Unreadable or malformed records are logged and replaced by empty
    /// state; loading never fails.
    pub fn load(storage: Arc<dyn Storage>) -> Self {
        let state = match read_state(storage.as_ref()) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %e, "discarding persisted broker sessions");
                GatewayState::default()
            }
        };
        tracing::debug!(
            sessions = state.sessions.len(),
            active = ?state.active,
            "loaded broker sessions"
        );
        Self {
            storage,
            state: Mutex::new(state),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replace the clock used for expiry checks.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Brokers with a live session, sorted by name.
    pub fn list_authenticated(&self) -> Vec<String> {
        let now = self.now();
        self.state.lock().live_names(now).cloned().collect()
    }

    /// The active broker, if it still has a live session.
    pub fn get_active(&self) -> Option<String> {
        let now = self.now();
        self.state.lock().live_active(now).cloned()
    }

    /// Live session for `name`.
    pub fn session(&self, name: &str) -> Option<Session> {
        let now = self.now();
        self.state
            .lock()
            .sessions
            .get(name)
            .filter(|s| s.is_live(now))
            .cloned()
    }

    /// The active broker and its live session.
    pub fn active_session(&self) -> Option<(String, Session)> {
        let now = self.now();
        let state = self.state.lock();
        let name = state.live_active(now)?;
        state.sessions.get(name).map(|s| (name.clone(), s.clone()))
    }

    pub fn is_authenticated(&self, name: &str) -> bool {
        let now = self.now();
        self.state.lock().is_live(name, now)
    }

    /// Copy of the raw state, expired sessions included.
    pub fn snapshot(&self) -> GatewayState {
        self.state.lock().clone()
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Make `name` the active broker.
    pub fn set_active(&self, name: &str) -> Result<()> {
        let now = self.now();
        self.mutate(|state| {
            if !state.is_live(name, now) {
                return Err(GatewayError::NotAuthenticated(name.to_owned()));
            }
            state.active = Some(name.to_owned());
            Ok(())
        })?;
        tracing::info!(broker = %name, "active broker changed");
        Ok(())
    }

    /// Insert or replace the session for `name`.
    ///
    /// `name` becomes active when no live broker is active.
    pub fn put_session(&self, name: &str, session: Session) -> Result<()> {
        let now = self.now();
        let activated = self.mutate(|state| {
            state.sessions.insert(name.to_owned(), session);
            if state.live_active(now).is_none() && state.is_live(name, now) {
                state.active = Some(name.to_owned());
                return Ok(true);
            }
            Ok(false)
        })?;
        tracing::info!(broker = %name, activated, "stored broker session");
        Ok(())
    }

    /// Drop the session for `name`, returning it.
    ///
    /// If `name` was active, the first remaining live broker (by name)
    /// becomes active, or none.
    pub fn logout(&self, name: &str) -> Result<Option<Session>> {
        let now = self.now();
        let removed = self.mutate(|state| {
            let removed = state.sessions.remove(name);
            if state.active.as_deref() == Some(name) {
                let next = state.live_names(now).next().cloned();
                state.active = next;
            }
            Ok(removed)
        })?;
        if removed.is_some() {
            tracing::info!(broker = %name, active = ?self.get_active(), "logged out");
        }
        Ok(removed)
    }

    /// Like [`logout`](Self::logout), but only while the stored session for
    /// `name` still carries `access_token`.
    ///
    /// Callers that read a session before an `.await` use this so a session
    /// stored in the meantime survives. Returns whether anything was removed.
    pub fn logout_if_token(&self, name: &str, access_token: &str) -> Result<bool> {
        let now = self.now();
        let removed = self.mutate(|state| {
            let matches = state
                .sessions
                .get(name)
                .is_some_and(|s| s.access_token == access_token);
            if !matches {
                return Ok(false);
            }
            state.sessions.remove(name);
            if state.active.as_deref() == Some(name) {
                let next = state.live_names(now).next().cloned();
                state.active = next;
            }
            Ok(true)
        })?;
        if removed {
            tracing::info!(broker = %name, active = ?self.get_active(), "logged out");
        } else {
            tracing::debug!(broker = %name, "session replaced since it was read; keeping it");
        }
        Ok(removed)
    }

    /// Drop every session and the active marker.
    ///
    /// The active marker goes first: if removing the sessions record then
    /// fails, memory and disk both hold the sessions with nothing active.
    pub fn logout_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.storage.remove(STORAGE_KEY_ACTIVE)?;
        state.active = None;
        self.storage.remove(STORAGE_KEY_SESSIONS)?;
        state.sessions.clear();
        tracing::info!("logged out of all brokers");
        Ok(())
    }

    /// Drop expired sessions. Persists only if something changed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.now();
        {
            let state = self.state.lock();
            if state.sessions.values().all(|s| s.is_live(now)) {
                return Ok(0);
            }
        }
        let purged = self.mutate(|state| {
            let before = state.sessions.len();
            state.sessions.retain(|_, s| s.is_live(now));
            if state.live_active(now).is_none() {
                state.active = None;
            }
            Ok(before - state.sessions.len())
        })?;
        tracing::debug!(purged, "purged expired sessions");
        Ok(purged)
    }

    /// Apply `f` to a copy of the state, persist it, then commit.
    fn mutate<T>(&self, f: impl FnOnce(&mut GatewayState) -> Result<T>) -> Result<T> {
        let mut guard = self.state.lock();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if next != *guard {
            write_state(self.storage.as_ref(), &next)?;
            *guard = next;
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn read_state(storage: &dyn Storage) -> Result<GatewayState> {
    let sessions: BTreeMap<String, Session> = match storage.read(STORAGE_KEY_SESSIONS)? {
        Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
            .map_err(|e| GatewayError::PersistenceCorrupt(format!("{STORAGE_KEY_SESSIONS}: {e}")))?,
        _ => BTreeMap::new(),
    };

    let active = storage
        .read(STORAGE_KEY_ACTIVE)?
        .map(|raw| raw.trim().to_owned())
        .filter(|name| !name.is_empty());

    let active = match active {
        Some(name) if !sessions.contains_key(&name) => {
            tracing::warn!(broker = %name, "persisted active broker has no session; ignoring");
            None
        }
        other => other,
    };

    Ok(GatewayState { sessions, active })
}

fn write_state(storage: &dyn Storage, state: &GatewayState) -> Result<()> {
    let sessions = serde_json::to_string(&state.sessions)?;
    storage.write(STORAGE_KEY_SESSIONS, &sessions)?;
    match &state.active {
        Some(name) => storage.write(STORAGE_KEY_ACTIVE, name),
        None => storage.remove(STORAGE_KEY_ACTIVE),
    }
}
