//! Session Context: the caller's bearer credential and namespace grant.
//!
//! The context is shared by every request path. Each change of identity
//! bumps a generation counter so that a `401` observed by a request issued
//! under an older identity cannot clear a newer one.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// The authenticated caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub bearer_token: Option<String>,
    pub authorized_namespaces: BTreeSet<String>,
    pub is_super_admin: bool,
}

impl Session {
    /// A session holding only a token; namespaces arrive with the profile.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            bearer_token: Some(token.into()),
            ..Default::default()
        }
    }

    pub fn grant(mut self, namespace: impl Into<String>) -> Self {
        self.authorized_namespaces.insert(namespace.into());
        self
    }

    pub fn super_admin(mut self) -> Self {
        self.is_super_admin = true;
        self
    }

    /// Whether a request scoped to `namespace` may leave the process.
    pub fn allows(&self, namespace: &str) -> bool {
        self.is_super_admin || self.authorized_namespaces.contains(namespace)
    }
}

/// Lifecycle notifications published to every subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Anonymous,
    LoggedIn { generation: u64 },
    LoggedOut { generation: u64 },
    /// A 401 dropped the session.
    Expired { generation: u64 },
}

/// What a request captured about the session when it was issued.
#[derive(Debug, Clone)]
pub struct SessionTicket {
    pub session: Option<Session>,
    pub generation: u64,
}

impl SessionTicket {
    pub fn token(&self) -> Option<&str> {
        self.session.as_ref().and_then(|s| s.bearer_token.as_deref())
    }

    /// Anonymous callers hold no namespaces and are never super-admins.
    pub fn allows(&self, namespace: &str) -> bool {
        self.session.as_ref().is_some_and(|s| s.allows(namespace))
    }
}

#[derive(Debug)]
struct SessionState {
    session: Option<Session>,
    generation: u64,
}

#[derive(Debug)]
struct SessionInner {
    state: RwLock<SessionState>,
    events: watch::Sender<SessionEvent>,
}

/// Process-wide holder of the current [`Session`].
#[derive(Debug, Clone)]
pub struct SessionContext {
    inner: Arc<SessionInner>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    /// An anonymous context.
    pub fn new() -> Self {
        let (events, _) = watch::channel(SessionEvent::Anonymous);
        Self {
            inner: Arc::new(SessionInner {
                state: RwLock::new(SessionState {
                    session: None,
                    generation: 0,
                }),
                events,
            }),
        }
    }

    pub fn with_session(session: Session) -> Self {
        let ctx = Self::new();
        ctx.install(session);
        ctx
    }

    /// Replace the current session (login). Returns the new generation.
    pub fn install(&self, session: Session) -> u64 {
        let generation = {
            let mut state = self.write();
            state.generation += 1;
            state.session = Some(session);
            state.generation
        };
        tracing::info!(generation, "Session established");
        self.inner.events.send_replace(SessionEvent::LoggedIn { generation });
        generation
    }

    /// Apply a freshly fetched profile to the current session without
    /// changing its identity.
    pub fn apply_profile(&self, namespaces: BTreeSet<String>, is_super_admin: bool) -> bool {
        let mut state = self.write();
        match state.session.as_mut() {
            Some(session) => {
                tracing::debug!(
                    namespaces = namespaces.len(),
                    is_super_admin,
                    "Session profile applied"
                );
                session.authorized_namespaces = namespaces;
                session.is_super_admin = is_super_admin;
                true
            }
            None => false,
        }
    }

    /// Drop the session (logout). Returns whether one was present.
    pub fn clear(&self) -> bool {
        let (had_session, generation) = {
            let mut state = self.write();
            let had = state.session.take().is_some();
            if had {
                state.generation += 1;
            }
            (had, state.generation)
        };
        if had_session {
            tracing::info!(generation, "Session cleared");
            self.inner.events.send_replace(SessionEvent::LoggedOut { generation });
        }
        had_session
    }

    /// Drop the session because a request issued under `generation` came
    /// back 401. Only the first report for a generation has any effect.
    pub fn expire(&self, generation: u64) -> bool {
        let new_generation = {
            let mut state = self.write();
            if state.generation != generation || state.session.is_none() {
                return false;
            }
            state.session = None;
            state.generation += 1;
            state.generation
        };
        tracing::warn!(generation, "Session expired (401); re-authentication required");
        self.inner
            .events
            .send_replace(SessionEvent::Expired { generation: new_generation });
        true
    }

    pub fn current(&self) -> Option<Session> {
        self.read().session.clone()
    }

    pub fn ticket(&self) -> SessionTicket {
        let state = self.read();
        SessionTicket {
            session: state.session.clone(),
            generation: state.generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn is_authenticated(&self) -> bool {
        self.read()
            .session
            .as_ref()
            .is_some_and(|s| s.bearer_token.is_some())
    }

    /// Listen for login/logout/expiry.
    pub fn subscribe(&self) -> watch::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
