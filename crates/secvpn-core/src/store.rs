//! Session Persistence
//!
//! [`SessionStore`] is the backend the reporter hands closed sessions to.
//! It may be remote and unreachable at any time.

use crate::session::Session;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

/// Persistence collaborator for session records
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Record a session. Reporting the same id twice replaces the earlier record.
    async fn report_session(&self, session: &Session) -> Result<(), StoreError>;

    /// Open session if any, otherwise the most recently started one
    async fn active_or_last_session(&self) -> Result<Option<Session>, StoreError>;
}

/// Store errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Session backend unavailable: {0}")]
    Unavailable(String),

    #[error("Session rejected: {0}")]
    Rejected(String),
}

/// In-process session store
///
/// Can be switched offline to behave like an unreachable backend.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<Vec<Session>>,
    online: AtomicBool,
}

impl MemorySessionStore {
    /// Create an empty, reachable store
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulate backend availability
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    /// Check if the store accepts requests
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// All stored sessions, oldest first
    pub async fn sessions(&self) -> Vec<Session> {
        self.sessions.read().await.clone()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store offline".into()))
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn report_session(&self, session: &Session) -> Result<(), StoreError> {
        self.check_online()?;

        let mut sessions = self.sessions.write().await;
        match sessions.iter_mut().find(|s| s.id() == session.id()) {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        debug!(session = %session.id(), "Session stored");
        Ok(())
    }

    async fn active_or_last_session(&self) -> Result<Option<Session>, StoreError> {
        self.check_online()?;

        let sessions = self.sessions.read().await;
        let active = sessions.iter().rev().find(|s| s.is_active());
        let last = sessions.iter().max_by_key(|s| s.started_at_ms());
        Ok(active.or(last).cloned())
    }
}
