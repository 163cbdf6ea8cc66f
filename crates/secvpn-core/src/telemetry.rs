//! Session Telemetry Reporter
//!
//! Follows the state machine and keeps the session ledger:
//!
//! - into `Connected`: open a session (at most one at a time)
//! - into `Disconnected`: close it as `disconnected` if a disconnect was
//!   requested, `failed` otherwise, with the byte counters stamped on
//!   that transition
//!
//! Sessions are reported to the [`SessionStore`] when they open and again
//! when they close; the close report replaces the open one by id. When the
//! store is unreachable the latest copy is retained locally until the
//! caller takes it. Nothing is retried automatically and nothing is
//! raised to the UI.

use crate::machine::Subscription;
use crate::servers::ServerSelection;
use crate::session::{Session, SessionStats, SessionStatus};
use crate::state::{ConnectionState, StateChange};
use crate::store::SessionStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Ledger {
    active: Option<Session>,
    history: Vec<Session>,
    retained: Vec<Session>,
}

/// Session telemetry reporter
pub struct TelemetryReporter {
    ledger: Mutex<Ledger>,
    store: Arc<dyn SessionStore>,
    selection: ServerSelection,
}

impl TelemetryReporter {
    /// Create a reporter
    pub fn new(store: Arc<dyn SessionStore>, selection: ServerSelection) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            store,
            selection,
        }
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consume state changes until the machine goes away
    pub fn spawn(self: &Arc<Self>, mut subscription: Subscription) -> JoinHandle<()> {
        let reporter = self.clone();
        tokio::spawn(async move {
            while let Some(change) = subscription.recv().await {
                reporter.handle_change(&change).await;
            }
            debug!("Telemetry reporter stopped");
        })
    }

    /// Apply one state change to the ledger. Never fails.
    pub async fn handle_change(&self, change: &StateChange) {
        match change.current {
            ConnectionState::Connected => {
                if let Some(session) = self.open_session(change) {
                    self.report(session).await;
                }
            }
            ConnectionState::Disconnected => {
                if let Some(session) = self.close_session(change) {
                    self.report(session).await;
                }
            }
            ConnectionState::Connecting | ConnectionState::Disconnecting => {}
        }
    }

    fn open_session(&self, change: &StateChange) -> Option<Session> {
        let mut ledger = self.ledger();
        if let Some(ref active) = ledger.active {
            debug!(session = %active.id(), "Session already open");
            return None;
        }

        let server = change.target.clone().or_else(|| self.selection.current_params());
        let session = match server {
            Some(ref server) => Session::open(server, change.at_ms),
            None => Session::open_unknown(change.at_ms),
        };

        info!(
            session = %session.id(),
            server = %session.server_id(),
            "Session started ({})",
            session.server_location()
        );
        ledger.active = Some(session.clone());
        Some(session)
    }

    fn close_session(&self, change: &StateChange) -> Option<Session> {
        let mut ledger = self.ledger();
        let active = ledger.active.take()?;

        let status = if change.is_unexpected_drop() {
            SessionStatus::Failed
        } else {
            SessionStatus::Disconnected
        };
        let session = active.close(status, change.counters, change.at_ms);

        info!(
            session = %session.id(),
            status = ?session.status(),
            "Session ended after {}s",
            session.duration_secs()
        );
        ledger.history.push(session.clone());
        Some(session)
    }

    async fn report(&self, session: Session) {
        let result = self.store.report_session(&session).await;

        // Only the latest copy of a session is worth keeping
        let mut ledger = self.ledger();
        ledger.retained.retain(|s| s.id() != session.id());

        match result {
            Ok(()) => debug!(session = %session.id(), "Session reported"),
            Err(e) => {
                warn!(session = %session.id(), "Session report failed, keeping locally: {}", e);
                ledger.retained.push(session);
            }
        }
    }

    /// Currently open session
    pub fn active_session(&self) -> Option<Session> {
        self.ledger().active.clone()
    }

    /// Most recently closed session
    pub fn last_session(&self) -> Option<Session> {
        self.ledger().history.last().cloned()
    }

    /// Open session if any, otherwise the last closed one
    pub fn active_or_last_session(&self) -> Option<Session> {
        let ledger = self.ledger();
        ledger.active.clone().or_else(|| ledger.history.last().cloned())
    }

    /// Latest copies of sessions the store did not accept
    pub fn retained_sessions(&self) -> Vec<Session> {
        self.ledger().retained.clone()
    }

    /// Take ownership of retained sessions, e.g. for export or a manual resend
    pub fn take_retained_sessions(&self) -> Vec<Session> {
        std::mem::take(&mut self.ledger().retained)
    }

    /// Usage summary over every session closed by this reporter
    pub fn stats(&self) -> SessionStats {
        SessionStats::from_sessions(self.ledger().history.iter())
    }
}
