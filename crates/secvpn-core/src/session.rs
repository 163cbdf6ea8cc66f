//! VPN Sessions
//!
//! One [`Session`] covers one connect-to-disconnect interval. Sessions
//! are opened and closed only by the telemetry reporter; once closed
//! they are never modified again.

use crate::servers::ServerParams;
use crate::state::now_ms;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new random id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Still open
    Connected,
    /// Closed after a user/host disconnect request
    Disconnected,
    /// Tunnel dropped without being asked to
    Failed,
}

/// Byte counters observed on the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ByteCounters {
    pub uploaded: u64,
    pub downloaded: u64,
}

/// Last observed tunnel byte counters
///
/// Written by the transport adapter. Counters are cumulative for the
/// current tunnel; the state machine zeroes them when a new cycle leaves
/// `Disconnected` and stamps a snapshot into every transition.
#[derive(Debug, Clone, Default)]
pub struct TrafficMeter {
    uploaded: Arc<AtomicU64>,
    downloaded: Arc<AtomicU64>,
}

impl TrafficMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest cumulative counters
    pub fn record(&self, uploaded: u64, downloaded: u64) {
        self.uploaded.store(uploaded, Ordering::Relaxed);
        self.downloaded.store(downloaded, Ordering::Relaxed);
    }

    /// Current counters
    pub fn snapshot(&self) -> ByteCounters {
        ByteCounters {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
        }
    }

    /// Zero the counters for a new tunnel
    pub fn reset(&self) {
        self.record(0, 0);
    }
}

/// One connected interval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    server_id: String,
    server_location: String,
    started_at_ms: u64,
    ended_at_ms: Option<u64>,
    bytes_uploaded: u64,
    bytes_downloaded: u64,
    status: SessionStatus,
}

impl Session {
    /// Open a session against `server`, starting at `started_at_ms`
    pub(crate) fn open(server: &ServerParams, started_at_ms: u64) -> Self {
        Self {
            id: SessionId::new(),
            server_id: server.server_id.clone(),
            server_location: server.location.clone(),
            started_at_ms,
            ended_at_ms: None,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            status: SessionStatus::Connected,
        }
    }

    /// Open a session whose server is not known
    pub(crate) fn open_unknown(started_at_ms: u64) -> Self {
        Self {
            id: SessionId::new(),
            server_id: "unknown".to_string(),
            server_location: "Unknown".to_string(),
            started_at_ms,
            ended_at_ms: None,
            bytes_uploaded: 0,
            bytes_downloaded: 0,
            status: SessionStatus::Connected,
        }
    }

    /// Close the session. The returned value is final.
    pub(crate) fn close(
        mut self,
        status: SessionStatus,
        counters: ByteCounters,
        ended_at_ms: u64,
    ) -> Self {
        self.ended_at_ms = Some(ended_at_ms.max(self.started_at_ms));
        self.status = status;
        self.bytes_uploaded = counters.uploaded;
        self.bytes_downloaded = counters.downloaded;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn server_location(&self) -> &str {
        &self.server_location
    }

    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    /// `None` while the session is active
    pub fn ended_at_ms(&self) -> Option<u64> {
        self.ended_at_ms
    }

    pub fn bytes_uploaded(&self) -> u64 {
        self.bytes_uploaded
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Check if the session is still open
    pub fn is_active(&self) -> bool {
        self.ended_at_ms.is_none()
    }

    /// Duration in whole seconds; open sessions are measured up to now
    pub fn duration_secs(&self) -> u64 {
        let end = self.ended_at_ms.unwrap_or_else(now_ms);
        end.saturating_sub(self.started_at_ms) / 1000
    }
}

/// Aggregate usage over closed sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_sessions: u64,
    pub total_duration_secs: u64,
    pub total_bytes_uploaded: u64,
    pub total_bytes_downloaded: u64,
    pub average_duration_secs: u64,
}

impl SessionStats {
    /// Summarize a set of sessions
    pub fn from_sessions<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Self {
        let mut stats = Self::default();
        for session in sessions {
            stats.total_sessions += 1;
            stats.total_duration_secs += session.duration_secs();
            stats.total_bytes_uploaded += session.bytes_uploaded;
            stats.total_bytes_downloaded += session.bytes_downloaded;
        }
        if stats.total_sessions > 0 {
            stats.average_duration_secs = stats.total_duration_secs / stats.total_sessions;
        }
        stats
    }

    /// Format as human-readable string
    pub fn format(&self) -> String {
        format!(
            "Sessions: {} | Time: {}s (avg {}s) | TX: {:.2}MB | RX: {:.2}MB",
            self.total_sessions,
            self.total_duration_secs,
            self.average_duration_secs,
            self.total_bytes_uploaded as f64 / (1024.0 * 1024.0),
            self.total_bytes_downloaded as f64 / (1024.0 * 1024.0),
        )
    }
}
