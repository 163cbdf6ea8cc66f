//! Canonical Connection State
//!
//! The four states the controller exposes, plus the change record
//! delivered to subscribers on every transition.

use crate::servers::ServerParams;
use crate::session::ByteCounters;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Canonical VPN connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No tunnel
    #[default]
    Disconnected,
    /// Connect command issued, waiting for the transport
    Connecting,
    /// Tunnel is up
    Connected,
    /// Disconnect command issued, waiting for the transport
    Disconnecting,
}

impl ConnectionState {
    /// All canonical states, in transport code order
    pub fn all() -> &'static [ConnectionState] {
        &[
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnecting,
        ]
    }

    /// Check if the tunnel is usable
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Check if a command is in flight
    pub fn is_pending(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Disconnecting)
    }

    /// Connecting or Connected; a connect request is redundant
    pub fn is_connecting_or_connected(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }

    /// Upper-case label used by the native transport layer
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnecting => "DISCONNECTING",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A single canonical transition, as seen by subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    /// State before the transition
    pub previous: ConnectionState,
    /// State after the transition
    pub current: ConnectionState,
    /// Server of the connect command in flight or last accepted, if any
    pub target: Option<ServerParams>,
    /// Whether `request_disconnect` was called since the last connect
    pub disconnect_requested: bool,
    /// Wall-clock time of the transition (unix millis)
    pub at_ms: u64,
    /// Tunnel byte counters observed at the transition
    pub counters: ByteCounters,
}

impl StateChange {
    /// Transition into `Disconnected` that nobody asked for
    pub fn is_unexpected_drop(&self) -> bool {
        self.current == ConnectionState::Disconnected
            && self.previous != ConnectionState::Disconnected
            && !self.disconnect_requested
    }
}

/// Current wall-clock time in unix milliseconds
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
