//! Transport Event Normalizer
//!
//! Native VPN plugins report state as small integers on some platforms
//! and as numeric strings on others. Everything is folded into
//! [`ConnectionState`] here.
//!
//! | Raw        | Canonical       |
//! |------------|-----------------|
//! | `0` / "0"  | `Disconnected`  |
//! | `1` / "1"  | `Connecting`    |
//! | `2` / "2"  | `Connected`     |
//! | `3` / "3"  | `Disconnecting` |
//!
//! Anything else is passed through as [`NormalizedState::Unknown`] so it
//! can be logged. It is a defensive passthrough, not a fifth state.

use crate::state::ConnectionState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw state signal as emitted by the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStateEvent {
    /// Numeric code
    Code(i64),
    /// String payload
    Text(String),
}

impl From<i64> for RawStateEvent {
    fn from(code: i64) -> Self {
        RawStateEvent::Code(code)
    }
}

impl From<&str> for RawStateEvent {
    fn from(text: &str) -> Self {
        RawStateEvent::Text(text.to_string())
    }
}

impl From<String> for RawStateEvent {
    fn from(text: String) -> Self {
        RawStateEvent::Text(text)
    }
}

impl fmt::Display for RawStateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RawStateEvent::Code(code) => write!(f, "{}", code),
            RawStateEvent::Text(text) => f.write_str(text),
        }
    }
}

/// Result of normalizing a raw event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedState {
    /// One of the four canonical states
    Canonical(ConnectionState),
    /// Unrecognized signal, kept verbatim for diagnostics
    Unknown(String),
}

impl NormalizedState {
    /// Canonical state, if any
    pub fn canonical(&self) -> Option<ConnectionState> {
        match self {
            NormalizedState::Canonical(state) => Some(*state),
            NormalizedState::Unknown(_) => None,
        }
    }
}

/// Map a raw transport signal to a canonical state
pub fn normalize(raw: &RawStateEvent) -> NormalizedState {
    let code = match raw {
        RawStateEvent::Code(code) => Some(*code),
        RawStateEvent::Text(text) => match text.as_str() {
            "0" => Some(0),
            "1" => Some(1),
            "2" => Some(2),
            "3" => Some(3),
            _ => None,
        },
    };

    match code {
        Some(0) => NormalizedState::Canonical(ConnectionState::Disconnected),
        Some(1) => NormalizedState::Canonical(ConnectionState::Connecting),
        Some(2) => NormalizedState::Canonical(ConnectionState::Connected),
        Some(3) => NormalizedState::Canonical(ConnectionState::Disconnecting),
        _ => NormalizedState::Unknown(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_codes() {
        assert_eq!(
            normalize(&RawStateEvent::Code(0)).canonical(),
            Some(ConnectionState::Disconnected)
        );
        assert_eq!(
            normalize(&RawStateEvent::Code(2)).canonical(),
            Some(ConnectionState::Connected)
        );
    }

    #[test]
    fn test_string_codes() {
        assert_eq!(
            normalize(&"1".into()).canonical(),
            Some(ConnectionState::Connecting)
        );
        assert_eq!(
            normalize(&"3".into()).canonical(),
            Some(ConnectionState::Disconnecting)
        );
    }

    #[test]
    fn test_unknown_passthrough() {
        assert_eq!(
            normalize(&"UNKNOWN_FOO".into()),
            NormalizedState::Unknown("UNKNOWN_FOO".to_string())
        );
        assert_eq!(
            normalize(&RawStateEvent::Code(7)),
            NormalizedState::Unknown("7".to_string())
        );
        // Labels are not codes
        assert!(normalize(&"CONNECTED".into()).canonical().is_none());
        assert!(normalize(&" 2".into()).canonical().is_none());
    }

    #[test]
    fn test_raw_event_from_json() {
        let code: RawStateEvent = serde_json::from_str("2").unwrap();
        let text: RawStateEvent = serde_json::from_str("\"2\"").unwrap();
        assert_eq!(normalize(&code), normalize(&text));
    }
}
