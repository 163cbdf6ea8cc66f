//! SecVPN Core - VPN Connection State Controller
//!
//! Tracks one logical VPN session across an asynchronously reporting
//! native transport, reconciles it with user intent, and keeps session
//! telemetry consistent when transport events are late, duplicated or
//! missing altogether.
//!
//! # Architecture
//!
//! ```text
//!  ┌─────────────┐  raw events  ┌────────────┐    ┌──────────────────────┐
//!  │ Transport   │─────────────▶│ Normalizer │───▶│ ConnectionState-     │
//!  │ (OpenVPN,   │              └────────────┘    │ Machine              │
//!  │  sim, ...)  │◀───────── connect/disconnect ──│  state + subscribers │
//!  └─────────────┘                                └──────────┬───────────┘
//!                                                            │ StateChange
//!  ┌──────────────────┐  request_connect          ┌──────────┴───────────┐
//!  │ IntentReconciler │──────────────────────────▶│  UI  │  Telemetry    │
//!  │ (auto-connect)   │                           │      │  Reporter     │
//!  └──────────────────┘                           └──────┴───────┬───────┘
//!                                                                ▼
//!                                                          SessionStore
//! ```
//!
//! # Guarantees
//!
//! - Exactly one canonical [`ConnectionState`] at any time
//! - Subscribers are notified only on actual change, in registration order
//! - Unknown transport signals are logged, never applied
//! - Telemetry failures never reach the UI or the state machine
//!
//! # Not handled
//!
//! Pending states have no built-in timeout. A host that needs one spawns
//! [`spawn_pending_watchdog`] or sets `pending_timeout_secs`.

mod config;
mod controller;
mod machine;
mod normalizer;
mod reconciler;
mod servers;
mod session;
mod settings;
mod state;
mod store;
mod telemetry;
mod transport;
mod watchdog;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ConfigFormat, ControllerConfig};
pub use controller::VpnController;
pub use machine::{ConnectionStateMachine, ControllerError, Subscription};
pub use normalizer::{NormalizedState, RawStateEvent, normalize};
pub use reconciler::{AppLifecycle, IntentReconciler, ReconcileOutcome, SkipReason};
pub use servers::{ServerParams, ServerProfile, ServerSelection};
pub use session::{
    ByteCounters, Session, SessionId, SessionStats, SessionStatus, TrafficMeter,
};
pub use settings::{Settings, SettingsProvider, SharedSettings};
pub use state::{ConnectionState, StateChange};
pub use store::{MemorySessionStore, SessionStore, StoreError};
pub use telemetry::TelemetryReporter;
pub use transport::{
    Transport, TransportError, TransportEventSink, TransportEvents, event_channel,
};
pub use watchdog::spawn_pending_watchdog;
