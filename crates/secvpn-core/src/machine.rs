//! Connection State Machine
//!
//! Single owner of the canonical [`ConnectionState`].
//!
//! ```text
//! Disconnected ──request_connect──▶ Connecting ──event 2──▶ Connected
//!      ▲                               │                      │
//!      │                    sync transport failure   request_disconnect
//!      │                               ▼                      ▼
//!      └──────────event 0────────── Disconnected ◀──── Disconnecting
//! ```
//!
//! # Concurrency
//!
//! State, the in-flight target and the subscriber list sit behind one
//! mutex. Every transition happens inside that lock and is enqueued to
//! all subscribers (in registration order) before the lock is released,
//! so a subscriber seeing state X knows no later transition was queued
//! ahead of it. Subscribers drain their own queue and may call back into
//! the machine freely.
//!
//! Transport commands are awaited outside the lock. Their real outcome
//! arrives later through [`ConnectionStateMachine::on_transport_event`].
//! No timeout is applied to the pending states.

use crate::normalizer::{NormalizedState, RawStateEvent, normalize};
use crate::servers::ServerParams;
use crate::session::TrafficMeter;
use crate::state::{ConnectionState, StateChange, now_ms};
use crate::transport::{Transport, TransportError, TransportEvents};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Controller errors surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("VPN already connecting or connected ({0})")]
    AlreadyConnectingOrConnected(ConnectionState),

    #[error("VPN not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("No server selected")]
    NoServerSelected,
}

impl ControllerError {
    /// Request rejected because of the current state; nothing changed
    pub fn is_invalid_transition(&self) -> bool {
        matches!(
            self,
            ControllerError::AlreadyConnectingOrConnected(_) | ControllerError::NotConnected
        )
    }
}

/// Receiving end of a state subscription
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<StateChange>,
}

impl Subscription {
    /// Wait for the next transition. `None` once the machine is dropped.
    pub async fn recv(&mut self) -> Option<StateChange> {
        self.rx.recv().await
    }

    /// Next queued transition without waiting
    pub fn try_recv(&mut self) -> Option<StateChange> {
        self.rx.try_recv().ok()
    }

    /// Drain everything queued so far
    pub fn drain(&mut self) -> Vec<StateChange> {
        let mut changes = Vec::new();
        while let Some(change) = self.try_recv() {
            changes.push(change);
        }
        changes
    }
}

/// State guarded by the machine's lock
struct Core {
    state: ConnectionState,
    target: Option<ServerParams>,
    disconnect_requested: bool,
    /// Bumped on every accepted command
    generation: u64,
    meter: TrafficMeter,
    subscribers: Vec<mpsc::UnboundedSender<StateChange>>,
}

impl Core {
    /// Apply a transition and enqueue it to subscribers.
    /// Returns `None` if `next` equals the current state.
    fn transition(&mut self, next: ConnectionState) -> Option<StateChange> {
        if self.state == next {
            return None;
        }

        // New tunnel, counters start over
        if self.state == ConnectionState::Disconnected {
            self.meter.reset();
        }

        let change = StateChange {
            previous: self.state,
            current: next,
            target: self.target.clone(),
            disconnect_requested: self.disconnect_requested,
            at_ms: now_ms(),
            counters: self.meter.snapshot(),
        };

        info!(from = %change.previous, to = %change.current, "VPN state changed");
        self.state = next;

        // A cycle ends at Disconnected
        if next == ConnectionState::Disconnected {
            self.disconnect_requested = false;
        }

        self.subscribers.retain(|tx| tx.send(change.clone()).is_ok());
        Some(change)
    }
}

/// The canonical VPN connection state machine
///
/// Constructed once by the host and shared as `Arc<ConnectionStateMachine>`.
pub struct ConnectionStateMachine {
    transport: Arc<dyn Transport>,
    core: Mutex<Core>,
}

impl ConnectionStateMachine {
    /// Create a machine in `Disconnected`
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_meter(transport, TrafficMeter::new())
    }

    /// Create a machine stamping counters from `meter` into each transition
    pub fn with_meter(transport: Arc<dyn Transport>, meter: TrafficMeter) -> Self {
        Self {
            transport,
            core: Mutex::new(Core {
                state: ConnectionState::Disconnected,
                target: None,
                disconnect_requested: false,
                generation: 0,
                meter,
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the canonical state
    pub fn current_state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Server of the last accepted connect request
    pub fn target(&self) -> Option<ServerParams> {
        self.lock().target.clone()
    }

    /// Byte counters fed by the transport adapter
    pub fn traffic_meter(&self) -> TrafficMeter {
        self.lock().meter.clone()
    }

    /// Register a subscriber. It receives every transition from now on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        Subscription { rx }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        let mut core = self.lock();
        core.subscribers.retain(|tx| !tx.is_closed());
        core.subscribers.len()
    }

    /// Drop every subscriber's sending half
    ///
    /// Subscriptions still deliver what was queued, then end.
    pub fn close_subscriptions(&self) {
        self.lock().subscribers.clear();
    }

    /// Ask the transport to connect to `params`
    ///
    /// Rejected with [`ControllerError::AlreadyConnectingOrConnected`] while
    /// `Connecting` or `Connected`. A synchronous transport failure reverts
    /// to `Disconnected` and is returned to the caller.
    pub async fn request_connect(&self, params: ServerParams) -> Result<(), ControllerError> {
        let generation = {
            let mut core = self.lock();
            if core.state.is_connecting_or_connected() {
                warn!(state = %core.state, "Connect rejected, already {}", core.state);
                return Err(ControllerError::AlreadyConnectingOrConnected(core.state));
            }

            info!(server = %params.server_id, "Connecting to {}", params.location);
            core.target = Some(params.clone());
            core.disconnect_requested = false;
            core.generation += 1;
            core.transition(ConnectionState::Connecting);
            core.generation
        };

        match self.transport.connect(&params).await {
            Ok(()) => {
                debug!(server = %params.server_id, "Connect command accepted by transport");
                Ok(())
            }
            Err(e) => {
                error!(server = %params.server_id, "VPN connect failed: {}", e);
                self.revert_from(ConnectionState::Connecting, generation);
                Err(ControllerError::Transport(e))
            }
        }
    }

    /// Ask the transport to disconnect
    ///
    /// Rejected with [`ControllerError::NotConnected`] while `Disconnected`.
    /// Calling this while `Connecting` is how an in-flight connect is aborted.
    pub async fn request_disconnect(&self) -> Result<(), ControllerError> {
        let generation = {
            let mut core = self.lock();
            if core.state == ConnectionState::Disconnected {
                warn!("Disconnect rejected, not connected");
                return Err(ControllerError::NotConnected);
            }

            info!(state = %core.state, "Disconnecting");
            core.disconnect_requested = true;
            core.generation += 1;
            core.transition(ConnectionState::Disconnecting);
            core.generation
        };

        match self.transport.disconnect().await {
            Ok(()) => {
                debug!("Disconnect command accepted by transport");
                Ok(())
            }
            Err(e) => {
                error!("VPN disconnect failed: {}", e);
                self.revert_from(ConnectionState::Disconnecting, generation);
                Err(ControllerError::Transport(e))
            }
        }
    }

    /// Fall back to `Disconnected` after a rejected command, unless a
    /// transport event or a newer command already moved the state on.
    fn revert_from(&self, pending: ConnectionState, generation: u64) {
        let mut core = self.lock();
        if core.state == pending && core.generation == generation {
            core.transition(ConnectionState::Disconnected);
        } else {
            debug!(state = %core.state, "State moved during command, not reverting");
        }
    }

    /// Feed a raw transport event
    ///
    /// Canonical values that differ from the current state are applied and
    /// announced. Duplicates and unknown values change nothing.
    pub fn on_transport_event(&self, raw: RawStateEvent) -> Option<StateChange> {
        match normalize(&raw) {
            NormalizedState::Canonical(next) => {
                let mut core = self.lock();
                let change = core.transition(next);
                if change.is_none() {
                    debug!(state = %next, "Duplicate transport state ignored");
                }
                change
            }
            NormalizedState::Unknown(value) => {
                warn!(raw = %value, "Unrecognized transport state");
                None
            }
        }
    }

    /// Force a local `Disconnected` transition without touching the transport
    ///
    /// Meant for externally layered timeouts; the machine never calls it.
    pub fn force_disconnected(&self) -> Option<StateChange> {
        let mut core = self.lock();
        warn!(state = %core.state, "Forcing local Disconnected");
        core.transition(ConnectionState::Disconnected)
    }

    /// Pump transport events into this machine until every sink is dropped
    ///
    /// The task only holds a weak reference, so it never keeps the machine alive.
    pub fn attach_events(self: &Arc<Self>, mut events: TransportEvents) -> JoinHandle<()> {
        let machine: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            while let Some(raw) = events.recv().await {
                let Some(machine) = machine.upgrade() else {
                    break;
                };
                machine.on_transport_event(raw);
            }
            debug!("Transport event stream closed");
        })
    }
}
