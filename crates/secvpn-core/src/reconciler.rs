//! Intent Reconciler
//!
//! Decides on auto-connect without user action. Triggers are process
//! startup and the app returning to the foreground. Settings are read
//! fresh on every trigger.
//!
//! Redundant connects are not tracked here: the state machine's
//! `AlreadyConnectingOrConnected` rejection is the only guard.

use crate::machine::{ConnectionStateMachine, ControllerError};
use crate::servers::ServerSelection;
use crate::settings::SettingsProvider;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Host application lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AppLifecycle {
    /// In the foreground
    #[default]
    Active,
    /// Transitioning, e.g. a system dialog on top
    Inactive,
    /// In the background
    Background,
}

impl AppLifecycle {
    /// Not in the foreground
    pub fn is_away(&self) -> bool {
        matches!(self, AppLifecycle::Inactive | AppLifecycle::Background)
    }
}

/// Why no connect was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Lifecycle change was not a background-to-foreground transition
    NotForeground,
    AutoConnectDisabled,
    AlreadyConnectingOrConnected,
    NoServerSelected,
}

/// Result of evaluating one trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A connect request was accepted by the state machine
    Requested,
    /// Nothing to do
    Skipped(SkipReason),
    /// The connect request failed at the transport
    Failed(ControllerError),
}

/// Auto-connect policy
pub struct IntentReconciler {
    machine: Arc<ConnectionStateMachine>,
    settings: Arc<dyn SettingsProvider>,
    selection: ServerSelection,
    lifecycle: Mutex<AppLifecycle>,
}

impl IntentReconciler {
    /// Create a reconciler; the app is assumed to start in the foreground
    pub fn new(
        machine: Arc<ConnectionStateMachine>,
        settings: Arc<dyn SettingsProvider>,
        selection: ServerSelection,
    ) -> Self {
        Self {
            machine,
            settings,
            selection,
            lifecycle: Mutex::new(AppLifecycle::Active),
        }
    }

    /// Last lifecycle state reported by the host
    pub fn lifecycle(&self) -> AppLifecycle {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Process startup trigger
    pub async fn on_startup(&self) -> ReconcileOutcome {
        debug!("Startup trigger");
        self.reconcile().await
    }

    /// Lifecycle change from the host. Only `Inactive|Background → Active` triggers.
    pub async fn on_app_state_change(&self, next: AppLifecycle) -> ReconcileOutcome {
        let previous = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *lifecycle, next)
        };

        if previous.is_away() && next == AppLifecycle::Active {
            debug!("App came to the foreground");
            self.reconcile().await
        } else {
            ReconcileOutcome::Skipped(SkipReason::NotForeground)
        }
    }

    /// Evaluate the auto-connect policy now
    pub async fn reconcile(&self) -> ReconcileOutcome {
        if !self.settings.settings().auto_connect {
            return ReconcileOutcome::Skipped(SkipReason::AutoConnectDisabled);
        }

        let state = self.machine.current_state();
        if state.is_connecting_or_connected() {
            debug!(state = %state, "Auto-connect not needed");
            return ReconcileOutcome::Skipped(SkipReason::AlreadyConnectingOrConnected);
        }

        let Some(params) = self.selection.current_params() else {
            warn!("Auto-connect enabled but no server selected");
            return ReconcileOutcome::Skipped(SkipReason::NoServerSelected);
        };

        info!(server = %params.server_id, "Auto-connect: connecting");
        match self.machine.request_connect(params).await {
            Ok(()) => ReconcileOutcome::Requested,
            Err(ControllerError::AlreadyConnectingOrConnected(_)) => {
                ReconcileOutcome::Skipped(SkipReason::AlreadyConnectingOrConnected)
            }
            Err(e) => {
                warn!("Auto-connect failed: {}", e);
                ReconcileOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerConfig;
    use crate::normalizer::RawStateEvent;
    use crate::settings::{Settings, SharedSettings};
    use crate::state::ConnectionState;
    use crate::testing::{MockTransport, mock_machine};
    use crate::transport::TransportError;
    use std::sync::atomic::Ordering;

    type Setup = (
        IntentReconciler,
        Arc<ConnectionStateMachine>,
        Arc<MockTransport>,
        SharedSettings,
    );

    fn setup(auto_connect: bool) -> Setup {
        let (machine, transport) = mock_machine();
        let settings = SharedSettings::new(Settings { auto_connect, kill_switch: false });
        let config = ControllerConfig::default_config();
        let selection = ServerSelection::new(config.servers, config.selected_server);
        let reconciler =
            IntentReconciler::new(machine.clone(), Arc::new(settings.clone()), selection);
        (reconciler, machine, transport, settings)
    }

    #[tokio::test]
    async fn test_startup_connects_when_enabled() {
        let (reconciler, machine, transport, _) = setup(true);

        assert_eq!(reconciler.on_startup().await, ReconcileOutcome::Requested);
        assert_eq!(machine.current_state(), ConnectionState::Connecting);
        assert_eq!(machine.target().unwrap().server_id, "de-1");
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_does_nothing() {
        let (reconciler, machine, transport, _) = setup(false);

        assert_eq!(
            reconciler.on_startup().await,
            ReconcileOutcome::Skipped(SkipReason::AutoConnectDisabled)
        );
        assert_eq!(machine.current_state(), ConnectionState::Disconnected);
        assert_eq!(transport.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_foreground_connects_once() {
        let (reconciler, machine, transport, _) = setup(true);

        // Rapid background/foreground flapping while still Connecting
        for _ in 0..5 {
            reconciler.on_app_state_change(AppLifecycle::Background).await;
            reconciler.on_app_state_change(AppLifecycle::Active).await;
        }

        assert_eq!(transport.connect_calls(), 1);
        assert_eq!(machine.current_state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_only_foreground_transition_triggers() {
        let (reconciler, _, transport, _) = setup(true);

        // Active → Active is not a foreground transition
        assert_eq!(
            reconciler.on_app_state_change(AppLifecycle::Active).await,
            ReconcileOutcome::Skipped(SkipReason::NotForeground)
        );
        assert_eq!(
            reconciler.on_app_state_change(AppLifecycle::Inactive).await,
            ReconcileOutcome::Skipped(SkipReason::NotForeground)
        );
        assert_eq!(reconciler.lifecycle(), AppLifecycle::Inactive);
        assert_eq!(
            reconciler.on_app_state_change(AppLifecycle::Active).await,
            ReconcileOutcome::Requested
        );
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_settings_read_per_trigger() {
        let (reconciler, _, transport, settings) = setup(false);

        reconciler.on_app_state_change(AppLifecycle::Background).await;
        assert_eq!(
            reconciler.on_app_state_change(AppLifecycle::Active).await,
            ReconcileOutcome::Skipped(SkipReason::AutoConnectDisabled)
        );

        settings.set_auto_connect(true);
        reconciler.on_app_state_change(AppLifecycle::Background).await;
        assert_eq!(
            reconciler.on_app_state_change(AppLifecycle::Active).await,
            ReconcileOutcome::Requested
        );
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_reconnects_after_drop() {
        let (reconciler, machine, transport, _) = setup(true);

        reconciler.on_startup().await;
        machine.on_transport_event(RawStateEvent::Code(2));
        assert_eq!(
            reconciler.reconcile().await,
            ReconcileOutcome::Skipped(SkipReason::AlreadyConnectingOrConnected)
        );

        machine.on_transport_event(RawStateEvent::Code(0));
        assert_eq!(reconciler.reconcile().await, ReconcileOutcome::Requested);
        assert_eq!(transport.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_reported() {
        let (reconciler, machine, transport, _) = setup(true);
        transport.fail_connect.store(true, Ordering::SeqCst);

        assert_eq!(
            reconciler.on_startup().await,
            ReconcileOutcome::Failed(ControllerError::Transport(TransportError::PermissionDenied))
        );
        assert_eq!(machine.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_no_server_selected() {
        let (machine, _) = mock_machine();
        let settings = SharedSettings::new(Settings { auto_connect: true, kill_switch: false });
        let selection = ServerSelection::new(ControllerConfig::default_config().servers, None);
        let reconciler = IntentReconciler::new(machine.clone(), Arc::new(settings), selection);

        assert_eq!(
            reconciler.on_startup().await,
            ReconcileOutcome::Skipped(SkipReason::NoServerSelected)
        );
        assert_eq!(machine.current_state(), ConnectionState::Disconnected);
    }
}
