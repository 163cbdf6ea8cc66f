//! VPN Controller
//!
//! Wires the state machine, intent reconciler, telemetry reporter and
//! optional watchdog into one explicitly constructed object owned by the
//! host's composition root.
//!
//! # Usage
//!
//! ```rust,ignore
//! let (sink, events) = secvpn_core::event_channel();
//! let transport = Arc::new(MyTransport::new(sink));
//! let controller = VpnController::new(&config, transport, events, store, settings);
//!
//! controller.on_startup().await;           // auto-connect, if enabled
//! let mut updates = controller.subscribe(); // feed the UI
//! controller.disconnect().await?;
//! controller.shutdown().await;              // flush telemetry
//! ```

use crate::config::ControllerConfig;
use crate::machine::{ConnectionStateMachine, ControllerError, Subscription};
use crate::reconciler::{AppLifecycle, IntentReconciler, ReconcileOutcome};
use crate::servers::ServerSelection;
use crate::settings::SettingsProvider;
use crate::state::ConnectionState;
use crate::store::SessionStore;
use crate::session::TrafficMeter;
use crate::telemetry::TelemetryReporter;
use crate::transport::{Transport, TransportEvents};
use crate::watchdog::spawn_pending_watchdog;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The assembled VPN connection controller
///
/// Must be created inside a tokio runtime. Dropping the controller aborts
/// its background tasks; [`VpnController::shutdown`] lets telemetry finish.
pub struct VpnController {
    machine: Arc<ConnectionStateMachine>,
    reconciler: IntentReconciler,
    telemetry: Arc<TelemetryReporter>,
    selection: ServerSelection,
    telemetry_task: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
}

impl VpnController {
    /// Build and start the controller
    pub fn new(
        config: &ControllerConfig,
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        store: Arc<dyn SessionStore>,
        settings: Arc<dyn SettingsProvider>,
    ) -> Self {
        let selection =
            ServerSelection::new(config.servers.clone(), config.selected_server.clone());
        let machine = Arc::new(ConnectionStateMachine::new(transport));

        let telemetry = Arc::new(TelemetryReporter::new(store, selection.clone()));
        let telemetry_task = Some(telemetry.spawn(machine.subscribe()));
        let mut tasks = vec![machine.attach_events(events)];

        if let Some(timeout) = config.pending_timeout() {
            tasks.push(spawn_pending_watchdog(&machine, timeout));
        }

        let reconciler = IntentReconciler::new(machine.clone(), settings, selection.clone());

        info!(
            servers = config.servers.len(),
            watchdog = config.pending_timeout().is_some(),
            "VPN controller ready"
        );

        Self {
            machine,
            reconciler,
            telemetry,
            selection,
            telemetry_task,
            tasks,
        }
    }

    /// Current canonical state
    pub fn state(&self) -> ConnectionState {
        self.machine.current_state()
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> Subscription {
        self.machine.subscribe()
    }

    /// Connect to the selected server
    pub async fn connect(&self) -> Result<(), ControllerError> {
        let params = self
            .selection
            .current_params()
            .ok_or(ControllerError::NoServerSelected)?;
        self.machine.request_connect(params).await
    }

    /// Disconnect, or abort a connect in flight
    pub async fn disconnect(&self) -> Result<(), ControllerError> {
        self.machine.request_disconnect().await
    }

    /// Process startup trigger for auto-connect
    pub async fn on_startup(&self) -> ReconcileOutcome {
        self.reconciler.on_startup().await
    }

    /// Host lifecycle change
    pub async fn on_app_state_change(&self, next: AppLifecycle) -> ReconcileOutcome {
        self.reconciler.on_app_state_change(next).await
    }

    /// The underlying state machine
    pub fn machine(&self) -> &Arc<ConnectionStateMachine> {
        &self.machine
    }

    /// Session telemetry
    pub fn telemetry(&self) -> &Arc<TelemetryReporter> {
        &self.telemetry
    }

    /// Server catalog and selection
    pub fn selection(&self) -> &ServerSelection {
        &self.selection
    }

    /// Byte counters to be fed by the transport adapter
    pub fn traffic_meter(&self) -> TrafficMeter {
        self.machine.traffic_meter()
    }

    /// Stop the controller, letting telemetry report what is already queued
    ///
    /// Transport events arriving after this call are ignored and every
    /// subscription ends.
    pub async fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.machine.close_subscriptions();

        if let Some(task) = self.telemetry_task.take() {
            if let Err(e) = task.await {
                warn!("Telemetry task ended abnormally: {}", e);
            }
        }
        info!("VPN controller stopped");
    }
}

impl Drop for VpnController {
    fn drop(&mut self) {
        for task in self.tasks.iter().chain(self.telemetry_task.iter()) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::SkipReason;
    use crate::session::SessionStatus;
    use crate::settings::{Settings, SharedSettings};
    use crate::normalizer::RawStateEvent;
    use crate::store::{MemorySessionStore, SessionStore};
    use crate::testing::MockTransport;
    use crate::transport::{TransportEventSink, event_channel};
    use std::time::Duration;

    struct Harness {
        controller: VpnController,
        sink: TransportEventSink,
        transport: Arc<MockTransport>,
        store: Arc<MemorySessionStore>,
    }

    fn harness(config: ControllerConfig) -> Harness {
        let (sink, events) = event_channel();
        let transport = Arc::new(MockTransport::default());
        let store = Arc::new(MemorySessionStore::new());
        let settings = Arc::new(SharedSettings::new(config.settings));
        let controller =
            VpnController::new(&config, transport.clone(), events, store.clone(), settings);
        Harness { controller, sink, transport, store }
    }

    async fn wait_for(sub: &mut Subscription, state: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(change) = sub.recv().await {
                if change.current == state {
                    return;
                }
            }
        })
        .await
        .expect("state reached");
    }

    /// Let the telemetry task catch up
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_connect_disconnect_cycle() {
        let h = harness(ControllerConfig::default_config());
        let mut sub = h.controller.subscribe();

        h.controller.connect().await.unwrap();
        h.sink.emit(2);
        wait_for(&mut sub, ConnectionState::Connected).await;
        settle().await;

        let active = h.controller.telemetry().active_session().unwrap();
        assert_eq!(active.server_id(), "de-1");

        h.controller.traffic_meter().record(300, 900);
        h.controller.disconnect().await.unwrap();
        h.sink.emit("0");
        wait_for(&mut sub, ConnectionState::Disconnected).await;
        settle().await;

        let stored = h.store.sessions().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status(), SessionStatus::Disconnected);
        assert_eq!(stored[0].bytes_downloaded(), 900);
        assert_eq!(h.transport.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_connect_selected_server() {
        let h = harness(ControllerConfig::default_config());

        h.controller.selection().select("jp-1").unwrap();
        h.controller.connect().await.unwrap();

        assert_eq!(h.controller.machine().target().unwrap().server_id, "jp-1");
    }

    #[tokio::test]
    async fn test_connect_without_selection() {
        let mut config = ControllerConfig::default_config();
        config.selected_server = None;
        let h = harness(config);

        assert_eq!(
            h.controller.connect().await,
            Err(ControllerError::NoServerSelected)
        );
        assert_eq!(h.transport.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_auto_connect_on_startup() {
        let mut config = ControllerConfig::default_config();
        config.settings = Settings { auto_connect: true, kill_switch: false };
        let h = harness(config);

        assert_eq!(h.controller.on_startup().await, ReconcileOutcome::Requested);
        h.controller.on_app_state_change(AppLifecycle::Background).await;
        assert_eq!(
            h.controller.on_app_state_change(AppLifecycle::Active).await,
            ReconcileOutcome::Skipped(SkipReason::AlreadyConnectingOrConnected)
        );
        assert_eq!(h.transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_drop_while_connected_closes_failed() {
        let h = harness(ControllerConfig::default_config());
        let mut sub = h.controller.subscribe();

        h.controller.connect().await.unwrap();
        h.sink.emit(2);
        h.sink.emit(0);
        wait_for(&mut sub, ConnectionState::Disconnected).await;
        settle().await;

        let last = h.controller.telemetry().last_session().unwrap();
        assert_eq!(last.status(), SessionStatus::Failed);
        assert!(last.ended_at_ms().is_some());
    }

    #[tokio::test]
    async fn test_watchdog_configured() {
        let mut config = ControllerConfig::default_config();
        config.pending_timeout_secs = Some(1);
        let h = harness(config);
        let mut sub = h.controller.subscribe();

        h.controller.connect().await.unwrap();
        wait_for(&mut sub, ConnectionState::Connecting).await;

        // Transport never answers
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(h.controller.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_telemetry() {
        let h = harness(ControllerConfig::default_config());

        h.controller.connect().await.unwrap();
        h.controller.machine().on_transport_event(RawStateEvent::Code(2));
        h.controller.traffic_meter().record(10, 20);
        h.controller.machine().on_transport_event(RawStateEvent::Code(0));
        h.controller.shutdown().await;

        let stored = h.store.sessions().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status(), SessionStatus::Failed);
        assert_eq!(stored[0].bytes_downloaded(), 20);
    }

    #[tokio::test]
    async fn test_active_session_in_store_while_connected() {
        let h = harness(ControllerConfig::default_config());
        let mut sub = h.controller.subscribe();

        h.controller.connect().await.unwrap();
        h.sink.emit(2);
        wait_for(&mut sub, ConnectionState::Connected).await;
        settle().await;

        let stored = h.store.active_or_last_session().await.unwrap().unwrap();
        assert!(stored.is_active());
        assert_eq!(stored.server_id(), "de-1");
    }
}
