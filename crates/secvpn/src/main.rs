//! SecVPN: VPN client controller host
//!
//! Composition root. Initializes the global allocator and logging, loads
//! configuration, wires a simulated transport into the controller and
//! drives one scripted session.

mod simulated;

use anyhow::{Context, Result, bail};
use secvpn_core::{
    AppLifecycle, ConnectionState, ControllerConfig, MemorySessionStore, ReconcileOutcome,
    SessionStore, SharedSettings, Subscription, VpnController, event_channel,
};
use simulated::{SimulatedTransport, spawn_traffic};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const STATE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    info!("SecVPN starting...");

    let config = match std::env::args().nth(1) {
        Some(path) => ControllerConfig::from_file(Path::new(&path))
            .with_context(|| format!("loading config from {}", path))?,
        None => ControllerConfig::default_config(),
    };

    let settings = Arc::new(SharedSettings::new(config.settings));
    let store = Arc::new(MemorySessionStore::new());
    let (sink, events) = event_channel();
    let transport = Arc::new(SimulatedTransport::new(sink, Duration::from_millis(400)));

    let controller = VpnController::new(&config, transport, events, store.clone(), settings);
    let mut watch = controller.subscribe();

    // UI stand-in: logs transitions, drives traffic counters while connected
    let mut updates = controller.subscribe();
    let meter = controller.traffic_meter();
    let ui = tokio::spawn(async move {
        let mut traffic = None;
        while let Some(change) = updates.recv().await {
            info!("UI: {} -> {}", change.previous, change.current);
            if change.current == ConnectionState::Connected {
                traffic = Some(spawn_traffic(meter.clone()));
            } else if let Some(task) = traffic.take() {
                task.abort();
            }
        }
    });

    match controller.on_startup().await {
        ReconcileOutcome::Requested => info!("Auto-connect started"),
        outcome => {
            info!("No auto-connect ({:?}), connecting manually", outcome);
            controller.connect().await?;
        }
    }
    wait_for(&mut watch, ConnectionState::Connected).await?;

    tokio::time::sleep(Duration::from_secs(1)).await;

    // Coming back to the foreground while connected is a no-op
    controller.on_app_state_change(AppLifecycle::Background).await;
    let outcome = controller.on_app_state_change(AppLifecycle::Active).await;
    info!("Foreground trigger: {:?}", outcome);

    controller.disconnect().await?;
    wait_for(&mut watch, ConnectionState::Disconnected).await?;

    let telemetry = controller.telemetry().clone();
    controller.shutdown().await;
    ui.await?;

    info!("{}", telemetry.stats().format());
    for session in telemetry.retained_sessions() {
        warn!(session = %session.id(), "Session not reported");
    }
    if let Some(last) = store.active_or_last_session().await? {
        info!(
            session = %last.id(),
            "Last session: {} for {}s ({:?})",
            last.server_location(),
            last.duration_secs(),
            last.status()
        );
    }

    info!("SecVPN shutting down");
    Ok(())
}

/// Wait until the controller reports `state`
async fn wait_for(subscription: &mut Subscription, state: ConnectionState) -> Result<()> {
    let reached = tokio::time::timeout(STATE_TIMEOUT, async {
        while let Some(change) = subscription.recv().await {
            if change.current == state {
                return true;
            }
        }
        false
    })
    .await;

    match reached {
        Ok(true) => Ok(()),
        Ok(false) => bail!("controller stopped before reaching {}", state),
        Err(_) => bail!("timed out waiting for {}", state),
    }
}
