//! Simulated OpenVPN transport.
//!
//! Stands in for the native plugin: commands return immediately and the
//! resulting state codes arrive later on a background task, mixing
//! numeric and string payloads the way the mobile plugins do.

use async_trait::async_trait;
use secvpn_core::{ServerParams, TrafficMeter, Transport, TransportError, TransportEventSink};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

pub struct SimulatedTransport {
    sink: TransportEventSink,
    latency: Duration,
    link: Mutex<Option<JoinHandle<()>>>,
}

impl SimulatedTransport {
    pub fn new(sink: TransportEventSink, latency: Duration) -> Self {
        Self {
            sink,
            latency,
            link: Mutex::new(None),
        }
    }

    fn replace_link(&self, task: JoinHandle<()>) {
        let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = link.replace(task) {
            previous.abort();
        }
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn connect(&self, params: &ServerParams) -> Result<(), TransportError> {
        if params.remote_address.is_empty() {
            return Err(TransportError::Rejected("missing remote address".into()));
        }

        debug!(remote = %params.remote_address, "Simulated tunnel connecting");
        let sink = self.sink.clone();
        let latency = self.latency;

        self.replace_link(tokio::spawn(async move {
            // Plugin-specific detail states come through unmapped
            sink.emit("WAIT");
            tokio::time::sleep(latency).await;
            sink.emit(1);
            tokio::time::sleep(latency).await;
            sink.emit("2");
        }));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        debug!("Simulated tunnel disconnecting");
        let sink = self.sink.clone();
        let latency = self.latency;

        self.replace_link(tokio::spawn(async move {
            sink.emit(3);
            tokio::time::sleep(latency).await;
            sink.emit(0);
        }));
        Ok(())
    }
}

/// Feed growing byte counters while the tunnel is up
pub fn spawn_traffic(meter: TrafficMeter) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(250));
        let (mut up, mut down) = (0u64, 0u64);

        loop {
            interval.tick().await;
            up += 16 * 1024;
            down += 96 * 1024;
            meter.record(up, down);
        }
    })
}
