//! Transport Boundary
//!
//! The tunnel itself (OpenVPN plugin, WireGuard, a simulator) lives
//! behind [`Transport`]. Commands are fire-and-forget: a successful
//! return only means the command was accepted. The outcome arrives
//! later as raw state events pushed through a [`TransportEventSink`].
//!
//! ```text
//!   native callback thread           controller
//!  ┌──────────────────────┐      ┌──────────────────────┐
//!  │ TransportEventSink   │─────▶│ TransportEvents      │
//!  │   .emit(raw)         │ mpsc │   → state machine    │
//!  └──────────────────────┘      └──────────────────────┘
//! ```
//!
//! Events may be dropped by the platform and are never redelivered.

use crate::normalizer::RawStateEvent;
use crate::servers::ServerParams;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Tunnel capability consumed by the state machine
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a connect command. An error means the platform rejected it outright.
    async fn connect(&self, params: &ServerParams) -> Result<(), TransportError>;

    /// Issue a disconnect command. An error means the platform rejected it outright.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// Transport command errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("VPN permission denied")]
    PermissionDenied,

    #[error("Transport unavailable: {0}")]
    Unavailable(String),
}

/// Create a connected sink/receiver pair for raw transport events
pub fn event_channel() -> (TransportEventSink, TransportEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TransportEventSink { tx }, TransportEvents { rx })
}

/// Sending half, handed to the transport implementation
///
/// `emit` does not block and may be called from any thread.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    tx: mpsc::UnboundedSender<RawStateEvent>,
}

impl TransportEventSink {
    /// Push a raw state event. Returns false once the controller is gone.
    pub fn emit(&self, raw: impl Into<RawStateEvent>) -> bool {
        let raw = raw.into();
        if self.tx.send(raw).is_err() {
            debug!("Transport event dropped, controller closed");
            return false;
        }
        true
    }
}

/// Receiving half, consumed by the state machine's event pump
#[derive(Debug)]
pub struct TransportEvents {
    rx: mpsc::UnboundedReceiver<RawStateEvent>,
}

impl TransportEvents {
    /// Next raw event, `None` once every sink is dropped
    pub async fn recv(&mut self) -> Option<RawStateEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_from_native_thread() {
        let (sink, mut events) = event_channel();

        let handle = std::thread::spawn(move || {
            sink.emit(1);
            sink.emit("2");
        });
        handle.join().unwrap();

        assert_eq!(events.recv().await, Some(RawStateEvent::Code(1)));
        assert_eq!(events.recv().await, Some(RawStateEvent::Text("2".into())));
        // All sinks dropped
        assert_eq!(events.recv().await, None);
    }

    #[test]
    fn test_emit_after_close() {
        let (sink, events) = event_channel();
        drop(events);
        assert!(!sink.emit(0));
    }
}
