//! Test doubles shared by the unit tests.

use crate::config::ControllerConfig;
use crate::machine::ConnectionStateMachine;
use crate::servers::ServerParams;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Transport that records commands and can be told to reject them
#[derive(Default)]
pub struct MockTransport {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub fail_disconnect: AtomicBool,
    /// First connect waits for `release`, then fails
    pub hold_first_connect: AtomicBool,
    pub release: Notify,
}

impl MockTransport {
    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _params: &ServerParams) -> Result<(), TransportError> {
        let call = self.connects.fetch_add(1, Ordering::SeqCst);
        if call == 0 && self.hold_first_connect.load(Ordering::SeqCst) {
            self.release.notified().await;
            return Err(TransportError::Unavailable("service timed out".into()));
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::PermissionDenied);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("service not bound".into()));
        }
        Ok(())
    }
}

/// Fresh machine over a mock transport
pub fn mock_machine() -> (Arc<ConnectionStateMachine>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let machine = Arc::new(ConnectionStateMachine::new(transport.clone()));
    (machine, transport)
}

/// Parameters of a server from the built-in catalog
pub fn server(id: &str) -> ServerParams {
    ControllerConfig::default_config()
        .servers
        .into_iter()
        .find(|s| s.id == id)
        .map(|s| s.params())
        .expect("server in default catalog")
}
