//! Pending-state watchdog.
//!
//! The state machine waits for the transport indefinitely. Hosts that
//! want a bound on `Connecting`/`Disconnecting` spawn this watchdog,
//! which forces a local `Disconnected` once the timeout expires.

use crate::machine::ConnectionStateMachine;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Spawn the watchdog task.
///
/// Holds only a weak reference; stops when the machine is dropped.
pub fn spawn_pending_watchdog(
    machine: &Arc<ConnectionStateMachine>,
    timeout: Duration,
) -> JoinHandle<()> {
    let mut subscription = machine.subscribe();
    let machine: Weak<ConnectionStateMachine> = Arc::downgrade(machine);

    tokio::spawn(async move {
        debug!("Pending-state watchdog started ({:?})", timeout);

        loop {
            let state = match machine.upgrade() {
                Some(m) => m.current_state(),
                None => break,
            };

            if !state.is_pending() {
                if subscription.recv().await.is_none() {
                    break;
                }
                continue;
            }

            match tokio::time::timeout(timeout, subscription.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    let Some(m) = machine.upgrade() else {
                        break;
                    };
                    if m.current_state() == state {
                        warn!(state = %state, "Transport silent for {:?}", timeout);
                        m.force_disconnected();
                    }
                }
            }
        }

        debug!("Pending-state watchdog stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::RawStateEvent;
    use crate::state::ConnectionState;
    use crate::testing::{mock_machine, server};

    #[tokio::test]
    async fn test_stuck_connecting_forced_down() {
        let (machine, _) = mock_machine();
        let _watchdog = spawn_pending_watchdog(&machine, Duration::from_millis(30));

        machine.request_connect(server("de-1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(machine.current_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_resolved_state_left_alone() {
        let (machine, _) = mock_machine();
        let _watchdog = spawn_pending_watchdog(&machine, Duration::from_millis(50));

        machine.request_connect(server("de-1")).await.unwrap();
        machine.on_transport_event(RawStateEvent::Code(2));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(machine.current_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_stops_with_machine() {
        let (machine, _) = mock_machine();
        let watchdog = spawn_pending_watchdog(&machine, Duration::from_secs(60));

        drop(machine);
        watchdog.await.unwrap();
    }
}
