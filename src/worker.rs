/*!
The connection worker: one background thread per connection attempt,
spawned by `start()` and joined by `disconnect()` or disposal.
*/

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::MutexGuard;
use tracing::{debug, info};

use crate::association::Association;
use crate::engine::{ConnAddr, EngineError};

/// Delay between bind attempts while the previous incarnation's
/// address is still held by the engine
const BIND_RETRY_DELAY: Duration = Duration::from_millis(10);

pub(crate) fn spawn(assoc: Arc<Association>) -> JoinHandle<()> {
    thread::Builder::new()
        .name(format!("assoc-connect-{}", assoc.id()))
        .spawn(move || {
            connect(&assoc);
        })
        .expect("failed to spawn connection worker")
}

/// Bind the local address and initiate the non-blocking connect.
///
/// The worker only starts the attempt; the transition to `connected`
/// is driven later by the engine's notification stream.
fn connect(assoc: &Association) {
    let engine = Arc::clone(assoc.engine());
    let mut inner = assoc.lock_inner();

    let Some(sock) = inner.socket else { return };
    let local = ConnAddr::new(inner.local_port, assoc.id());

    // After an association is reported disconnected there is a window
    // before the engine reclaims its side of the address. A reconnect
    // inside that window binds the same address and fails with
    // address-in-use; retry until the engine lets go.
    loop {
        match engine.bind(sock, local) {
            Ok(()) => break,
            Err(EngineError::AddressInUse) => {
                MutexGuard::unlocked(&mut inner, || thread::sleep(BIND_RETRY_DELAY));
            }
            Err(err) => {
                info!(id = assoc.id(), error = %err, "bind failed");
                return;
            }
        }
    }

    let remote = ConnAddr::new(inner.remote_port, assoc.id());
    match engine.connect(sock, remote) {
        // In-progress is the expected outcome of a non-blocking
        // connect; completion arrives via notification
        Ok(()) | Err(EngineError::InProgress) => {
            inner.connect_attempted = true;
            debug!(id = assoc.id(), "connect attempt issued");
        }
        Err(err) => {
            info!(id = assoc.id(), error = %err, "connect failed");
        }
    }
}
