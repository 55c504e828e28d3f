/*!
The association state machine.

An [`Association`] is one logical multiplexed session endpoint. It
owns the engine socket for the session, drives the lifecycle

```text
new -> ready -> connecting -> connected -> disconnecting -> disconnected
                    ^                                            |
                    +-------------------- start() ---------------+
```

and bridges data between the application and the engine. All mutable
state sits behind one mutex; the lock is always released before an
observer callback runs and before blocking on the connection worker,
so callbacks may re-enter the association freely.

Associations are created through
[`AssociationRegistry::get_or_create`](crate::registry::AssociationRegistry::get_or_create).
*/

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::engine::{
    AssociationParams, ConnAddr, EngineResult, PeerAddressParams, SendInfo, ShutdownDirection,
    SocketHandle, SocketKind, TransportEngine, SUBSCRIBED_EVENTS,
};
use crate::error::{Error, Result};
use crate::observer::{AssociationObserver, PacketOutFn, PacketReceivedFn};
use crate::types::{AssociationId, AssociationState, ReliabilityPolicy, SessionId};
use crate::worker;

const DEFAULT_LOCAL_PORT: u16 = 0;
const DEFAULT_REMOTE_PORT: u16 = 0;

/// Bound on the graceful-shutdown completion wait
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

const AGGRESSIVE_MAX_RETRANSMITS: u16 = 1;
const AGGRESSIVE_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Mutable association state, guarded by the association mutex
pub(crate) struct Inner {
    pub(crate) local_port: u16,
    pub(crate) remote_port: u16,
    pub(crate) state: AssociationState,
    pub(crate) reliable_stream_mode: bool,
    pub(crate) aggressive_heartbeat: bool,
    pub(crate) debug: bool,
    pub(crate) session_id: SessionId,
    pub(crate) socket: Option<SocketHandle>,
    pub(crate) connect_attempted: bool,
    pub(crate) shutdown_complete: bool,
    pub(crate) worker: Option<JoinHandle<()>>,
}

/// One logical multiplexed session endpoint
pub struct Association {
    id: AssociationId,
    engine: Arc<dyn TransportEngine>,
    /// Handed to the connection worker so it outlives the caller
    self_ref: Weak<Association>,
    inner: Mutex<Inner>,
    /// Woken by the engine's shutdown-complete delivery
    shutdown_cv: Condvar,
    // Callback slots are read on engine threads without taking the
    // association mutex; they are only ever replaced, never cleared.
    packet_out: RwLock<Option<Arc<PacketOutFn>>>,
    packet_received: RwLock<Option<Arc<PacketReceivedFn>>>,
    observer: RwLock<Option<Arc<dyn AssociationObserver>>>,
}

impl Association {
    pub(crate) fn new(id: AssociationId, engine: Arc<dyn TransportEngine>) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            id,
            engine,
            self_ref: Weak::clone(self_ref),
            inner: Mutex::new(Inner {
                local_port: DEFAULT_LOCAL_PORT,
                remote_port: DEFAULT_REMOTE_PORT,
                state: AssociationState::New,
                reliable_stream_mode: false,
                aggressive_heartbeat: false,
                debug: false,
                session_id: 0,
                socket: None,
                connect_attempted: false,
                shutdown_complete: false,
                worker: None,
            }),
            shutdown_cv: Condvar::new(),
            packet_out: RwLock::new(None),
            packet_received: RwLock::new(None),
            observer: RwLock::new(None),
        })
    }

    pub fn id(&self) -> AssociationId {
        self.id
    }

    pub fn state(&self) -> AssociationState {
        self.inner.lock().state
    }

    pub fn local_port(&self) -> u16 {
        self.inner.lock().local_port
    }

    pub fn remote_port(&self) -> u16 {
        self.inner.lock().remote_port
    }

    pub fn reliable_stream_mode(&self) -> bool {
        self.inner.lock().reliable_stream_mode
    }

    pub fn aggressive_heartbeat(&self) -> bool {
        self.inner.lock().aggressive_heartbeat
    }

    pub fn debug(&self) -> bool {
        self.inner.lock().debug
    }

    /// Engine-assigned session id; zero until connected
    pub fn session_id(&self) -> SessionId {
        self.inner.lock().session_id
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    pub(crate) fn engine(&self) -> &Arc<dyn TransportEngine> {
        &self.engine
    }

    // --- Configuration ---

    /// Set the local port. Rejected once the association has left the
    /// initial state.
    pub fn set_local_port(&self, port: u16) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_configurable() {
                warn!(id = self.id, state = %inner.state, "ports cannot be set in this state");
                return Err(Error::InvalidState(inner.state));
            }
            inner.local_port = port;
        }
        self.maybe_transition_to_ready();
        Ok(())
    }

    /// Set the remote port. Rejected once the association has left the
    /// initial state.
    pub fn set_remote_port(&self, port: u16) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if !inner.state.is_configurable() {
                warn!(id = self.id, state = %inner.state, "ports cannot be set in this state");
                return Err(Error::InvalidState(inner.state));
            }
            inner.remote_port = port;
        }
        self.maybe_transition_to_ready();
        Ok(())
    }

    /// Select sequenced, reliable, connection-based operation for the
    /// next `start()`. Partial reliability parameters are ignored in
    /// this mode.
    pub fn set_reliable_stream_mode(&self, enabled: bool) {
        self.inner.lock().reliable_stream_mode = enabled;
    }

    /// Toggle engine-internal debug tracing
    pub fn set_debug(&self, enabled: bool) {
        self.inner.lock().debug = enabled;
        self.engine.set_debug(enabled);
    }

    /// When enabled, connecting applies a heartbeat interval of 10ms
    /// and a retransmit limit of 1 to detect peer loss quickly
    pub fn set_aggressive_heartbeat(&self, enabled: bool) {
        self.inner.lock().aggressive_heartbeat = enabled;
    }

    /// Register the callback receiving serialized frames for the wire
    pub fn set_on_packet_out(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.packet_out.write() = Some(Arc::new(callback));
        self.maybe_transition_to_ready();
    }

    /// Register the callback receiving application data
    pub fn set_on_packet_received(
        &self,
        callback: impl Fn(&[u8], u16, u32) + Send + Sync + 'static,
    ) {
        *self.packet_received.write() = Some(Arc::new(callback));
        self.maybe_transition_to_ready();
    }

    /// Register the lifecycle event observer
    pub fn set_observer(&self, observer: Arc<dyn AssociationObserver>) {
        *self.observer.write() = Some(observer);
    }

    // --- Lifecycle ---

    /// Start a connection attempt.
    ///
    /// Valid from `ready` or `disconnected`. Creates and configures
    /// the engine socket, moves to `connecting` and spawns the
    /// connection worker. Returns as soon as the attempt is under
    /// way; the transition to `connected` arrives asynchronously via
    /// the engine's notification stream. A socket setup failure moves
    /// the association to `error`.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.state.can_start() {
            warn!(id = self.id, state = %inner.state,
                "association is in the wrong state and cannot be started");
            return Err(Error::InvalidState(inner.state));
        }

        let sock = match self.create_socket(&inner) {
            Ok(sock) => sock,
            Err(err) => {
                self.change_state(&mut inner, AssociationState::Error);
                return Err(err);
            }
        };

        inner.socket = Some(sock);
        self.change_state(&mut inner, AssociationState::Connecting);
        if let Some(this) = self.self_ref.upgrade() {
            inner.worker = Some(worker::spawn(this));
        }
        Ok(())
    }

    /// Tear the association down.
    ///
    /// From `connected` this moves through `disconnecting` to
    /// `disconnected`. With `graceful` set and the association in
    /// reliable stream mode, an engine shutdown handshake is issued
    /// first and its completion awaited for up to one second; a
    /// timeout is not an error and teardown proceeds regardless. The
    /// connection worker is joined with the lock released, then the
    /// socket is closed.
    pub fn disconnect(&self, graceful: bool) {
        let mut inner = self.inner.lock();
        self.disconnect_locked(&mut inner, graceful);
    }

    pub(crate) fn disconnect_locked(
        &self,
        inner: &mut MutexGuard<'_, Inner>,
        graceful: bool,
    ) {
        if inner.state == AssociationState::Connected {
            self.change_state(inner, AssociationState::Disconnecting);

            if graceful && inner.reliable_stream_mode {
                if let Some(sock) = inner.socket {
                    info!(id = self.id, "association shutting down");
                    inner.shutdown_complete = false;
                    if self.engine.shutdown(sock, ShutdownDirection::Both).is_ok() {
                        let deadline = Instant::now() + SHUTDOWN_TIMEOUT;
                        while !inner.shutdown_complete {
                            if self.shutdown_cv.wait_until(inner, deadline).timed_out() {
                                break;
                            }
                        }
                        inner.shutdown_complete = false;
                    }
                }
            }
        }

        // Fall through so the transition to disconnected always occurs

        if inner.state == AssociationState::Disconnecting {
            if let Some(handle) = inner.worker.take() {
                // The worker may itself be waiting on this lock
                MutexGuard::unlocked(inner, || {
                    let _ = handle.join();
                });
            }
            self.force_close_locked(inner);
            self.change_state(inner, AssociationState::Disconnected);
            info!(id = self.id, "association disconnected");
        }
    }

    /// Close the engine socket and clear connect-related fields
    /// without touching the lifecycle state. Used when the caller
    /// drives the state transition itself, e.g. before a restart.
    pub fn force_close(&self) {
        let mut inner = self.inner.lock();
        self.force_close_locked(&mut inner);
    }

    fn force_close_locked(&self, inner: &mut Inner) {
        if let Some(sock) = inner.socket.take() {
            self.engine.close(sock);
        }
        inner.connect_attempted = false;
        inner.session_id = 0;
    }

    // --- Data path ---

    /// Feed a raw packet from the wire toward the engine.
    ///
    /// Packets arriving before our own connect attempt has been
    /// issued are discarded. If both endpoints open the session
    /// simultaneously, answering the peer's early session-open while
    /// unconfigured would reject it and make both sides abort;
    /// dropping it lets the outbound attempt establish the
    /// association instead.
    pub fn incoming_packet(&self, packet: &[u8]) {
        let connect_attempted = self.inner.lock().connect_attempted;
        if connect_attempted {
            self.engine.feed_inbound(self.id, packet);
        } else {
            debug!(id = self.id, "discarding inbound packet before connect attempt");
        }
    }

    /// Send one message on a stream.
    ///
    /// Valid only while `connected`. `ppid` and, for a policy other
    /// than `None`, `reliability_param` are converted to network byte
    /// order for the engine. Backpressure surfaces as
    /// [`Error::Backpressure`] and is never retried here; the caller
    /// owns resending.
    pub fn send_data(
        &self,
        buf: &[u8],
        stream_id: u16,
        ppid: u32,
        ordered: bool,
        reliability: ReliabilityPolicy,
        reliability_param: u32,
    ) -> Result<()> {
        let inner = self.inner.lock();
        if inner.state != AssociationState::Connected {
            debug!(id = self.id, state = %inner.state, "send rejected, not connected");
            return Err(Error::InvalidState(inner.state));
        }
        let Some(sock) = inner.socket else {
            return Err(Error::InvalidState(inner.state));
        };

        let info = SendInfo {
            stream_id,
            ppid: ppid.to_be(),
            unordered: !ordered,
            reliability,
            reliability_value: if reliability == ReliabilityPolicy::None {
                0
            } else {
                reliability_param.to_be()
            },
        };
        let remote = ConnAddr::new(inner.remote_port, self.id);

        match self.engine.send(sock, buf, remote, &info) {
            Ok(_) => Ok(()),
            // Resending is the caller's responsibility
            Err(crate::engine::EngineError::WouldBlock) => Err(Error::Backpressure),
            Err(err) => {
                info!(id = self.id, stream_id, error = %err, "error sending data");
                Err(Error::Engine(err))
            }
        }
    }

    /// Request an outgoing reset of one stream. A no-op unless
    /// `connected`; an engine-side failure is logged only.
    pub fn reset_stream(&self, stream_id: u16) {
        let inner = self.inner.lock();
        if inner.state != AssociationState::Connected {
            return;
        }
        let Some(sock) = inner.socket else { return };
        if let Err(err) = self.engine.reset_streams(sock, inner.session_id, &[stream_id]) {
            info!(id = self.id, stream_id, error = %err, "resetting stream failed");
        }
    }

    // --- Engine-driven transitions (called by the dispatcher) ---

    /// The engine reported the association established
    pub(crate) fn handle_established(&self, session_id: SessionId) {
        let mut inner = self.inner.lock();
        match inner.state {
            AssociationState::Connecting => {
                inner.session_id = session_id;
                self.apply_aggressive_heartbeat(&inner);
                self.change_state(&mut inner, AssociationState::Connected);
                info!(id = self.id, session_id, "association connected");
            }
            AssociationState::Connected => {
                info!(id = self.id, "association already established");
            }
            state => {
                info!(id = self.id, %state, "association-up ignored in unexpected state");
            }
        }
    }

    /// The engine completed the shutdown sequence for the socket
    pub(crate) fn mark_shutdown_complete(&self) {
        let mut inner = self.inner.lock();
        inner.shutdown_complete = true;
        self.shutdown_cv.notify_all();
    }

    pub(crate) fn emit_restart(&self) {
        if let Some(observer) = self.observer.read().clone() {
            observer.on_association_restart();
        }
    }

    pub(crate) fn emit_stream_reset(&self, stream_id: u16) {
        if let Some(observer) = self.observer.read().clone() {
            observer.on_stream_reset(stream_id);
        }
    }

    pub(crate) fn deliver_packet_out(&self, packet: &[u8]) {
        if let Some(callback) = self.packet_out.read().clone() {
            callback(packet);
        }
    }

    pub(crate) fn deliver_packet_received(&self, data: &[u8], stream_id: u16, ppid: u32) {
        if let Some(callback) = self.packet_received.read().clone() {
            callback(data, stream_id, ppid);
        }
    }

    /// Join the connection worker if one is outstanding. Called by
    /// the registry during disposal, after the registry lock has been
    /// released.
    pub(crate) fn join_worker(&self) {
        let handle = self.inner.lock().worker.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // --- Internals ---

    fn create_socket(&self, inner: &Inner) -> Result<SocketHandle> {
        let kind = if inner.reliable_stream_mode {
            SocketKind::Stream
        } else {
            SocketKind::SequencedPacket
        };
        let sock = self.engine.create_socket(kind, self.id)?;
        if let Err(err) = self.configure_socket(sock) {
            self.engine.close(sock);
            warn!(id = self.id, error = %err, "could not configure engine socket");
            return Err(err.into());
        }
        Ok(sock)
    }

    fn configure_socket(&self, sock: SocketHandle) -> EngineResult<()> {
        self.engine.set_non_blocking(sock, true)?;
        self.engine.set_linger_off(sock)?;
        self.engine.set_no_delay(sock, true)?;
        self.engine.enable_stream_reset(sock)?;
        for event in SUBSCRIBED_EVENTS {
            if let Err(err) = self.engine.subscribe(sock, event) {
                warn!(id = self.id, ?event, error = %err, "failed to subscribe to engine event");
            }
        }
        Ok(())
    }

    fn apply_aggressive_heartbeat(&self, inner: &Inner) {
        if !inner.aggressive_heartbeat {
            return;
        }
        let Some(sock) = inner.socket else { return };

        let params = AssociationParams {
            session_id: inner.session_id,
            max_retransmits: AGGRESSIVE_MAX_RETRANSMITS,
        };
        if let Err(err) = self.engine.set_association_params(sock, &params) {
            warn!(id = self.id, error = %err, "could not set association retransmit limit");
        }

        let peer = PeerAddressParams {
            address: ConnAddr::new(inner.remote_port, self.id),
            heartbeat_enabled: true,
            heartbeat_interval: AGGRESSIVE_HEARTBEAT_INTERVAL,
        };
        if let Err(err) = self.engine.set_peer_address_params(sock, &peer) {
            warn!(id = self.id, error = %err, "could not set peer heartbeat interval");
        }
    }

    /// Re-evaluate the automatic `new` → `ready` transition. Fires
    /// exactly once, the moment both ports and both data callbacks
    /// are configured.
    fn maybe_transition_to_ready(&self) {
        let packet_out_set = self.packet_out.read().is_some();
        let packet_received_set = self.packet_received.read().is_some();

        let mut inner = self.inner.lock();
        if inner.state == AssociationState::New
            && inner.local_port != 0
            && inner.remote_port != 0
            && packet_out_set
            && packet_received_set
        {
            self.change_state(&mut inner, AssociationState::Ready);
        }
    }

    /// Set the state and notify the observer. The lock is released
    /// for the duration of the callback so the observer may call back
    /// into the association.
    fn change_state(&self, inner: &mut MutexGuard<'_, Inner>, new_state: AssociationState) {
        inner.state = new_state;
        debug!(id = self.id, state = %new_state, "state changed");
        if let Some(observer) = self.observer.read().clone() {
            MutexGuard::unlocked(inner, || observer.on_state_changed(new_state));
        }
    }
}
