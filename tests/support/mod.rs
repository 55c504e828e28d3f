//! Shared test support: a deterministic, call-recording fake engine
//! and a recording lifecycle observer.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sctp_assoc::engine::notify::{assoc_change, AssocChangeState};
use sctp_assoc::{
    Association, AssociationId, AssociationObserver, AssociationParams, AssociationRegistry,
    AssociationState, ConnAddr, EngineError, EngineResult, EventType, InboundPayload,
    PeerAddressParams, SendInfo, SessionId, ShutdownDirection, SocketHandle, SocketKind,
    TransportEngine,
};

/// One send recorded by the fake engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSend {
    pub sock: SocketHandle,
    pub data: Vec<u8>,
    pub addr: ConnAddr,
    pub info: SendInfo,
}

/// Call-recording `TransportEngine` with failure injection.
///
/// Every operation succeeds unless a failure is seeded. Bind results
/// are consumed front-to-back from `bind_results`, defaulting to
/// success once the queue runs dry; connect defaults to the
/// non-blocking in-progress outcome.
#[derive(Default)]
pub struct FakeEngine {
    pub init_calls: AtomicUsize,
    pub finish_calls: AtomicUsize,
    pub registered: Mutex<Vec<AssociationId>>,
    pub deregistered: Mutex<Vec<AssociationId>>,
    pub created: Mutex<Vec<(SocketHandle, SocketKind, AssociationId)>>,
    pub closed: Mutex<Vec<SocketHandle>>,
    pub binds: Mutex<Vec<(SocketHandle, ConnAddr)>>,
    pub connects: Mutex<Vec<(SocketHandle, ConnAddr)>>,
    pub sends: Mutex<Vec<RecordedSend>>,
    pub fed: Mutex<Vec<Vec<u8>>>,
    pub subscriptions: Mutex<Vec<(SocketHandle, EventType)>>,
    pub assoc_params: Mutex<Vec<AssociationParams>>,
    pub peer_params: Mutex<Vec<PeerAddressParams>>,
    pub resets: Mutex<Vec<(SessionId, Vec<u16>)>>,
    pub shutdowns: Mutex<Vec<(SocketHandle, ShutdownDirection)>>,
    pub debug_calls: Mutex<Vec<bool>>,

    pub fail_create: AtomicBool,
    pub fail_non_blocking: AtomicBool,
    pub fail_subscribe: Mutex<Option<EventType>>,
    pub bind_results: Mutex<VecDeque<EngineResult<()>>>,
    pub connect_result: Mutex<Option<EngineResult<()>>>,
    pub send_result: Mutex<Option<EngineError>>,
    pub shutdown_result: Mutex<Option<EngineError>>,

    next_sock: AtomicU64,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl TransportEngine for FakeEngine {
    fn init(&self) {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.finish_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn register_address(&self, id: AssociationId) {
        self.registered.lock().push(id);
    }

    fn deregister_address(&self, id: AssociationId) {
        self.deregistered.lock().push(id);
    }

    fn set_debug(&self, enabled: bool) {
        self.debug_calls.lock().push(enabled);
    }

    fn create_socket(&self, kind: SocketKind, owner: AssociationId) -> EngineResult<SocketHandle> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(EngineError::failed("create refused"));
        }
        let sock = SocketHandle(self.next_sock.fetch_add(1, Ordering::SeqCst) + 1);
        self.created.lock().push((sock, kind, owner));
        Ok(sock)
    }

    fn set_non_blocking(&self, _sock: SocketHandle, _enabled: bool) -> EngineResult<()> {
        if self.fail_non_blocking.load(Ordering::SeqCst) {
            return Err(EngineError::failed("non-blocking refused"));
        }
        Ok(())
    }

    fn set_linger_off(&self, _sock: SocketHandle) -> EngineResult<()> {
        Ok(())
    }

    fn set_no_delay(&self, _sock: SocketHandle, _enabled: bool) -> EngineResult<()> {
        Ok(())
    }

    fn enable_stream_reset(&self, _sock: SocketHandle) -> EngineResult<()> {
        Ok(())
    }

    fn subscribe(&self, sock: SocketHandle, event: EventType) -> EngineResult<()> {
        self.subscriptions.lock().push((sock, event));
        if *self.fail_subscribe.lock() == Some(event) {
            return Err(EngineError::failed("subscribe refused"));
        }
        Ok(())
    }

    fn bind(&self, sock: SocketHandle, addr: ConnAddr) -> EngineResult<()> {
        self.binds.lock().push((sock, addr));
        self.bind_results.lock().pop_front().unwrap_or(Ok(()))
    }

    fn connect(&self, sock: SocketHandle, addr: ConnAddr) -> EngineResult<()> {
        self.connects.lock().push((sock, addr));
        match self.connect_result.lock().clone() {
            Some(result) => result,
            None => Err(EngineError::InProgress),
        }
    }

    fn send(
        &self,
        sock: SocketHandle,
        data: &[u8],
        addr: ConnAddr,
        info: &SendInfo,
    ) -> EngineResult<usize> {
        if let Some(err) = self.send_result.lock().clone() {
            return Err(err);
        }
        self.sends.lock().push(RecordedSend { sock, data: data.to_vec(), addr, info: *info });
        Ok(data.len())
    }

    fn set_association_params(
        &self,
        _sock: SocketHandle,
        params: &AssociationParams,
    ) -> EngineResult<()> {
        self.assoc_params.lock().push(*params);
        Ok(())
    }

    fn set_peer_address_params(
        &self,
        _sock: SocketHandle,
        params: &PeerAddressParams,
    ) -> EngineResult<()> {
        self.peer_params.lock().push(*params);
        Ok(())
    }

    fn reset_streams(
        &self,
        _sock: SocketHandle,
        session_id: SessionId,
        streams: &[u16],
    ) -> EngineResult<()> {
        self.resets.lock().push((session_id, streams.to_vec()));
        Ok(())
    }

    fn shutdown(&self, sock: SocketHandle, direction: ShutdownDirection) -> EngineResult<()> {
        if let Some(err) = self.shutdown_result.lock().clone() {
            return Err(err);
        }
        self.shutdowns.lock().push((sock, direction));
        Ok(())
    }

    fn close(&self, sock: SocketHandle) {
        self.closed.lock().push(sock);
    }

    fn feed_inbound(&self, _owner: AssociationId, packet: &[u8]) {
        self.fed.lock().push(packet.to_vec());
    }
}

/// Observer recording every lifecycle event it sees
#[derive(Default)]
pub struct RecordingObserver {
    pub states: Mutex<Vec<AssociationState>>,
    pub stream_resets: Mutex<Vec<u16>>,
    pub restarts: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl AssociationObserver for RecordingObserver {
    fn on_state_changed(&self, state: AssociationState) {
        self.states.lock().push(state);
    }

    fn on_stream_reset(&self, stream_id: u16) {
        self.stream_resets.lock().push(stream_id);
    }

    fn on_association_restart(&self) {
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout`
/// elapses; returns the final evaluation.
pub fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Create an association with ports and both data callbacks set, i.e.
/// one that has just auto-transitioned to ready.
pub fn ready_association(
    registry: &AssociationRegistry,
    id: AssociationId,
) -> Arc<Association> {
    let assoc = registry.get_or_create(id);
    assoc.set_local_port(5000).unwrap();
    assoc.set_remote_port(5001).unwrap();
    assoc.set_on_packet_out(|_| {});
    assoc.set_on_packet_received(|_, _, _| {});
    assert_eq!(assoc.state(), AssociationState::Ready);
    assoc
}

/// Drive an association to connected: start it, wait for the worker
/// to issue the connect, then deliver the engine's association-up.
pub fn establish(
    registry: &AssociationRegistry,
    engine: &FakeEngine,
    assoc: &Arc<Association>,
    session_id: SessionId,
) {
    let connects_before = engine.connects.lock().len();
    assoc.start().unwrap();
    assert!(
        wait_for(|| engine.connects.lock().len() > connects_before, Duration::from_secs(5)),
        "connection worker never issued a connect"
    );
    registry.inbound(
        assoc.id(),
        InboundPayload::Notification(assoc_change(AssocChangeState::CommUp, session_id).to_bytes()),
    );
    assert_eq!(assoc.state(), AssociationState::Connected);
}
