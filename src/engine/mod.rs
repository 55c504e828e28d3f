/*!
Interface to the embedded user-space transport engine.

The engine owns framing, retransmission, congestion control and stream
multiplexing. This crate consumes it through [`TransportEngine`], a
socket-like call surface, and feeds it raw inbound bytes; the engine
delivers outbound frames and inbound events by invoking the two
dispatch entry points on [`AssociationRegistry`] from its own threads.

The engine has no real IP layer: addresses are a port number plus the
id of the owning association, which the engine hands back when it
routes callbacks.

[`AssociationRegistry`]: crate::registry::AssociationRegistry
*/

pub mod notify;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

use crate::types::{AssociationId, SessionId};

/// Result type for engine calls
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Failure reported by a [`TransportEngine`] call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The bind address is still held by a previous incarnation
    #[error("address already in use")]
    AddressInUse,

    /// Non-blocking connect accepted; completion arrives via
    /// notification
    #[error("operation in progress")]
    InProgress,

    /// The engine's buffers are full
    #[error("resource temporarily unavailable")]
    WouldBlock,

    /// Any other engine failure
    #[error("{0}")]
    Failed(String),
}

impl EngineError {
    /// Construct a [`EngineError::Failed`] from a message
    pub fn failed(msg: impl Into<String>) -> Self {
        EngineError::Failed(msg.into())
    }
}

/// Opaque handle to one engine socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub u64);

/// Socket kind selected at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// Sequenced, reliable, connection-based; partial reliability
    /// parameters are ignored
    Stream,
    /// Message-oriented with per-message reliability policies
    SequencedPacket,
}

/// Synthetic connection address: a port plus the owning association
///
/// The engine routes callbacks for this address back to the
/// association id it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAddr {
    pub port: u16,
    pub association: AssociationId,
}

impl ConnAddr {
    pub fn new(port: u16, association: AssociationId) -> Self {
        Self { port, association }
    }
}

impl fmt::Display for ConnAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn:{}:{}", self.association, self.port)
    }
}

/// Engine event classes an association subscribes to at socket setup
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    AssociationChange = 0x0001,
    PeerAddressChange = 0x0002,
    RemoteError = 0x0003,
    SendFailed = 0x0004,
    Shutdown = 0x0005,
    AdaptationIndication = 0x0006,
    StreamReset = 0x0009,
    StreamChange = 0x000d,
}

/// The fixed notification set every association socket subscribes to
pub const SUBSCRIBED_EVENTS: [EventType; 8] = [
    EventType::AssociationChange,
    EventType::PeerAddressChange,
    EventType::RemoteError,
    EventType::SendFailed,
    EventType::Shutdown,
    EventType::AdaptationIndication,
    EventType::StreamReset,
    EventType::StreamChange,
];

/// Send descriptor accompanying one outbound message
///
/// `ppid` and `reliability_value` are carried in network byte order,
/// as the engine forwards them to the wire unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendInfo {
    pub stream_id: u16,
    /// Payload protocol id, network byte order
    pub ppid: u32,
    pub unordered: bool,
    pub reliability: crate::types::ReliabilityPolicy,
    /// Policy parameter, network byte order; zero when `reliability`
    /// is `None`
    pub reliability_value: u32,
}

/// Association-level tuning applied through the engine option surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociationParams {
    pub session_id: SessionId,
    pub max_retransmits: u16,
}

/// Peer address tuning applied through the engine option surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddressParams {
    pub address: ConnAddr,
    pub heartbeat_enabled: bool,
    pub heartbeat_interval: Duration,
}

/// Direction argument for a graceful shutdown request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownDirection {
    Read,
    Write,
    Both,
}

/// One inbound delivery from the engine's receive path
///
/// Mirrors the three cases the engine distinguishes: an empty
/// delivery signalling the shutdown sequence completed, a serialized
/// notification frame, or application data tagged with its stream id
/// and payload protocol id (network byte order).
#[derive(Debug, Clone)]
pub enum InboundPayload {
    /// The shutdown sequence for the socket has completed
    ShutdownComplete,
    /// A serialized notification frame, parsed by the dispatcher
    Notification(Bytes),
    /// Application data received on a stream
    Data {
        bytes: Bytes,
        stream_id: u16,
        /// Payload protocol id, network byte order
        ppid: u32,
    },
}

/// Call surface of the embedded transport engine
///
/// Implementations are invoked concurrently from application threads
/// and the connection worker, and must deliver outbound frames and
/// inbound events through the registry's dispatch entry points from
/// whatever threads they own. Process-wide setup is keyed by a
/// live-association count: the registry calls [`init`] before the
/// first association exists and [`finish`] after the last one is
/// disposed.
///
/// [`init`]: TransportEngine::init
/// [`finish`]: TransportEngine::finish
pub trait TransportEngine: Send + Sync {
    /// Process-wide engine initialization, first association only
    fn init(&self);

    /// Process-wide engine teardown, after the last association
    fn finish(&self);

    /// Announce an association id as a valid callback routing target
    fn register_address(&self, id: AssociationId);

    /// Withdraw an association id from callback routing
    fn deregister_address(&self, id: AssociationId);

    /// Toggle engine-internal debug tracing
    fn set_debug(&self, enabled: bool);

    fn create_socket(&self, kind: SocketKind, owner: AssociationId) -> EngineResult<SocketHandle>;

    fn set_non_blocking(&self, sock: SocketHandle, enabled: bool) -> EngineResult<()>;

    /// Disable lingering on close so teardown never blocks
    fn set_linger_off(&self, sock: SocketHandle) -> EngineResult<()>;

    fn set_no_delay(&self, sock: SocketHandle, enabled: bool) -> EngineResult<()>;

    fn enable_stream_reset(&self, sock: SocketHandle) -> EngineResult<()>;

    /// Subscribe the socket to one engine event class
    fn subscribe(&self, sock: SocketHandle, event: EventType) -> EngineResult<()>;

    fn bind(&self, sock: SocketHandle, addr: ConnAddr) -> EngineResult<()>;

    /// Initiate a non-blocking connect; `Err(InProgress)` means the
    /// attempt started and completion will arrive via notification
    fn connect(&self, sock: SocketHandle, addr: ConnAddr) -> EngineResult<()>;

    fn send(
        &self,
        sock: SocketHandle,
        data: &[u8],
        addr: ConnAddr,
        info: &SendInfo,
    ) -> EngineResult<usize>;

    fn set_association_params(
        &self,
        sock: SocketHandle,
        params: &AssociationParams,
    ) -> EngineResult<()>;

    fn set_peer_address_params(
        &self,
        sock: SocketHandle,
        params: &PeerAddressParams,
    ) -> EngineResult<()>;

    /// Request an outgoing reset of the listed streams
    fn reset_streams(
        &self,
        sock: SocketHandle,
        session_id: SessionId,
        streams: &[u16],
    ) -> EngineResult<()>;

    fn shutdown(&self, sock: SocketHandle, direction: ShutdownDirection) -> EngineResult<()>;

    fn close(&self, sock: SocketHandle);

    /// Feed a raw packet from the wire into the engine's inbound
    /// demultiplexer for the given association
    fn feed_inbound(&self, owner: AssociationId, packet: &[u8]);
}
