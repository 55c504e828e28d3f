/*!
# sctp-assoc

Association lifecycle management for an embedded user-space SCTP
transport engine.

The engine owns framing, retransmission, congestion control and stream
multiplexing; this crate owns everything around it: establishing an
association without losing the race when both endpoints connect at
once, bridging data and control events between engine threads and
application threads, shutting down gracefully within a bounded wait,
and turning the engine's notification stream into state transitions
and observer callbacks.

## Overview

- [`AssociationRegistry`] — process-wide map of live associations and
  the validity gate for engine callbacks that may outlive their
  association.
- [`Association`] — the per-session state machine:
  `new` → `ready` → `connecting` → `connected` → `disconnecting` →
  `disconnected`, restartable from `disconnected`.
- [`TransportEngine`] — the socket-like trait the engine is consumed
  through. Real engines wrap an embedded protocol stack; tests drive
  the manager with deterministic fakes.

An application configures both ports and registers the two data
callbacks (the association moves to `ready` by itself), then calls
`start()`. The connection worker binds and connects in the
background; the engine's association-up notification completes the
transition to `connected`. Data flows through
[`Association::send_data`] and [`Association::incoming_packet`];
`disconnect()` tears the session down, bounded to roughly one second
when a graceful shutdown handshake is requested.

## Concurrency

Engine callbacks arrive on engine-owned threads concurrently with
application calls. Each association is guarded by a single lock that
is never held across an observer callback or a worker join, and
callbacks carry only an association id that must be re-validated
through the registry before any state is touched.
*/

pub mod association;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod observer;
pub mod registry;
pub mod types;

mod worker;

// Re-export commonly used types for convenience
pub use association::Association;
pub use engine::{
    AssociationParams, ConnAddr, EngineError, EngineResult, EventType, InboundPayload,
    PeerAddressParams, SendInfo, ShutdownDirection, SocketHandle, SocketKind, TransportEngine,
    SUBSCRIBED_EVENTS,
};
pub use error::{Error, Result};
pub use observer::{AssociationObserver, PacketOutFn, PacketReceivedFn};
pub use registry::AssociationRegistry;
pub use types::{AssociationId, AssociationState, ReliabilityPolicy, SessionId};
