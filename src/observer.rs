/*!
Observer surface exposed to the owning application.

Two data callbacks carry the hot path: serialized frames the engine
wants written to the wire (`packet out`) and application data received
on a stream (`packet received`). They are registered individually;
both must be set, together with both ports, before an association
leaves `New`. Lifecycle events (state changes, incoming stream resets,
association restarts) go through [`AssociationObserver`].

Callbacks may be invoked from engine-owned threads and from the
connection worker. The association never holds its lock while calling
into them, so a callback may safely re-enter the association.
*/

use crate::types::AssociationState;

/// Callback receiving serialized frames to be written to the wire
pub type PacketOutFn = dyn Fn(&[u8]) + Send + Sync;

/// Callback receiving application data: payload, stream id and
/// payload protocol id (host byte order)
pub type PacketReceivedFn = dyn Fn(&[u8], u16, u32) + Send + Sync;

/// Lifecycle event observer for one association
///
/// All methods default to no-ops so implementers override only what
/// they care about.
pub trait AssociationObserver: Send + Sync {
    /// The association entered a new state
    fn on_state_changed(&self, _state: AssociationState) {}

    /// The peer reset an incoming stream
    fn on_stream_reset(&self, _stream_id: u16) {}

    /// The engine restarted the association underneath us
    fn on_association_restart(&self) {}
}
