/*!
Engine callback dispatch.

The engine invokes these two entry points from its own threads: one
for serialized frames it wants on the wire, one for everything
arriving on the receive path. Both take only an association id and
upgrade it through the registry first — an id that no longer resolves
means the association was disposed while the callback was in flight,
and the delivery is dropped without touching any association state.
*/

use tracing::{debug, info, warn};

use crate::association::Association;
use crate::engine::notify::{AssocChange, AssocChangeState, Notification, StreamResetEvent};
use crate::engine::InboundPayload;
use crate::registry::AssociationRegistry;
use crate::types::AssociationId;

impl AssociationRegistry {
    /// Entry point for the engine's outbound path: a serialized frame
    /// to hand to the packet-out callback verbatim.
    pub fn packet_out(&self, id: AssociationId, packet: &[u8]) {
        let Some(assoc) = self.lookup(id) else {
            debug!(id, "outbound frame for disposed association dropped");
            return;
        };
        assoc.deliver_packet_out(packet);
    }

    /// Entry point for the engine's receive path: data, notification
    /// frames and the shutdown-complete marker.
    pub fn inbound(&self, id: AssociationId, payload: InboundPayload) {
        let Some(assoc) = self.lookup(id) else {
            debug!(id, "inbound event for disposed association dropped");
            return;
        };

        match payload {
            InboundPayload::ShutdownComplete => {
                info!(id, "received shutdown complete notification");
                assoc.mark_shutdown_complete();
            }
            InboundPayload::Notification(frame) => handle_notification(&assoc, &frame),
            InboundPayload::Data { bytes, stream_id, ppid } => {
                // ppid travels in network byte order
                assoc.deliver_packet_received(&bytes, stream_id, u32::from_be(ppid));
            }
        }
    }
}

fn handle_notification(assoc: &Association, frame: &[u8]) {
    let notification = match Notification::parse(frame) {
        Ok(notification) => notification,
        Err(err) => {
            warn!(id = assoc.id(), error = %err, "dropping malformed notification");
            return;
        }
    };

    match notification {
        Notification::AssociationChange(change) => handle_association_change(assoc, &change),
        Notification::StreamReset(event) => handle_stream_reset(assoc, &event),
        other => {
            info!(id = assoc.id(), event = ?other, "engine event");
        }
    }
}

fn handle_association_change(assoc: &Association, change: &AssocChange) {
    match change.state {
        AssocChangeState::CommUp => {
            assoc.handle_established(change.session_id);
        }
        AssocChangeState::CommLost | AssocChangeState::ShutdownComplete => {
            info!(id = assoc.id(), state = ?change.state, "association torn down by peer");
            // The engine already tore the session down; skip the
            // graceful handshake
            assoc.disconnect(false);
        }
        AssocChangeState::Restart => {
            info!(id = assoc.id(), "association restarted");
            assoc.emit_restart();
        }
        AssocChangeState::CannotStart => {
            info!(id = assoc.id(), "engine could not start the association");
        }
    }
}

fn handle_stream_reset(assoc: &Association, event: &StreamResetEvent) {
    if event.is_denied() || !event.is_incoming() {
        return;
    }
    for stream_id in &event.streams {
        assoc.emit_stream_reset(*stream_id);
    }
}
