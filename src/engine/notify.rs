/*!
Notification frame wire format.

The engine reports asynchronous events as serialized frames on its
receive path. Every frame starts with an 8-byte header:

- Kind (2 bytes, big-endian): event class, same numbering as
  [`EventType`](super::EventType)
- Flags (2 bytes, big-endian): kind-specific flag bits
- Length (4 bytes, big-endian): total frame length including the
  header; must match the delivered buffer exactly

An association-change frame carries a 12-byte body: change state,
error code, outbound and inbound stream counts (2 bytes each) and the
engine-assigned session id (4 bytes). A stream-reset frame carries the
session id (4 bytes) followed by the affected stream ids (2 bytes
each); its direction and outcome are in the header flags. The
remaining kinds carry no body this crate reads.
*/

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::types::SessionId;

/// Size of the fixed notification header
pub const HEADER_SIZE: usize = 8;

const ASSOC_CHANGE_BODY_SIZE: usize = 12;

/// Stream-reset flag: the reset concerns the incoming direction
pub const STREAM_RESET_INCOMING: u16 = 0x0001;
/// Stream-reset flag: the reset concerns the outgoing direction
pub const STREAM_RESET_OUTGOING: u16 = 0x0002;
/// Stream-reset flag: the peer denied the reset request
pub const STREAM_RESET_DENIED: u16 = 0x0004;
/// Stream-reset flag: the reset request failed
pub const STREAM_RESET_FAILED: u16 = 0x0008;

/// Error parsing a notification frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification frame truncated ({0} bytes)")]
    Truncated(usize),

    #[error("header length {header} does not match frame length {actual}")]
    LengthMismatch { header: u32, actual: usize },

    #[error("unknown notification kind {0:#06x}")]
    UnknownKind(u16),

    #[error("unknown association change state {0}")]
    UnknownChangeState(u16),
}

/// Sub-state of an association-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum AssocChangeState {
    /// The association is established
    CommUp = 1,
    /// Communication with the peer was lost
    CommLost = 2,
    /// The peer restarted the association
    Restart = 3,
    /// The shutdown handshake completed
    ShutdownComplete = 4,
    /// The engine could not start the association
    CannotStart = 5,
}

impl AssocChangeState {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(AssocChangeState::CommUp),
            2 => Some(AssocChangeState::CommLost),
            3 => Some(AssocChangeState::Restart),
            4 => Some(AssocChangeState::ShutdownComplete),
            5 => Some(AssocChangeState::CannotStart),
            _ => None,
        }
    }
}

/// Body of an association-change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssocChange {
    pub state: AssocChangeState,
    pub error: u16,
    pub outbound_streams: u16,
    pub inbound_streams: u16,
    pub session_id: SessionId,
}

/// Body of a stream-reset notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamResetEvent {
    pub flags: u16,
    pub session_id: SessionId,
    /// Affected stream ids, in the order the engine listed them
    pub streams: Vec<u16>,
}

impl StreamResetEvent {
    pub fn is_incoming(&self) -> bool {
        self.flags & STREAM_RESET_INCOMING != 0
    }

    pub fn is_outgoing(&self) -> bool {
        self.flags & STREAM_RESET_OUTGOING != 0
    }

    pub fn is_denied(&self) -> bool {
        self.flags & STREAM_RESET_DENIED != 0
    }

    pub fn is_failed(&self) -> bool {
        self.flags & STREAM_RESET_FAILED != 0
    }
}

/// A parsed notification frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    AssociationChange(AssocChange),
    StreamReset(StreamResetEvent),
    PeerAddressChange,
    RemoteError,
    SendFailed,
    ShutdownEvent,
    AdaptationIndication,
    StreamChange,
}

impl Notification {
    /// Wire kind of this notification
    pub fn kind(&self) -> u16 {
        match self {
            Notification::AssociationChange(_) => 0x0001,
            Notification::PeerAddressChange => 0x0002,
            Notification::RemoteError => 0x0003,
            Notification::SendFailed => 0x0004,
            Notification::ShutdownEvent => 0x0005,
            Notification::AdaptationIndication => 0x0006,
            Notification::StreamReset(_) => 0x0009,
            Notification::StreamChange => 0x000d,
        }
    }

    /// Parse a frame, validating the header length field
    pub fn parse(buf: &[u8]) -> Result<Self, NotifyError> {
        if buf.len() < HEADER_SIZE {
            return Err(NotifyError::Truncated(buf.len()));
        }

        let kind = BigEndian::read_u16(&buf[0..2]);
        let flags = BigEndian::read_u16(&buf[2..4]);
        let length = BigEndian::read_u32(&buf[4..8]);
        if length as usize != buf.len() {
            return Err(NotifyError::LengthMismatch { header: length, actual: buf.len() });
        }

        let body = &buf[HEADER_SIZE..];
        match kind {
            0x0001 => {
                if body.len() < ASSOC_CHANGE_BODY_SIZE {
                    return Err(NotifyError::Truncated(buf.len()));
                }
                let state = BigEndian::read_u16(&body[0..2]);
                let state = AssocChangeState::from_u16(state)
                    .ok_or(NotifyError::UnknownChangeState(state))?;
                Ok(Notification::AssociationChange(AssocChange {
                    state,
                    error: BigEndian::read_u16(&body[2..4]),
                    outbound_streams: BigEndian::read_u16(&body[4..6]),
                    inbound_streams: BigEndian::read_u16(&body[6..8]),
                    session_id: BigEndian::read_u32(&body[8..12]),
                }))
            }
            0x0002 => Ok(Notification::PeerAddressChange),
            0x0003 => Ok(Notification::RemoteError),
            0x0004 => Ok(Notification::SendFailed),
            0x0005 => Ok(Notification::ShutdownEvent),
            0x0006 => Ok(Notification::AdaptationIndication),
            0x0009 => {
                if body.len() < 4 {
                    return Err(NotifyError::Truncated(buf.len()));
                }
                let session_id = BigEndian::read_u32(&body[0..4]);
                let list = &body[4..];
                let streams = list
                    .chunks_exact(2)
                    .map(BigEndian::read_u16)
                    .collect();
                Ok(Notification::StreamReset(StreamResetEvent { flags, session_id, streams }))
            }
            0x000d => Ok(Notification::StreamChange),
            other => Err(NotifyError::UnknownKind(other)),
        }
    }

    /// Serialize the frame, filling in the header length
    pub fn to_bytes(&self) -> Bytes {
        let (flags, body_len) = match self {
            Notification::AssociationChange(_) => (0u16, ASSOC_CHANGE_BODY_SIZE),
            Notification::StreamReset(ev) => (ev.flags, 4 + 2 * ev.streams.len()),
            _ => (0u16, 0),
        };

        let total = HEADER_SIZE + body_len;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16(self.kind());
        buf.put_u16(flags);
        buf.put_u32(total as u32);

        match self {
            Notification::AssociationChange(c) => {
                buf.put_u16(c.state as u16);
                buf.put_u16(c.error);
                buf.put_u16(c.outbound_streams);
                buf.put_u16(c.inbound_streams);
                buf.put_u32(c.session_id);
            }
            Notification::StreamReset(ev) => {
                buf.put_u32(ev.session_id);
                for stream in &ev.streams {
                    buf.put_u16(*stream);
                }
            }
            _ => {}
        }

        buf.freeze()
    }
}

/// Shorthand for an association-change frame with only the fields the
/// dispatcher reads
pub fn assoc_change(state: AssocChangeState, session_id: SessionId) -> Notification {
    Notification::AssociationChange(AssocChange {
        state,
        error: 0,
        outbound_streams: 0,
        inbound_streams: 0,
        session_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assoc_change_frame() {
        let frame = Notification::AssociationChange(AssocChange {
            state: AssocChangeState::CommUp,
            error: 0,
            outbound_streams: 32,
            inbound_streams: 16,
            session_id: 7,
        });
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + 12);

        let parsed = Notification::parse(&bytes).unwrap();
        match parsed {
            Notification::AssociationChange(c) => {
                assert_eq!(c.state, AssocChangeState::CommUp);
                assert_eq!(c.outbound_streams, 32);
                assert_eq!(c.inbound_streams, 16);
                assert_eq!(c.session_id, 7);
            }
            other => panic!("expected association change, got {:?}", other),
        }
    }

    #[test]
    fn test_stream_reset_frame_preserves_order() {
        let frame = Notification::StreamReset(StreamResetEvent {
            flags: STREAM_RESET_INCOMING,
            session_id: 3,
            streams: vec![2, 7],
        });
        let parsed = Notification::parse(&frame.to_bytes()).unwrap();
        match parsed {
            Notification::StreamReset(ev) => {
                assert!(ev.is_incoming());
                assert!(!ev.is_denied());
                assert_eq!(ev.streams, vec![2, 7]);
            }
            other => panic!("expected stream reset, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let err = Notification::parse(&[0, 1, 0]).unwrap_err();
        assert_eq!(err, NotifyError::Truncated(3));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut bytes = BytesMut::from(&assoc_change(AssocChangeState::CommUp, 1).to_bytes()[..]);
        // Corrupt the length field
        bytes[7] = 0xff;
        let err = Notification::parse(&bytes).unwrap_err();
        assert!(matches!(err, NotifyError::LengthMismatch { .. }));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let mut buf = BytesMut::new();
        buf.put_u16(0x00aa);
        buf.put_u16(0);
        buf.put_u32(HEADER_SIZE as u32);
        let err = Notification::parse(&buf).unwrap_err();
        assert_eq!(err, NotifyError::UnknownKind(0x00aa));
    }
}
