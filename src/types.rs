/*!
Core types shared across the association manager.

This module defines the association state machine's states and the
per-message partial reliability policies.
*/

use std::fmt;

#[cfg(feature = "serde-support")]
use serde::{Deserialize, Serialize};

/// Identifier of one association, unique within a registry
pub type AssociationId = u32;

/// Session identifier assigned by the transport engine once an
/// association is established
pub type SessionId = u32;

/// Lifecycle state of an association
///
/// States progress `New` → `Ready` → `Connecting` → `Connected` →
/// `Disconnecting` → `Disconnected`, with `Connecting` reachable again
/// from `Disconnected` on restart. `Error` is entered when socket
/// creation fails during `start()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum AssociationState {
    /// Freshly created, ports and observers not yet configured
    New,
    /// Fully configured and ready to be started
    Ready,
    /// A connection attempt is in flight
    Connecting,
    /// The engine reported the association established
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// Torn down; `start()` may be called again
    Disconnected,
    /// Socket creation failed
    Error,
}

impl AssociationState {
    /// Whether `start()` is permitted in this state
    pub fn can_start(self) -> bool {
        matches!(self, AssociationState::Ready | AssociationState::Disconnected)
    }

    /// Whether configuration (ports) may still be changed
    pub fn is_configurable(self) -> bool {
        self == AssociationState::New
    }
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssociationState::New => write!(f, "new"),
            AssociationState::Ready => write!(f, "ready"),
            AssociationState::Connecting => write!(f, "connecting"),
            AssociationState::Connected => write!(f, "connected"),
            AssociationState::Disconnecting => write!(f, "disconnecting"),
            AssociationState::Disconnected => write!(f, "disconnected"),
            AssociationState::Error => write!(f, "error"),
        }
    }
}

/// Per-message partial reliability policy
///
/// With `None` the message is delivered reliably. The other policies
/// relax delivery: drop after a time-to-live, after a number of
/// retransmissions, or when the send buffer exceeds a byte limit. The
/// accompanying parameter is carried in [`SendInfo`] in network byte
/// order.
///
/// [`SendInfo`]: crate::engine::SendInfo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-support", derive(Serialize, Deserialize))]
pub enum ReliabilityPolicy {
    /// Fully reliable delivery
    None,
    /// Abandon the message after the given lifetime in milliseconds
    TimeToLive,
    /// Abandon the message after the given number of retransmissions
    MaxRetransmits,
    /// Abandon the message once buffered bytes exceed the given limit
    MaxBuffered,
}

impl fmt::Display for ReliabilityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReliabilityPolicy::None => write!(f, "none"),
            ReliabilityPolicy::TimeToLive => write!(f, "ttl"),
            ReliabilityPolicy::MaxRetransmits => write!(f, "rtx"),
            ReliabilityPolicy::MaxBuffered => write!(f, "buf"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_permitted_states() {
        assert!(AssociationState::Ready.can_start());
        assert!(AssociationState::Disconnected.can_start());

        assert!(!AssociationState::New.can_start());
        assert!(!AssociationState::Connecting.can_start());
        assert!(!AssociationState::Connected.can_start());
        assert!(!AssociationState::Disconnecting.can_start());
        assert!(!AssociationState::Error.can_start());
    }

    #[test]
    fn test_only_new_is_configurable() {
        assert!(AssociationState::New.is_configurable());
        assert!(!AssociationState::Ready.is_configurable());
        assert!(!AssociationState::Disconnected.is_configurable());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(AssociationState::Connecting.to_string(), "connecting");
        assert_eq!(AssociationState::Error.to_string(), "error");
    }
}
