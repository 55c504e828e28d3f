/*!
Error handling for the association manager.
*/

use thiserror::Error;

use crate::engine::EngineError;
use crate::types::AssociationState;

/// Result type for association operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for association operations
#[derive(Error, Debug)]
pub enum Error {
    /// The operation is not valid in the association's current state
    #[error("operation not valid in state {0}")]
    InvalidState(AssociationState),

    /// The transport engine reported a failure
    #[error("transport engine error: {0}")]
    Engine(#[from] EngineError),

    /// The engine's send buffer is full; the caller owns the retry
    #[error("send would block")]
    Backpressure,
}
