//! Error handling helpers for the transport crate.
//!
//! The substrate keeps its error surface small: addressing mistakes, peers
//! that went away, and group-wide aborts. Callers one layer up decide whether
//! any of these is recoverable; the world runtime treats all of them as fatal.

use std::fmt;

use crate::Rank;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by communicator operations.
pub enum TransportError {
    /// Destination rank is outside the communicator.
    InvalidRank { rank: Rank, size: usize },
    /// The destination process dropped its endpoint.
    Disconnected { rank: Rank },
    /// Some process in the universe aborted the group.
    Aborted { reason: String },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidRank { rank, size } => {
                write!(f, "rank {rank} is outside communicator of size {size}")
            }
            TransportError::Disconnected { rank } => {
                write!(f, "rank {rank} closed its endpoint")
            }
            TransportError::Aborted { reason } => {
                write!(f, "process group aborted: {reason}")
            }
        }
    }
}

impl std::error::Error for TransportError {}
