use thiserror::Error;

use transport::TransportError;
use transport_codecs::CodecError;

use crate::id::UniqueId;

pub type WorldResult<T> = Result<T, WorldError>;

/// Recoverable errors surfaced by world operations.
///
/// Invariant violations never show up here; they abort the process group
/// through [`World::fatal`](crate::World::fatal).
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("no object registered under {0}")]
    NotFound(UniqueId),

    #[error("world {0} is not active in this process")]
    UnknownWorld(u64),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Failure carried by a [`Future`](crate::Future).
///
/// Cloneable so every dependent task can observe the same failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("dependency failed: {0}")]
    Dependency(Box<TaskError>),
}

impl TaskError {
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::Failed(msg.into())
    }

    /// Walks through dependency wrappers to the failure that started the chain.
    pub fn root_cause(&self) -> &TaskError {
        match self {
            TaskError::Dependency(inner) => inner.root_cause(),
            other => other,
        }
    }
}
