use thiserror::Error;

use crate::domain::ports::{LedgerError, TransportError};
use crate::domain::task::TaskId;

/// Errors surfaced by the overseer core
#[derive(Debug, Error)]
pub enum OverseerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid snapshot: {0}")]
    SnapshotInvalid(String),

    #[error("No available agent")]
    NoAvailableAgent,

    #[error("Duplicate task id: {0}")]
    DuplicateTaskId(TaskId),

    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Swarm is marked inactive on the ledger")]
    SwarmInactive,
}

impl From<LedgerError> for OverseerError {
    fn from(err: LedgerError) -> Self {
        OverseerError::Network(err.to_string())
    }
}

impl From<TransportError> for OverseerError {
    fn from(err: TransportError) -> Self {
        OverseerError::Network(err.to_string())
    }
}

pub type OverseerResult<T> = Result<T, OverseerError>;
