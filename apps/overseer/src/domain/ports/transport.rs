use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::AgentAddress;
use crate::domain::task::{Task, TaskId};

/// What an agent receives for each send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub task_id: TaskId,
    pub payload: Vec<u8>,
    pub attempt: u32,
    pub deadline: DateTime<Utc>,
}

impl TaskEnvelope {
    pub fn new(task: &Task, attempt: u32, deadline: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id().clone(),
            payload: task.payload().to_vec(),
            attempt,
            deadline,
        }
    }
}

/// Failures handing work to an agent
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Agent at {address} rejected the send: {reason}")]
    Rejected { address: String, reason: String },

    #[error("Transport unreachable: {0}")]
    Unreachable(String),
}

/// Delivery of task envelopes to agents
///
/// `send` resolves once the transport has accepted the envelope, not when the
/// agent finishes. Acknowledgements and results come back separately through
/// the overseer's `on_ack` and `on_complete`. Those callbacks may only
/// arrive after `send` returns.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, address: &AgentAddress, envelope: &TaskEnvelope)
        -> Result<(), TransportError>;
}
