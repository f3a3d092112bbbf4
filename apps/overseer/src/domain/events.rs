use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use super::agent::AgentId;
use super::merkle::MerkleRoot;
use super::task::TaskId;

/// Names under which listeners register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    StateChanged,
    TaskDispatched,
    TaskAcked,
    TaskCompleted,
    TaskRetried,
    TaskFailed,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::StateChanged,
        EventKind::TaskDispatched,
        EventKind::TaskAcked,
        EventKind::TaskCompleted,
        EventKind::TaskRetried,
        EventKind::TaskFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StateChanged => "state-changed",
            EventKind::TaskDispatched => "task-dispatched",
            EventKind::TaskAcked => "task-acked",
            EventKind::TaskCompleted => "task-completed",
            EventKind::TaskRetried => "task-retried",
            EventKind::TaskFailed => "task-failed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| format!("Unknown event name: {}", name))
    }
}

/// Why a dispatch ended in Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The agent stayed silent through every allowed attempt
    AttemptsExhausted,
    /// The caller forced the record to fail
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::AttemptsExhausted => write!(f, "attempts exhausted"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Notifications delivered through the event bus
///
/// # Example
/// ```
/// use swarm_overseer::domain::events::{EventKind, OverseerEvent};
/// use swarm_overseer::domain::agent::AgentId;
/// use swarm_overseer::domain::task::TaskId;
///
/// let event = OverseerEvent::TaskAcked {
///     task_id: TaskId::new("t-1").unwrap(),
///     agent_id: AgentId::new("a-1").unwrap(),
/// };
/// assert_eq!(event.kind(), EventKind::TaskAcked);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum OverseerEvent {
    /// A sync observed a new Merkle root
    StateChanged {
        previous_root: Option<MerkleRoot>,
        root: MerkleRoot,
        agent_count: usize,
        added: Vec<AgentId>,
        evicted: Vec<AgentId>,
    },
    /// The transport accepted the first send of a task
    TaskDispatched {
        task_id: TaskId,
        agent_id: AgentId,
        attempt: u32,
        deadline: DateTime<Utc>,
    },
    TaskAcked {
        task_id: TaskId,
        agent_id: AgentId,
    },
    /// The agent reported a result; `result_digest` is its hex SHA-256
    TaskCompleted {
        task_id: TaskId,
        agent_id: AgentId,
        result: Vec<u8>,
        result_digest: String,
    },
    /// A silent task was resent to another agent
    TaskRetried {
        task_id: TaskId,
        previous_agent: AgentId,
        agent_id: AgentId,
        attempt: u32,
        deadline: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        agent_id: AgentId,
        attempts: u32,
        reason: FailureReason,
    },
}

impl OverseerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            OverseerEvent::StateChanged { .. } => EventKind::StateChanged,
            OverseerEvent::TaskDispatched { .. } => EventKind::TaskDispatched,
            OverseerEvent::TaskAcked { .. } => EventKind::TaskAcked,
            OverseerEvent::TaskCompleted { .. } => EventKind::TaskCompleted,
            OverseerEvent::TaskRetried { .. } => EventKind::TaskRetried,
            OverseerEvent::TaskFailed { .. } => EventKind::TaskFailed,
        }
    }

    /// Returns the task this event concerns, if any
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            OverseerEvent::StateChanged { .. } => None,
            OverseerEvent::TaskDispatched { task_id, .. }
            | OverseerEvent::TaskAcked { task_id, .. }
            | OverseerEvent::TaskCompleted { task_id, .. }
            | OverseerEvent::TaskRetried { task_id, .. }
            | OverseerEvent::TaskFailed { task_id, .. } => Some(task_id),
        }
    }
}
