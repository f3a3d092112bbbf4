use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::agent::AgentId;
use super::events::{FailureReason, OverseerEvent};
use super::merkle::digest;

/// Caller-assigned task identifier
///
/// Must be unique among outstanding tasks; the coordinator rejects a second
/// live dispatch under the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Task id cannot be empty".to_string());
        }
        Ok(Self(id))
    }

    /// Fresh random id for callers that do not assign their own
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TaskId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A unit of work; immutable after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    id: TaskId,
    payload: Vec<u8>,
    created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, payload: impl Into<Vec<u8>>) -> Self {
        Self::new_at(id, payload, Utc::now())
    }

    pub fn new_at(id: TaskId, payload: impl Into<Vec<u8>>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            payload: payload.into(),
            created_at,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Lifecycle of a dispatched task
///
/// # Status Transitions
/// ```text
/// Pending  -> Acked -> Completed
///    |          └----> Failed (cancel)
///    ├-> Completed
///    ├-> Failed
///    └-> TimedOut -> Pending (retry) | Completed | Failed
/// ```
///
/// Pending, Acked and TimedOut are live; Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    /// Sent, awaiting acknowledgement before the deadline
    Pending,
    /// The agent confirmed receipt
    Acked,
    Completed,
    Failed,
    /// Silent past the deadline and the retry could not be placed yet
    TimedOut,
}

impl DispatchState {
    /// Checks if a transition from current state to next state is valid
    ///
    /// # Example
    /// ```
    /// use swarm_overseer::domain::task::DispatchState;
    ///
    /// assert!(DispatchState::Pending.can_transition_to(DispatchState::Acked));
    /// assert!(!DispatchState::Completed.can_transition_to(DispatchState::Acked));
    /// ```
    pub fn can_transition_to(&self, next: DispatchState) -> bool {
        use DispatchState::*;
        matches!(
            (self, next),
            (Pending, Acked)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, TimedOut)
                | (Acked, Completed)
                | (Acked, Failed)
                | (TimedOut, Pending)
                | (TimedOut, Completed)
                | (TimedOut, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Failed)
    }

    pub fn is_live(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchState::Pending => write!(f, "pending"),
            DispatchState::Acked => write!(f, "acked"),
            DispatchState::Completed => write!(f, "completed"),
            DispatchState::Failed => write!(f, "failed"),
            DispatchState::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Tracking record of one outstanding (or recently finished) task
///
/// # Invariants
/// - `attempts` counts sends the transport accepted, starting at 1
/// - `finished_at` is set exactly when the state is terminal
/// - State changes follow [`DispatchState::can_transition_to`]
#[derive(Debug, Clone, Serialize)]
pub struct DispatchRecord {
    task: Task,
    target_agent: AgentId,
    state: DispatchState,
    attempts: u32,
    deadline: DateTime<Utc>,
    result: Option<Vec<u8>>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl DispatchRecord {
    /// Creates the Pending record for a send the transport accepted
    ///
    /// # Returns
    /// The record together with its `task-dispatched` event
    pub fn dispatched(
        task: Task,
        target_agent: AgentId,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> (Self, OverseerEvent) {
        let record = Self {
            task,
            target_agent,
            state: DispatchState::Pending,
            attempts: 1,
            deadline,
            result: None,
            updated_at: now,
            finished_at: None,
        };

        let event = OverseerEvent::TaskDispatched {
            task_id: record.task.id.clone(),
            agent_id: record.target_agent.clone(),
            attempt: record.attempts,
            deadline,
        };

        (record, event)
    }

    fn transition(&mut self, next: DispatchState, now: DateTime<Utc>) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!(
                "Cannot move task {} from {} to {}",
                self.task.id, self.state, next
            ));
        }

        self.state = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Pending -> Acked
    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> Result<OverseerEvent, String> {
        self.transition(DispatchState::Acked, now)?;

        Ok(OverseerEvent::TaskAcked {
            task_id: self.task.id.clone(),
            agent_id: self.target_agent.clone(),
        })
    }

    /// Stores the result and moves to Completed
    pub fn complete(
        &mut self,
        result: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<OverseerEvent, String> {
        self.transition(DispatchState::Completed, now)?;

        let result_digest = hex::encode(digest(&result));
        self.result = Some(result.clone());

        Ok(OverseerEvent::TaskCompleted {
            task_id: self.task.id.clone(),
            agent_id: self.target_agent.clone(),
            result,
            result_digest,
        })
    }

    pub fn fail(
        &mut self,
        reason: FailureReason,
        now: DateTime<Utc>,
    ) -> Result<OverseerEvent, String> {
        self.transition(DispatchState::Failed, now)?;

        Ok(OverseerEvent::TaskFailed {
            task_id: self.task.id.clone(),
            agent_id: self.target_agent.clone(),
            attempts: self.attempts,
            reason,
        })
    }

    /// Silent past the deadline, but no resend could be placed yet
    ///
    /// Nothing was sent, so the attempt count stays as it is.
    pub fn time_out(&mut self, now: DateTime<Utc>) -> Result<(), String> {
        if self.state != DispatchState::TimedOut {
            self.transition(DispatchState::TimedOut, now)?;
        }
        self.updated_at = now;
        Ok(())
    }

    /// Counts a retry attempt sent to `agent` with a fresh deadline
    pub fn retry(
        &mut self,
        agent: AgentId,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<OverseerEvent, String> {
        if !matches!(self.state, DispatchState::Pending | DispatchState::TimedOut) {
            return Err(format!(
                "Cannot retry task {} in {} state",
                self.task.id, self.state
            ));
        }
        if self.state == DispatchState::TimedOut {
            self.transition(DispatchState::Pending, now)?;
        }

        let previous_agent = std::mem::replace(&mut self.target_agent, agent);
        self.attempts += 1;
        self.deadline = deadline;
        self.updated_at = now;

        Ok(OverseerEvent::TaskRetried {
            task_id: self.task.id.clone(),
            previous_agent,
            agent_id: self.target_agent.clone(),
            attempt: self.attempts,
            deadline,
        })
    }

    /// A Pending record past its deadline, or a TimedOut one awaiting placement
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            DispatchState::Pending => now >= self.deadline,
            DispatchState::TimedOut => true,
            _ => false,
        }
    }

    /// Terminal and older than the retention window
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.finished_at
            .map_or(false, |finished| finished + retention <= now)
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task.id
    }

    pub fn target_agent(&self) -> &AgentId {
        &self.target_agent
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    pub fn result(&self) -> Option<&[u8]> {
        self.result.as_deref()
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }
}
