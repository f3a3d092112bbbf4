use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::{OverseerError, OverseerResult};
use super::event_bus::EventBus;
use super::registry::{AgentRegistry, SelectionPolicy};
use crate::domain::events::FailureReason;
use crate::domain::ports::{TaskEnvelope, Transport};
use crate::domain::task::{DispatchRecord, DispatchState, Task, TaskId};

/// Knobs for dispatch and retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Time an agent has to acknowledge before the task counts as silent
    pub dispatch_timeout: Duration,
    /// Total sends allowed per task, the first one included
    pub max_attempts: u32,
    /// How long terminal records stay queryable
    pub record_retention: Duration,
    pub policy: SelectionPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            dispatch_timeout: Duration::seconds(30),
            max_attempts: 3,
            record_retention: Duration::seconds(300),
            policy: SelectionPolicy::default(),
        }
    }
}

/// What one `check_timeouts` pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeoutReport {
    /// Resent to a fresh agent
    pub retried: Vec<TaskId>,
    /// Out of attempts, now Failed
    pub failed: Vec<TaskId>,
    /// Silent, but no agent accepted the resend yet; retried next pass
    pub stalled: Vec<TaskId>,
    /// Terminal records dropped after their retention window
    pub evicted: usize,
}

/// Assigns tasks to agents and follows them until they finish
///
/// Holds one record per task id. Records stay live while Pending, Acked or
/// TimedOut; terminal records are kept for re-query until retention expires.
pub struct DispatchCoordinator {
    transport: Arc<dyn Transport>,
    settings: DispatchSettings,
    records: HashMap<TaskId, DispatchRecord>,
}

impl DispatchCoordinator {
    pub fn new(transport: Arc<dyn Transport>, settings: DispatchSettings) -> Self {
        Self {
            transport,
            settings,
            records: HashMap::new(),
        }
    }

    /// Send a task to a selected agent
    ///
    /// Suspends only until the transport accepts the send. No record exists
    /// until then, so dropping the future beforehand cancels cleanly.
    ///
    /// # Errors
    /// * `DuplicateTaskId` - A live record already uses this id
    /// * `NoAvailableAgent` - Every agent is Busy or Unreachable
    /// * `Network` - The transport refused the send
    pub async fn dispatch(
        &mut self,
        task: Task,
        registry: &mut AgentRegistry,
        bus: &EventBus,
        now: DateTime<Utc>,
    ) -> OverseerResult<DispatchRecord> {
        if self.is_live(task.id()) {
            return Err(OverseerError::DuplicateTaskId(task.id().clone()));
        }

        let (agent_id, address) = registry
            .select_for_dispatch(self.settings.policy, None)
            .map(|agent| (agent.id().clone(), agent.address().clone()))
            .ok_or(OverseerError::NoAvailableAgent)?;

        let deadline = now + self.settings.dispatch_timeout;
        let envelope = TaskEnvelope::new(&task, 1, deadline);

        self.transport
            .send(&address, &envelope)
            .await
            .map_err(|err| {
                warn!(task = %task.id(), agent = %agent_id, error = %err, "Dispatch send failed");
                OverseerError::from(err)
            })?;

        registry.mark_dispatched(&agent_id, now);
        let (record, event) = DispatchRecord::dispatched(task, agent_id, deadline, now);
        info!(task = %record.task_id(), agent = %record.target_agent(), %deadline, "Task dispatched");

        self.records.insert(record.task_id().clone(), record.clone());
        bus.emit(&event);
        Ok(record)
    }

    /// Pending -> Acked; repeated or late acknowledgements are ignored
    pub fn on_ack(
        &mut self,
        task_id: &TaskId,
        bus: &EventBus,
        now: DateTime<Utc>,
    ) -> OverseerResult<DispatchRecord> {
        let record = self
            .records
            .get_mut(task_id)
            .ok_or_else(|| OverseerError::UnknownTask(task_id.clone()))?;

        match record.acknowledge(now) {
            Ok(event) => {
                debug!(task = %task_id, agent = %record.target_agent(), "Task acknowledged");
                bus.emit(&event);
            }
            Err(reason) => debug!(task = %task_id, %reason, "Ignoring acknowledgement"),
        }
        Ok(record.clone())
    }

    /// Record a result; a second completion for a finished task is a no-op
    pub fn on_complete(
        &mut self,
        task_id: &TaskId,
        result: Vec<u8>,
        registry: &mut AgentRegistry,
        bus: &EventBus,
        now: DateTime<Utc>,
    ) -> OverseerResult<DispatchRecord> {
        let record = self
            .records
            .get_mut(task_id)
            .ok_or_else(|| OverseerError::UnknownTask(task_id.clone()))?;

        let was_holding_agent = record.state() != DispatchState::TimedOut;
        match record.complete(result, now) {
            Ok(event) => {
                if was_holding_agent {
                    registry.release(record.target_agent());
                }
                info!(task = %task_id, agent = %record.target_agent(), "Task completed");
                bus.emit(&event);
            }
            Err(reason) => debug!(task = %task_id, %reason, "Ignoring completion"),
        }
        Ok(record.clone())
    }

    /// Force a live record to Failed
    pub fn cancel(
        &mut self,
        task_id: &TaskId,
        registry: &mut AgentRegistry,
        bus: &EventBus,
        now: DateTime<Utc>,
    ) -> OverseerResult<DispatchRecord> {
        let record = self
            .records
            .get_mut(task_id)
            .ok_or_else(|| OverseerError::UnknownTask(task_id.clone()))?;

        let was_holding_agent = record.state() != DispatchState::TimedOut;
        match record.fail(FailureReason::Cancelled, now) {
            Ok(event) => {
                if was_holding_agent {
                    registry.release(record.target_agent());
                }
                info!(task = %task_id, "Task cancelled");
                bus.emit(&event);
            }
            Err(reason) => debug!(task = %task_id, %reason, "Ignoring cancel"),
        }
        Ok(record.clone())
    }

    /// Retry or fail every silent record, then drop expired terminal ones
    ///
    /// A Pending record past its deadline is silent. With attempts left it is
    /// resent to another agent under the same id and a fresh deadline;
    /// otherwise it becomes Failed and its agent is marked Unreachable.
    /// Attempts count accepted sends only: when no agent takes the resend the
    /// record waits in TimedOut and placement is tried again on every pass.
    pub async fn check_timeouts(
        &mut self,
        registry: &mut AgentRegistry,
        bus: &EventBus,
        now: DateTime<Utc>,
    ) -> TimeoutReport {
        let mut report = TimeoutReport::default();

        let mut due: Vec<(DateTime<Utc>, TaskId)> = self
            .records
            .values()
            .filter(|record| record.is_due(now))
            .map(|record| (record.deadline(), record.task_id().clone()))
            .collect();
        due.sort();

        for (_, task_id) in due {
            let Some(record) = self.records.get_mut(&task_id) else {
                continue;
            };
            let previous = record.target_agent().clone();
            let silent_agent = record.state() == DispatchState::Pending;

            if silent_agent && record.attempts() >= self.settings.max_attempts {
                if let Ok(event) = record.fail(FailureReason::AttemptsExhausted, now) {
                    registry.mark_unreachable(&previous);
                    warn!(task = %task_id, attempts = record.attempts(), "Task failed after silent retries");
                    bus.emit(&event);
                    report.failed.push(task_id);
                }
                continue;
            }

            if silent_agent {
                registry.release(&previous);
            }

            let target = registry
                .select_for_dispatch(self.settings.policy, Some(&previous))
                .map(|agent| (agent.id().clone(), agent.address().clone()));

            let Some((agent_id, address)) = target else {
                warn!(task = %task_id, "No agent available for retry");
                let _ = record.time_out(now);
                report.stalled.push(task_id);
                continue;
            };

            let deadline = now + self.settings.dispatch_timeout;
            let envelope = TaskEnvelope::new(record.task(), record.attempts() + 1, deadline);

            match self.transport.send(&address, &envelope).await {
                Ok(()) => {
                    registry.mark_dispatched(&agent_id, now);
                    if let Ok(event) = record.retry(agent_id, deadline, now) {
                        info!(
                            task = %task_id,
                            agent = %record.target_agent(),
                            attempt = record.attempts(),
                            "Task retried"
                        );
                        bus.emit(&event);
                        report.retried.push(task_id);
                    }
                }
                Err(err) => {
                    warn!(task = %task_id, agent = %agent_id, error = %err, "Retry send failed");
                    let _ = record.time_out(now);
                    report.stalled.push(task_id);
                }
            }
        }

        report.evicted = self.evict_expired(now);
        report
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let retention = self.settings.record_retention;
        let before = self.records.len();
        self.records
            .retain(|_, record| !record.is_expired(now, retention));
        let evicted = before - self.records.len();
        if evicted > 0 {
            debug!(evicted, "Evicted finished dispatch records");
        }
        evicted
    }

    pub fn record(&self, task_id: &TaskId) -> Option<&DispatchRecord> {
        self.records.get(task_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &DispatchRecord> {
        self.records.values()
    }

    fn is_live(&self, task_id: &TaskId) -> bool {
        self.records
            .get(task_id)
            .map_or(false, |record| record.state().is_live())
    }

    pub fn live_count(&self) -> usize {
        self.records
            .values()
            .filter(|record| record.state().is_live())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentAddress, AgentEntry, AgentId, AgentStatus};
    use crate::domain::events::{EventKind, OverseerEvent};
    use crate::infrastructure::memory::RecordingTransport;
    use std::sync::Mutex;

    fn entry(id: &str) -> AgentEntry {
        AgentEntry::new(
            AgentId::new(id).unwrap(),
            AgentAddress::new(format!("mem://{}", id)).unwrap(),
        )
    }

    fn id(s: &str) -> AgentId {
        AgentId::new(s).unwrap()
    }

    fn task(s: &str) -> Task {
        Task::new(TaskId::new(s).unwrap(), s.as_bytes().to_vec())
    }

    fn setup(agents: &[&str]) -> (DispatchCoordinator, AgentRegistry, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::new());
        let coordinator = DispatchCoordinator::new(transport.clone(), DispatchSettings::default());
        let mut registry = AgentRegistry::new(3);
        let entries: Vec<AgentEntry> = agents.iter().map(|a| entry(a)).collect();
        registry.apply_snapshot(&entries, Utc::now());
        (coordinator, registry, transport)
    }

    fn recording_bus(kind: EventKind) -> (EventBus, Arc<Mutex<Vec<OverseerEvent>>>) {
        let mut bus = EventBus::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        bus.on(kind, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        (bus, events)
    }

    #[tokio::test]
    async fn dispatch_without_agents_fails() {
        let (mut coordinator, mut registry, transport) = setup(&[]);
        let bus = EventBus::new();

        let err = coordinator
            .dispatch(task("t1"), &mut registry, &bus, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, OverseerError::NoAvailableAgent));
        assert!(transport.sent().is_empty());
        assert!(coordinator.record(&TaskId::new("t1").unwrap()).is_none());
    }

    #[tokio::test]
    async fn dispatch_creates_pending_record_and_marks_agent_busy() {
        let (mut coordinator, mut registry, transport) = setup(&["a"]);
        let (bus, events) = recording_bus(EventKind::TaskDispatched);
        let now = Utc::now();

        let record = coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();

        assert_eq!(record.state(), DispatchState::Pending);
        assert_eq!(record.deadline(), now + Duration::seconds(30));
        assert_eq!(registry.get(&id("a")).unwrap().status(), AgentStatus::Busy);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(coordinator.live_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_live_task_id_is_rejected_without_mutation() {
        let (mut coordinator, mut registry, transport) = setup(&["a", "b"]);
        let bus = EventBus::new();
        let now = Utc::now();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        let err = coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap_err();

        assert!(matches!(err, OverseerError::DuplicateTaskId(_)));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(registry.available_count(), 1);
    }

    #[tokio::test]
    async fn finished_task_id_can_be_dispatched_again() {
        let (mut coordinator, mut registry, _) = setup(&["a"]);
        let bus = EventBus::new();
        let now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        coordinator
            .on_complete(&t1, b"ok".to_vec(), &mut registry, &bus, now)
            .unwrap();

        let again = coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        assert_eq!(again.state(), DispatchState::Pending);
    }

    #[tokio::test]
    async fn rejected_send_creates_no_record() {
        let (mut coordinator, mut registry, transport) = setup(&["a"]);
        transport.refuse(&AgentAddress::new("mem://a").unwrap());
        let bus = EventBus::new();

        let err = coordinator
            .dispatch(task("t1"), &mut registry, &bus, Utc::now())
            .await
            .unwrap_err();

        assert!(matches!(err, OverseerError::Network(_)));
        assert!(coordinator.record(&TaskId::new("t1").unwrap()).is_none());
        assert_eq!(registry.get(&id("a")).unwrap().status(), AgentStatus::Available);
    }

    #[tokio::test]
    async fn ack_is_idempotent() {
        let (mut coordinator, mut registry, _) = setup(&["a"]);
        let (bus, events) = recording_bus(EventKind::TaskAcked);
        let now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        let first = coordinator.on_ack(&t1, &bus, now).unwrap();
        let second = coordinator.on_ack(&t1, &bus, now).unwrap();

        assert_eq!(first.state(), DispatchState::Acked);
        assert_eq!(second.state(), DispatchState::Acked);
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_task_callbacks_fail() {
        let (mut coordinator, mut registry, _) = setup(&["a"]);
        let bus = EventBus::new();
        let ghost = TaskId::new("ghost").unwrap();
        let now = Utc::now();

        assert!(matches!(
            coordinator.on_ack(&ghost, &bus, now),
            Err(OverseerError::UnknownTask(_))
        ));
        assert!(matches!(
            coordinator.on_complete(&ghost, vec![], &mut registry, &bus, now),
            Err(OverseerError::UnknownTask(_))
        ));
        assert!(matches!(
            coordinator.cancel(&ghost, &mut registry, &bus, now),
            Err(OverseerError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn timeout_retries_on_another_agent() {
        let (mut coordinator, mut registry, transport) = setup(&["a", "b"]);
        let (bus, events) = recording_bus(EventKind::TaskRetried);
        let now = Utc::now();

        let record = coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        let first_agent = record.target_agent().clone();

        let later = record.deadline() + Duration::seconds(1);
        let report = coordinator.check_timeouts(&mut registry, &bus, later).await;

        assert_eq!(report.retried.len(), 1);
        let record = coordinator.record(&TaskId::new("t1").unwrap()).unwrap();
        assert_eq!(record.attempts(), 2);
        assert_ne!(record.target_agent(), &first_agent);
        assert_eq!(record.deadline(), later + Duration::seconds(30));
        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.sent()[1].1.attempt, 2);
        assert_eq!(events.lock().unwrap().len(), 1);

        // nothing more happens before the fresh deadline
        let report = coordinator
            .check_timeouts(&mut registry, &bus, later + Duration::seconds(1))
            .await;
        assert!(report.retried.is_empty());
    }

    #[tokio::test]
    async fn single_agent_retry_reuses_it() {
        let (mut coordinator, mut registry, _) = setup(&["a"]);
        let bus = EventBus::new();
        let now = Utc::now();

        let record = coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        let report = coordinator
            .check_timeouts(&mut registry, &bus, record.deadline())
            .await;

        assert_eq!(report.retried.len(), 1);
        let record = coordinator.record(&TaskId::new("t1").unwrap()).unwrap();
        assert_eq!(record.target_agent(), &id("a"));
    }

    #[tokio::test]
    async fn exhausted_attempts_fail_exactly_once() {
        let (mut coordinator, mut registry, transport) = setup(&["a", "b"]);
        let (bus, events) = recording_bus(EventKind::TaskFailed);
        let mut now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();

        for _ in 0..2 {
            now = coordinator.record(&t1).unwrap().deadline();
            coordinator.check_timeouts(&mut registry, &bus, now).await;
        }
        assert_eq!(coordinator.record(&t1).unwrap().attempts(), 3);

        now = coordinator.record(&t1).unwrap().deadline();
        let report = coordinator.check_timeouts(&mut registry, &bus, now).await;
        assert_eq!(report.failed, vec![t1.clone()]);

        let record = coordinator.record(&t1).unwrap();
        assert_eq!(record.state(), DispatchState::Failed);
        assert_eq!(
            registry.get(record.target_agent()).unwrap().status(),
            AgentStatus::Unreachable
        );

        let report = coordinator
            .check_timeouts(&mut registry, &bus, now + Duration::seconds(5))
            .await;
        assert!(report.failed.is_empty() && report.retried.is_empty());
        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(transport.sent().len(), 3);
    }

    #[tokio::test]
    async fn stalled_retry_keeps_attempts_until_a_send_is_accepted() {
        let (mut coordinator, mut registry, transport) = setup(&["a"]);
        let (bus, failed) = recording_bus(EventKind::TaskFailed);
        let now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        transport.refuse(&AgentAddress::new("mem://a").unwrap());

        // every pass tries placement again without spending the budget
        let later = now + Duration::seconds(31);
        for _ in 0..5 {
            let report = coordinator.check_timeouts(&mut registry, &bus, later).await;
            assert_eq!(report.stalled, vec![t1.clone()]);
            assert!(report.failed.is_empty());

            let record = coordinator.record(&t1).unwrap();
            assert_eq!(record.state(), DispatchState::TimedOut);
            assert_eq!(record.attempts(), 1);
        }
        assert!(failed.lock().unwrap().is_empty());

        transport.accept_all();
        let report = coordinator.check_timeouts(&mut registry, &bus, later).await;
        assert_eq!(report.retried, vec![t1.clone()]);

        let record = coordinator.record(&t1).unwrap();
        assert_eq!(record.state(), DispatchState::Pending);
        assert_eq!(record.attempts(), 2);
        assert_eq!(record.deadline(), later + Duration::seconds(30));
        assert_eq!(transport.sent().len(), record.attempts() as usize);
    }

    #[tokio::test]
    async fn one_silent_deadline_yields_exactly_one_retry() {
        let (mut coordinator, mut registry, transport) = setup(&["a", "b"]);
        let (bus, retried) = recording_bus(EventKind::TaskRetried);
        let now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        let first_deadline = coordinator.record(&t1).unwrap().deadline();

        // repeated passes at the same instant
        for _ in 0..4 {
            coordinator
                .check_timeouts(&mut registry, &bus, first_deadline)
                .await;
        }
        // and at one second ticks short of the fresh deadline
        for tick in 1..30 {
            let report = coordinator
                .check_timeouts(&mut registry, &bus, first_deadline + Duration::seconds(tick))
                .await;
            assert!(report.retried.is_empty() && report.failed.is_empty());
        }

        let record = coordinator.record(&t1).unwrap();
        assert_eq!(record.attempts(), 2);
        assert_eq!(record.state(), DispatchState::Pending);
        assert_eq!(record.deadline(), first_deadline + Duration::seconds(30));
        assert_eq!(retried.lock().unwrap().len(), 1);
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test]
    async fn acked_records_do_not_time_out() {
        let (mut coordinator, mut registry, _) = setup(&["a"]);
        let bus = EventBus::new();
        let now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        coordinator.on_ack(&t1, &bus, now).unwrap();

        let report = coordinator
            .check_timeouts(&mut registry, &bus, now + Duration::hours(1))
            .await;
        assert_eq!(report, TimeoutReport::default());
    }

    #[tokio::test]
    async fn cancel_fails_record_and_frees_agent() {
        let (mut coordinator, mut registry, _) = setup(&["a"]);
        let (bus, events) = recording_bus(EventKind::TaskFailed);
        let now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        let record = coordinator.cancel(&t1, &mut registry, &bus, now).unwrap();

        assert_eq!(record.state(), DispatchState::Failed);
        assert_eq!(registry.get(&id("a")).unwrap().status(), AgentStatus::Available);
        match &events.lock().unwrap()[0] {
            OverseerEvent::TaskFailed { reason, .. } => {
                assert_eq!(*reason, FailureReason::Cancelled)
            }
            other => panic!("Expected TaskFailed, got {:?}", other),
        }

        // cancelling again changes nothing
        coordinator.cancel(&t1, &mut registry, &bus, now).unwrap();
        assert_eq!(events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn finished_records_are_evicted_after_retention() {
        let (mut coordinator, mut registry, _) = setup(&["a"]);
        let bus = EventBus::new();
        let now = Utc::now();
        let t1 = TaskId::new("t1").unwrap();

        coordinator
            .dispatch(task("t1"), &mut registry, &bus, now)
            .await
            .unwrap();
        coordinator
            .on_complete(&t1, b"ok".to_vec(), &mut registry, &bus, now)
            .unwrap();

        let report = coordinator
            .check_timeouts(&mut registry, &bus, now + Duration::seconds(299))
            .await;
        assert_eq!(report.evicted, 0);
        assert!(coordinator.record(&t1).is_some());

        let report = coordinator
            .check_timeouts(&mut registry, &bus, now + Duration::seconds(300))
            .await;
        assert_eq!(report.evicted, 1);
        assert!(coordinator.record(&t1).is_none());
    }
}
