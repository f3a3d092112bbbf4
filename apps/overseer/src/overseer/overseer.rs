use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::dispatch::{DispatchCoordinator, DispatchSettings, TimeoutReport};
use super::errors::{OverseerError, OverseerResult};
use super::event_bus::{EventBus, ListenerResult, ListenerToken};
use super::state_store::{StateStore, SyncOutcome, SyncReport};
use crate::domain::agent::{AgentId, AgentRecord};
use crate::domain::events::{EventKind, OverseerEvent};
use crate::domain::merkle::{MerkleProof, MerkleRoot};
use crate::domain::ports::{LedgerClient, Transport};
use crate::domain::task::{DispatchRecord, Task, TaskId};

/// Everything tunable about a [`SwarmOverseer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverseerSettings {
    pub dispatch: DispatchSettings,
    /// Consecutive snapshots an agent may be missing from before eviction
    pub stale_after_syncs: u32,
}

impl Default for OverseerSettings {
    fn default() -> Self {
        Self {
            dispatch: DispatchSettings::default(),
            stale_after_syncs: 3,
        }
    }
}

/// Coordinates a swarm of worker agents against ledger-committed state
///
/// Pulls snapshots from the ledger, keeps the agent registry in step with
/// them, hands tasks to agents through the transport and tracks every task
/// until it completes or fails. All methods take `&mut self`; callers that
/// share an overseer serialize access themselves.
pub struct SwarmOverseer {
    ledger: Arc<dyn LedgerClient>,
    store: StateStore,
    coordinator: DispatchCoordinator,
    bus: EventBus,
}

impl SwarmOverseer {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        transport: Arc<dyn Transport>,
        settings: OverseerSettings,
    ) -> Self {
        Self {
            ledger,
            store: StateStore::new(settings.stale_after_syncs),
            coordinator: DispatchCoordinator::new(transport, settings.dispatch),
            bus: EventBus::new(),
        }
    }

    /// Pull the latest snapshot and reconcile against it
    ///
    /// Emits `state-changed` when the root moved.
    ///
    /// # Errors
    /// * `Network` - The ledger could not be read
    /// * `SnapshotInvalid` - The snapshot failed validation; state is untouched
    pub async fn sync_state(&mut self) -> OverseerResult<SyncOutcome> {
        let raw = self.ledger.fetch_snapshot().await.map_err(|err| {
            warn!(error = %err, "Ledger fetch failed");
            OverseerError::from(err)
        })?;
        let report = self.sync_state_at(&raw, Utc::now())?;
        Ok(report.outcome)
    }

    /// Apply already fetched snapshot bytes at a given instant
    pub fn sync_state_at(&mut self, raw: &[u8], now: DateTime<Utc>) -> OverseerResult<SyncReport> {
        let report = self.store.sync(raw, now)?;

        if report.outcome == SyncOutcome::Changed {
            self.bus.emit(&OverseerEvent::StateChanged {
                previous_root: report.previous_root,
                root: report.root,
                agent_count: self.store.registry().count(),
                added: report.added.clone(),
                evicted: report.evicted.clone(),
            });
        } else if !report.evicted.is_empty() {
            info!(evicted = report.evicted.len(), "Stale agents evicted on unchanged root");
        }

        Ok(report)
    }

    /// Number of agents currently tracked
    pub fn get_agent_count(&self) -> usize {
        self.store.registry().count()
    }

    /// Send a task to an agent
    ///
    /// # Errors
    /// * `SwarmInactive` - The last snapshot marked the swarm inactive
    /// * `DuplicateTaskId` - A live record already uses the task id
    /// * `NoAvailableAgent` - No agent can take work right now
    /// * `Network` - The transport refused the send
    pub async fn dispatch(&mut self, task: Task) -> OverseerResult<DispatchRecord> {
        self.dispatch_at(task, Utc::now()).await
    }

    pub async fn dispatch_at(
        &mut self,
        task: Task,
        now: DateTime<Utc>,
    ) -> OverseerResult<DispatchRecord> {
        if !self.store.is_active() {
            warn!(task = %task.id(), "Dispatch refused, swarm inactive");
            return Err(OverseerError::SwarmInactive);
        }

        self.coordinator
            .dispatch(task, self.store.registry_mut(), &self.bus, now)
            .await
    }

    pub fn on<F>(&mut self, kind: EventKind, listener: F) -> ListenerToken
    where
        F: Fn(&OverseerEvent) -> ListenerResult + Send + Sync + 'static,
    {
        self.bus.on(kind, listener)
    }

    pub fn off(&mut self, token: ListenerToken) -> bool {
        self.bus.off(token)
    }

    pub fn on_ack(&mut self, task_id: &TaskId) -> OverseerResult<DispatchRecord> {
        self.coordinator.on_ack(task_id, &self.bus, Utc::now())
    }

    pub fn on_complete(
        &mut self,
        task_id: &TaskId,
        result: Vec<u8>,
    ) -> OverseerResult<DispatchRecord> {
        self.coordinator.on_complete(
            task_id,
            result,
            self.store.registry_mut(),
            &self.bus,
            Utc::now(),
        )
    }

    pub fn cancel(&mut self, task_id: &TaskId) -> OverseerResult<DispatchRecord> {
        self.coordinator
            .cancel(task_id, self.store.registry_mut(), &self.bus, Utc::now())
    }

    pub async fn check_timeouts(&mut self) -> TimeoutReport {
        self.check_timeouts_at(Utc::now()).await
    }

    pub async fn check_timeouts_at(&mut self, now: DateTime<Utc>) -> TimeoutReport {
        self.coordinator
            .check_timeouts(self.store.registry_mut(), &self.bus, now)
            .await
    }

    pub fn record(&self, task_id: &TaskId) -> Option<&DispatchRecord> {
        self.coordinator.record(task_id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentRecord> {
        self.store.registry().iter()
    }

    pub fn current_root(&self) -> Option<MerkleRoot> {
        self.store.root()
    }

    pub fn is_active(&self) -> bool {
        self.store.is_active()
    }

    pub fn membership_proof(&self, agent: &AgentId) -> Option<MerkleProof> {
        self.store.membership_proof(agent)
    }
}
