use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use crate::domain::agent::{AgentEntry, AgentId, AgentRecord};

/// How an Available agent is picked for a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Agents never dispatched to come first, then the oldest dispatch
    #[default]
    LeastRecentlyDispatched,
    /// Agent with the oldest `last_seen`
    LeastRecentlySeen,
}

impl SelectionPolicy {
    fn pick<'a>(
        &self,
        candidates: impl Iterator<Item = &'a AgentRecord>,
    ) -> Option<&'a AgentRecord> {
        candidates.min_by(|a, b| self.compare(a, b))
    }

    fn compare(&self, a: &AgentRecord, b: &AgentRecord) -> Ordering {
        match self {
            SelectionPolicy::LeastRecentlyDispatched => a
                .last_dispatched()
                .cmp(&b.last_dispatched())
                .then_with(|| a.last_seen().cmp(&b.last_seen()))
                .then_with(|| a.id().cmp(b.id())),
            SelectionPolicy::LeastRecentlySeen => a
                .last_seen()
                .cmp(&b.last_seen())
                .then_with(|| a.id().cmp(b.id())),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::LeastRecentlyDispatched => write!(f, "least-recently-dispatched"),
            SelectionPolicy::LeastRecentlySeen => write!(f, "least-recently-seen"),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "least-recently-dispatched" => Ok(SelectionPolicy::LeastRecentlyDispatched),
            "least-recently-seen" => Ok(SelectionPolicy::LeastRecentlySeen),
            other => Err(format!("Unknown selection policy: {}", other)),
        }
    }
}

/// Outcome of reconciling the registry against one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<AgentId>,
    pub evicted: Vec<AgentId>,
    pub refreshed: usize,
}

/// Known agents, keyed by id
///
/// Records are created and evicted only by [`AgentRegistry::apply_snapshot`];
/// dispatch outcomes change their status through the crate-internal markers.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentId, AgentRecord>,
    stale_after_syncs: u32,
}

impl AgentRegistry {
    /// `stale_after_syncs`: an agent missing from more than this many
    /// consecutive snapshots is evicted
    pub fn new(stale_after_syncs: u32) -> Self {
        Self {
            agents: BTreeMap::new(),
            stale_after_syncs,
        }
    }

    /// Reconcile tracked records against a snapshot's agent list
    pub fn apply_snapshot(&mut self, entries: &[AgentEntry], now: DateTime<Utc>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let present: HashSet<&AgentId> = entries.iter().map(|entry| &entry.id).collect();

        for entry in entries {
            match self.agents.get_mut(&entry.id) {
                Some(record) => {
                    record.refresh(&entry.address, now);
                    report.refreshed += 1;
                }
                None => {
                    debug!(agent = %entry.id, address = %entry.address, "Agent discovered");
                    self.agents
                        .insert(entry.id.clone(), AgentRecord::discovered(entry, now));
                    report.added.push(entry.id.clone());
                }
            }
        }

        let threshold = self.stale_after_syncs;
        let evicted = &mut report.evicted;
        self.agents.retain(|id, record| {
            if present.contains(id) {
                return true;
            }
            if record.miss() > threshold {
                info!(agent = %id, missed = record.missed_syncs(), "Evicting stale agent");
                evicted.push(id.clone());
                return false;
            }
            true
        });

        report
    }

    pub fn count(&self) -> usize {
        self.agents.len()
    }

    pub fn available_count(&self) -> usize {
        self.agents.values().filter(|r| r.is_available()).count()
    }

    pub fn get(&self, id: &AgentId) -> Option<&AgentRecord> {
        self.agents.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentRecord> {
        self.agents.values()
    }

    /// Choose an Available agent, or None when every agent is Busy or
    /// Unreachable. `exclude` is skipped only if another agent qualifies.
    pub fn select_for_dispatch(
        &self,
        policy: SelectionPolicy,
        exclude: Option<&AgentId>,
    ) -> Option<&AgentRecord> {
        let available = || self.agents.values().filter(|r| r.is_available());

        policy
            .pick(available().filter(|r| Some(r.id()) != exclude))
            .or_else(|| policy.pick(available()))
    }

    pub(crate) fn mark_dispatched(&mut self, id: &AgentId, now: DateTime<Utc>) {
        if let Some(record) = self.agents.get_mut(id) {
            record.mark_dispatched(now);
        }
    }

    pub(crate) fn release(&mut self, id: &AgentId) {
        if let Some(record) = self.agents.get_mut(id) {
            record.release();
        }
    }

    pub(crate) fn mark_unreachable(&mut self, id: &AgentId) {
        if let Some(record) = self.agents.get_mut(id) {
            record.mark_unreachable();
        }
    }
}
