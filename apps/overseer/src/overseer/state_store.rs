use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::errors::{OverseerError, OverseerResult};
use super::registry::AgentRegistry;
use crate::domain::agent::{AgentEntry, AgentId};
use crate::domain::merkle::{MerkleProof, MerkleRoot, MerkleTree};
use crate::domain::snapshot::Snapshot;

/// Whether a sync observed a new root
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Changed,
    Unchanged,
}

/// Everything a single successful sync did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub previous_root: Option<MerkleRoot>,
    pub root: MerkleRoot,
    pub added: Vec<AgentId>,
    pub evicted: Vec<AgentId>,
}

/// Last synchronized ledger state plus the decoded agent registry
///
/// # Invariants
/// - `root` is the root of the last snapshot reported as Changed
/// - A rejected snapshot leaves every field untouched
#[derive(Debug, Clone)]
pub struct StateStore {
    root: Option<MerkleRoot>,
    active: bool,
    committed: Vec<AgentEntry>,
    registry: AgentRegistry,
}

impl StateStore {
    pub fn new(stale_after_syncs: u32) -> Self {
        Self {
            root: None,
            active: true,
            committed: Vec::new(),
            registry: AgentRegistry::new(stale_after_syncs),
        }
    }

    /// Apply raw snapshot bytes fetched from the ledger
    ///
    /// Validation runs to completion before anything is written, so a
    /// `SnapshotInvalid` failure never leaves a partial update behind.
    pub fn sync(&mut self, raw: &[u8], now: DateTime<Utc>) -> OverseerResult<SyncReport> {
        let snapshot = Snapshot::decode(raw).map_err(|reason| {
            warn!(%reason, "Rejected ledger snapshot");
            OverseerError::SnapshotInvalid(reason)
        })?;

        let root = snapshot.root();
        let active = snapshot.is_active();
        let reconcile = self.registry.apply_snapshot(snapshot.agents(), now);
        self.active = active;

        if self.root == Some(root) {
            debug!(%root, agents = self.registry.count(), "Snapshot unchanged");
            return Ok(SyncReport {
                outcome: SyncOutcome::Unchanged,
                previous_root: self.root,
                root,
                added: reconcile.added,
                evicted: reconcile.evicted,
            });
        }

        let previous_root = self.root.replace(root);
        self.committed = snapshot.into_agents();

        info!(
            %root,
            agents = self.registry.count(),
            added = reconcile.added.len(),
            evicted = reconcile.evicted.len(),
            active,
            "State changed"
        );

        Ok(SyncReport {
            outcome: SyncOutcome::Changed,
            previous_root,
            root,
            added: reconcile.added,
            evicted: reconcile.evicted,
        })
    }

    pub fn root(&self) -> Option<MerkleRoot> {
        self.root
    }

    /// Activity flag from the last accepted snapshot; true before any sync
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut AgentRegistry {
        &mut self.registry
    }

    /// Inclusion proof of an agent against the current root
    pub fn membership_proof(&self, agent: &AgentId) -> Option<MerkleProof> {
        let index = self.committed.iter().position(|entry| &entry.id == agent)?;
        let tree = MerkleTree::from_leaves(self.committed.iter().map(AgentEntry::leaf).collect());
        tree.proof(index)
    }

    /// Entry of an agent as committed under the current root
    pub fn committed_entry(&self, agent: &AgentId) -> Option<&AgentEntry> {
        self.committed.iter().find(|entry| &entry.id == agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentAddress;
    use chrono::Duration;

    fn entry(id: &str) -> AgentEntry {
        AgentEntry::new(
            AgentId::new(id).unwrap(),
            AgentAddress::new(format!("http://{}", id)).unwrap(),
        )
    }

    fn snapshot_bytes(ids: &[&str]) -> Vec<u8> {
        Snapshot::commit(ids.iter().map(|id| entry(id)).collect(), true)
            .unwrap()
            .encode()
    }

    #[test]
    fn first_sync_is_changed() {
        let mut store = StateStore::new(2);
        let report = store.sync(&snapshot_bytes(&["a", "b"]), Utc::now()).unwrap();

        assert_eq!(report.outcome, SyncOutcome::Changed);
        assert!(report.previous_root.is_none());
        assert_eq!(store.root(), Some(report.root));
        assert_eq!(store.registry().count(), 2);
    }

    #[test]
    fn identical_bytes_are_unchanged_but_refresh_last_seen() {
        let mut store = StateStore::new(2);
        let bytes = snapshot_bytes(&["a"]);
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(3);

        store.sync(&bytes, t0).unwrap();
        let report = store.sync(&bytes, t1).unwrap();

        assert_eq!(report.outcome, SyncOutcome::Unchanged);
        let record = store.registry().get(&AgentId::new("a").unwrap()).unwrap();
        assert_eq!(record.last_seen(), t1);
    }

    #[test]
    fn invalid_snapshot_leaves_state_untouched() {
        let mut store = StateStore::new(2);
        let now = Utc::now();
        let first = store.sync(&snapshot_bytes(&["a"]), now).unwrap();

        let err = store.sync(b"{\"root\":\"00\",\"agents\":[]}", now).unwrap_err();
        assert!(matches!(err, OverseerError::SnapshotInvalid(_)));

        assert_eq!(store.root(), Some(first.root));
        let record = store.registry().get(&AgentId::new("a").unwrap()).unwrap();
        assert_eq!(record.missed_syncs(), 0);
    }

    #[test]
    fn root_tracks_last_changed_snapshot() {
        let mut store = StateStore::new(5);
        let now = Utc::now();

        store.sync(&snapshot_bytes(&["a"]), now).unwrap();
        let second = store.sync(&snapshot_bytes(&["a", "b"]), now).unwrap();
        let _ = store.sync(b"garbage", now);

        assert_eq!(second.outcome, SyncOutcome::Changed);
        assert_eq!(store.root(), Some(second.root));
        assert_eq!(second.added, vec![AgentId::new("b").unwrap()]);
    }

    #[test]
    fn inactive_flag_follows_changed_snapshot() {
        let mut store = StateStore::new(2);
        assert!(store.is_active());

        let bytes = Snapshot::commit(vec![entry("a")], false).unwrap().encode();
        store.sync(&bytes, Utc::now()).unwrap();
        assert!(!store.is_active());
    }

    #[test]
    fn membership_proof_verifies_against_root() {
        let mut store = StateStore::new(2);
        store.sync(&snapshot_bytes(&["a", "b", "c"]), Utc::now()).unwrap();
        let root = store.root().unwrap();

        let b = AgentId::new("b").unwrap();
        let proof = store.membership_proof(&b).unwrap();
        let leaf = store.committed_entry(&b).unwrap().leaf();
        assert!(proof.verify(&leaf, &root));

        assert!(store.membership_proof(&AgentId::new("zz").unwrap()).is_none());
    }
}
