use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::agent::{AgentAddress, AgentEntry, AgentId};
use super::merkle::{MerkleRoot, MerkleTree};

/// Point-in-time copy of ledger state: root, activity flag and agent list
///
/// # Invariants
/// - Agent ids are unique
/// - `root` is the Merkle root of the agent leaves, in listed order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    root: MerkleRoot,
    active: bool,
    agents: Vec<AgentEntry>,
}

/// Wire shape of a snapshot as the ledger client returns it
#[derive(Debug, Serialize, Deserialize)]
struct WireSnapshot {
    root: String,
    #[serde(default = "default_active")]
    active: bool,
    agents: Vec<WireAgent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireAgent {
    id: String,
    address: String,
}

fn default_active() -> bool {
    true
}

impl Snapshot {
    /// Builds a snapshot committing to `agents` in the given order
    ///
    /// # Example
    /// ```
    /// use swarm_overseer::domain::agent::{AgentAddress, AgentEntry, AgentId};
    /// use swarm_overseer::domain::snapshot::Snapshot;
    ///
    /// let agents = vec![AgentEntry::new(
    ///     AgentId::new("a").unwrap(),
    ///     AgentAddress::new("http://a").unwrap(),
    /// )];
    /// let snapshot = Snapshot::commit(agents, true).expect("unique ids");
    /// let decoded = Snapshot::decode(&snapshot.encode()).expect("valid snapshot");
    /// assert_eq!(decoded.root(), snapshot.root());
    /// ```
    pub fn commit(agents: Vec<AgentEntry>, active: bool) -> Result<Self, String> {
        ensure_unique(&agents)?;
        let root = compute_root(&agents);
        Ok(Self {
            root,
            active,
            agents,
        })
    }

    /// Decodes and validates raw snapshot bytes
    ///
    /// # Validation Rules
    /// - Bytes parse as the snapshot JSON document
    /// - The root is hex of exactly 32 bytes
    /// - Every agent has a non-empty id and address, ids are unique
    /// - The root commits to the listed agents
    pub fn decode(raw: &[u8]) -> Result<Self, String> {
        let wire: WireSnapshot = serde_json::from_slice(raw)
            .map_err(|e| format!("Unparsable snapshot: {}", e))?;

        let claimed = MerkleRoot::from_hex(&wire.root)?;

        let agents = wire
            .agents
            .into_iter()
            .enumerate()
            .map(|(index, agent)| {
                let id = AgentId::new(agent.id).map_err(|e| format!("Agent #{}: {}", index, e))?;
                let address = AgentAddress::new(agent.address)
                    .map_err(|e| format!("Agent #{}: {}", index, e))?;
                Ok(AgentEntry::new(id, address))
            })
            .collect::<Result<Vec<_>, String>>()?;

        ensure_unique(&agents)?;

        let computed = compute_root(&agents);
        if computed != claimed {
            return Err(format!(
                "Root {} does not commit to the listed agents (computed {})",
                claimed, computed
            ));
        }

        Ok(Self {
            root: claimed,
            active: wire.active,
            agents,
        })
    }

    /// Encodes to the wire format accepted by [`Snapshot::decode`]
    pub fn encode(&self) -> Vec<u8> {
        let wire = WireSnapshot {
            root: self.root.to_hex(),
            active: self.active,
            agents: self
                .agents
                .iter()
                .map(|entry| WireAgent {
                    id: entry.id.to_string(),
                    address: entry.address.to_string(),
                })
                .collect(),
        };
        // A struct of strings and a bool always serializes
        serde_json::to_vec(&wire).unwrap_or_default()
    }

    pub fn root(&self) -> MerkleRoot {
        self.root
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn agents(&self) -> &[AgentEntry] {
        &self.agents
    }

    pub fn into_agents(self) -> Vec<AgentEntry> {
        self.agents
    }
}

/// Merkle root over the leaves of `agents`, in order
pub fn compute_root(agents: &[AgentEntry]) -> MerkleRoot {
    MerkleTree::from_leaves(agents.iter().map(AgentEntry::leaf).collect()).root()
}

fn ensure_unique(agents: &[AgentEntry]) -> Result<(), String> {
    let mut seen: HashSet<&AgentId> = HashSet::with_capacity(agents.len());
    for entry in agents {
        if !seen.insert(&entry.id) {
            return Err(format!("Duplicate agent id: {}", entry.id));
        }
    }
    Ok(())
}
