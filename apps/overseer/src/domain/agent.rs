use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::merkle::{leaf_hash, NodeHash};

/// Identifier of a remote agent as committed on the ledger
///
/// # Invariants
/// - Never empty
/// - No control characters; the leaf encoding uses NUL as a separator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentId(String);

impl AgentId {
    /// Creates a new AgentId
    ///
    /// # Example
    /// ```
    /// use swarm_overseer::domain::agent::AgentId;
    ///
    /// let id = AgentId::new("agent-7").expect("valid id");
    /// assert_eq!(id.as_str(), "agent-7");
    /// assert!(AgentId::new("").is_err());
    /// ```
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Agent id cannot be empty".to_string());
        }
        if id.chars().any(char::is_control) {
            return Err("Agent id cannot contain control characters".to_string());
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgentId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentId> for String {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque routing handle used by the transport to reach an agent
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AgentAddress(String);

impl AgentAddress {
    pub fn new(address: impl Into<String>) -> Result<Self, String> {
        let address = address.into();
        if address.trim().is_empty() {
            return Err("Agent address cannot be empty".to_string());
        }
        if address.chars().any(char::is_control) {
            return Err("Agent address cannot contain control characters".to_string());
        }
        Ok(Self(address))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AgentAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AgentAddress> for String {
    fn from(address: AgentAddress) -> Self {
        address.0
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Availability of an agent for new work
///
/// # Status Transitions
/// ```text
/// Available -> Busy          (task dispatched)
/// Busy      -> Available     (task completed, cancelled or reassigned)
/// Busy      -> Unreachable   (task failed after silent retries)
/// Unreachable -> Available   (agent present in a fresh snapshot)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Available,
    Busy,
    Unreachable,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Available => write!(f, "available"),
            AgentStatus::Busy => write!(f, "busy"),
            AgentStatus::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// One agent as listed in a ledger snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub id: AgentId,
    pub address: AgentAddress,
}

impl AgentEntry {
    pub fn new(id: AgentId, address: AgentAddress) -> Self {
        Self { id, address }
    }

    /// Leaf this entry contributes to the snapshot's Merkle root
    pub fn leaf(&self) -> NodeHash {
        leaf_hash(self.id.as_str(), self.address.as_str())
    }
}

/// Tracked state of a known agent
///
/// Owned exclusively by the agent registry; fields change only while a
/// snapshot is applied or a dispatch outcome is handled.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRecord {
    id: AgentId,
    address: AgentAddress,
    status: AgentStatus,
    last_seen: DateTime<Utc>,
    last_dispatched: Option<DateTime<Utc>>,
    missed_syncs: u32,
}

impl AgentRecord {
    /// A freshly discovered agent starts out Available
    pub fn discovered(entry: &AgentEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: entry.id.clone(),
            address: entry.address.clone(),
            status: AgentStatus::Available,
            last_seen: now,
            last_dispatched: None,
            missed_syncs: 0,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn address(&self) -> &AgentAddress {
        &self.address
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn last_dispatched(&self) -> Option<DateTime<Utc>> {
        self.last_dispatched
    }

    pub fn missed_syncs(&self) -> u32 {
        self.missed_syncs
    }

    pub fn is_available(&self) -> bool {
        self.status == AgentStatus::Available
    }

    /// Agent was listed again; the ledger vouches for it
    pub(crate) fn refresh(&mut self, address: &AgentAddress, now: DateTime<Utc>) {
        if &self.address != address {
            self.address = address.clone();
        }
        if self.status == AgentStatus::Unreachable {
            self.status = AgentStatus::Available;
        }
        self.last_seen = now;
        self.missed_syncs = 0;
    }

    /// Returns the missed count after this sync
    pub(crate) fn miss(&mut self) -> u32 {
        self.missed_syncs += 1;
        self.missed_syncs
    }

    pub(crate) fn mark_dispatched(&mut self, now: DateTime<Utc>) {
        self.status = AgentStatus::Busy;
        self.last_dispatched = Some(now);
    }

    pub(crate) fn release(&mut self) {
        if self.status == AgentStatus::Busy {
            self.status = AgentStatus::Available;
        }
    }

    pub(crate) fn mark_unreachable(&mut self) {
        self.status = AgentStatus::Unreachable;
    }
}
