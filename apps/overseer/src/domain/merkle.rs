use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length in bytes of every digest in the state tree
pub const DIGEST_LEN: usize = 32;

const LEAF_TAG: u8 = 0x00;
const NODE_TAG: u8 = 0x01;

/// A single SHA-256 node of the state tree
pub type NodeHash = [u8; DIGEST_LEN];

/// Root digest identifying one ledger snapshot
///
/// # Invariants
/// - Always exactly 32 bytes
/// - Immutable once observed; a sync replaces it wholesale
///
/// # Example
/// ```
/// use swarm_overseer::domain::merkle::MerkleRoot;
///
/// let root = MerkleRoot::from_hex(&"ab".repeat(32)).expect("valid root");
/// assert_eq!(root.to_hex(), "ab".repeat(32));
/// assert!(MerkleRoot::from_hex("abcd").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MerkleRoot(NodeHash);

impl MerkleRoot {
    /// Wraps a raw 32-byte digest
    pub fn from_bytes(bytes: NodeHash) -> Self {
        Self(bytes)
    }

    /// Parses a hex-encoded root
    ///
    /// # Returns
    /// * `Ok(MerkleRoot)` - If the string is valid hex of exactly 32 bytes
    /// * `Err(String)` - On bad hex or a wrong digest length
    pub fn from_hex(encoded: &str) -> Result<Self, String> {
        let bytes = hex::decode(encoded).map_err(|e| format!("Root is not valid hex: {}", e))?;
        let digest: NodeHash = bytes.as_slice().try_into().map_err(|_| {
            format!(
                "Root must be {} bytes, got {}",
                DIGEST_LEN,
                bytes.len()
            )
        })?;
        Ok(Self(digest))
    }

    pub fn as_bytes(&self) -> &NodeHash {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for MerkleRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for MerkleRoot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MerkleRoot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        MerkleRoot::from_hex(&encoded).map_err(de::Error::custom)
    }
}

/// SHA-256 of arbitrary bytes
pub fn digest(bytes: &[u8]) -> NodeHash {
    Sha256::digest(bytes).into()
}

/// Leaf commitment for one agent entry
pub fn leaf_hash(id: &str, address: &str) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_TAG]);
    hasher.update(id.as_bytes());
    hasher.update([0u8]);
    hasher.update(address.as_bytes());
    hasher.finalize().into()
}

fn node_hash(left: &NodeHash, right: &NodeHash) -> NodeHash {
    let mut hasher = Sha256::new();
    hasher.update([NODE_TAG]);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Binary Merkle tree over agent leaves
///
/// Pairs are hashed left to right; an unpaired node at the end of a level is
/// promoted unchanged. The root of an empty tree is the digest of no bytes.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    levels: Vec<Vec<NodeHash>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<NodeHash>) -> Self {
        let mut levels = Vec::new();
        let mut current = leaves;

        while current.len() > 1 {
            let next = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => node_hash(left, right),
                    [single] => *single,
                    _ => unreachable!("chunks(2) yields one or two nodes"),
                })
                .collect();
            levels.push(current);
            current = next;
        }
        levels.push(current);

        Self { levels }
    }

    pub fn leaf_count(&self) -> usize {
        self.levels.first().map_or(0, Vec::len)
    }

    pub fn root(&self) -> MerkleRoot {
        match self.levels.last().and_then(|top| top.first()) {
            Some(top) => MerkleRoot(*top),
            None => MerkleRoot(digest(&[])),
        }
    }

    /// Builds the sibling path for the leaf at `index`
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count() {
            return None;
        }

        let mut steps = Vec::new();
        let mut position = index;
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if let Some(hash) = level.get(sibling) {
                let side = if sibling < position {
                    Side::Left
                } else {
                    Side::Right
                };
                steps.push(ProofStep {
                    sibling: *hash,
                    side,
                });
            }
            position /= 2;
        }

        Some(MerkleProof {
            leaf_index: index,
            steps,
        })
    }
}

/// Which side of the running hash a sibling sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStep {
    pub sibling: NodeHash,
    pub side: Side,
}

/// Inclusion proof of one leaf against a root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleProof {
    pub leaf_index: usize,
    pub steps: Vec<ProofStep>,
}

impl MerkleProof {
    pub fn verify(&self, leaf: &NodeHash, root: &MerkleRoot) -> bool {
        let computed = self.steps.iter().fold(*leaf, |acc, step| match step.side {
            Side::Left => node_hash(&step.sibling, &acc),
            Side::Right => node_hash(&acc, &step.sibling),
        });
        &computed == root.as_bytes()
    }
}
