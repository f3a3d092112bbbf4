use async_trait::async_trait;
use thiserror::Error;

/// Failures reaching or reading the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger unreachable: {0}")]
    Unreachable(String),

    #[error("Ledger read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of authoritative snapshots
///
/// Implementations only fetch raw bytes; decoding and validation happen in
/// the state store.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch the latest snapshot of the Merkle-committed state tree
    async fn fetch_snapshot(&self) -> Result<Vec<u8>, LedgerError>;
}
