use async_trait::async_trait;
use std::path::PathBuf;

use crate::domain::ports::{LedgerClient, LedgerError};

/// Ledger client that reads the snapshot a relay keeps on disk
///
/// The file holds the snapshot JSON exactly as the ledger program exports
/// it; the overseer re-reads it on every sync.
pub struct FileLedgerClient {
    path: PathBuf,
}

impl FileLedgerClient {
    /// # Arguments
    /// * `path` - Location of the exported snapshot document
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LedgerClient for FileLedgerClient {
    async fn fetch_snapshot(&self) -> Result<Vec<u8>, LedgerError> {
        let raw = tokio::fs::read(&self.path).await?;
        tracing::debug!(path = %self.path.display(), bytes = raw.len(), "Snapshot read");
        Ok(raw)
    }
}
