//! In-memory ports for tests and local runs.
//!
//! `StaticLedger` serves whatever snapshot bytes it was last given, or a
//! configured failure. `RecordingTransport` accepts every send unless the
//! address was refused, and keeps the envelopes it saw.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::domain::agent::AgentAddress;
use crate::domain::ports::{LedgerClient, LedgerError, TaskEnvelope, Transport, TransportError};

/// Ledger stand-in holding one snapshot document
pub struct StaticLedger {
    snapshot: Mutex<Result<Vec<u8>, String>>,
}

impl StaticLedger {
    pub fn new(snapshot: impl Into<Vec<u8>>) -> Self {
        Self {
            snapshot: Mutex::new(Ok(snapshot.into())),
        }
    }

    /// Replace the served snapshot; clears a configured failure
    pub fn set_snapshot(&self, snapshot: impl Into<Vec<u8>>) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = Ok(snapshot.into());
        }
    }

    /// Make every fetch fail until the next `set_snapshot`
    pub fn fail_with(&self, reason: impl Into<String>) {
        if let Ok(mut guard) = self.snapshot.lock() {
            *guard = Err(reason.into());
        }
    }
}

#[async_trait]
impl LedgerClient for StaticLedger {
    async fn fetch_snapshot(&self) -> Result<Vec<u8>, LedgerError> {
        let guard = self
            .snapshot
            .lock()
            .map_err(|_| LedgerError::Unreachable("ledger state poisoned".to_string()))?;
        guard.clone().map_err(LedgerError::Unreachable)
    }
}

/// Transport that records envelopes instead of delivering them
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(AgentAddress, TaskEnvelope)>>,
    refused: Mutex<HashSet<AgentAddress>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every later send to `address`
    pub fn refuse(&self, address: &AgentAddress) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.insert(address.clone());
        }
    }

    pub fn accept_all(&self) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.clear();
        }
    }

    /// Accepted sends, oldest first
    pub fn sent(&self) -> Vec<(AgentAddress, TaskEnvelope)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn sent_to(&self, address: &AgentAddress) -> usize {
        self.sent()
            .iter()
            .filter(|(target, _)| target == address)
            .count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        address: &AgentAddress,
        envelope: &TaskEnvelope,
    ) -> Result<(), TransportError> {
        let refused = self
            .refused
            .lock()
            .map(|refused| refused.contains(address))
            .unwrap_or(false);
        if refused {
            return Err(TransportError::Rejected {
                address: address.to_string(),
                reason: "refused".to_string(),
            });
        }

        let mut sent = self
            .sent
            .lock()
            .map_err(|_| TransportError::Unreachable("transport state poisoned".to_string()))?;
        sent.push((address.clone(), envelope.clone()));
        Ok(())
    }
}
