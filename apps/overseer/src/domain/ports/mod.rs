// Ports to external collaborators
// The core depends on these traits; infrastructure provides the adapters

pub mod ledger_client;
pub mod transport;

pub use ledger_client::{LedgerClient, LedgerError};
pub use transport::{TaskEnvelope, Transport, TransportError};
