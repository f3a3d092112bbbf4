// Infrastructure layer module
// Adapters implementing the domain ports against files, HTTP and memory
// Follows Hexagonal Architecture

pub mod adapters;
pub mod memory;

pub use adapters::{FileLedgerClient, HttpTransport};
pub use memory::{RecordingTransport, StaticLedger};
