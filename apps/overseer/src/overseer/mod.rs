// Swarm overseer core
//
// Keeps a local view of ledger-committed swarm state and drives tasks
// through dispatch, acknowledgement, completion and retry.

#![allow(clippy::module_inception)]

pub mod dispatch;
pub mod errors;
pub mod event_bus;
pub mod overseer;
pub mod registry;
pub mod state_store;

pub use dispatch::{DispatchCoordinator, DispatchSettings, TimeoutReport};
pub use errors::{OverseerError, OverseerResult};
pub use event_bus::{EventBus, ListenerError, ListenerResult, ListenerToken};
pub use overseer::{OverseerSettings, SwarmOverseer};
pub use registry::{AgentRegistry, ReconcileReport, SelectionPolicy};
pub use state_store::{StateStore, SyncOutcome, SyncReport};
