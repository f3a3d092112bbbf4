//! Swarm Overseer Library
//!
//! Keeps a local view of a swarm whose membership is committed to a ledger
//! as a Merkle root, and dispatches tasks to the swarm's agents with
//! acknowledgement tracking, bounded retries and lifecycle events.

pub mod api;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod overseer;
