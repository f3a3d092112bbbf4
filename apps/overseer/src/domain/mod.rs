// Domain layer module exports
// Pure types for the overseer; no I/O beyond the port traits

pub mod agent;
pub mod events;
pub mod merkle;
pub mod ports;
pub mod snapshot;
pub mod task;
