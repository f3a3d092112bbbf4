pub mod agents;
pub mod tasks;
