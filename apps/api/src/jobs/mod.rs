// Background execution of pipeline runs: persistence, notification and the orchestrator
// that drives each run from submission to a terminal status.

pub mod notify;
pub mod orchestrator;
pub mod store;
