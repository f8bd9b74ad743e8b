//! Controlled per-node maintenance: drain, job dispatch, polling waits,
//! uncordon, readiness gating, and completion bookkeeping.

pub mod drain;
pub mod job;
pub mod node;
pub mod orchestrator;

pub use orchestrator::{
    FailurePolicy, NodeOutcome, NodeReport, Orchestrator, OrchestratorConfig, RunReport, Step,
};
