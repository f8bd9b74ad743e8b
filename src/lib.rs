//! Kadmin: controlled rolling maintenance for Kubernetes clusters
//!
//! Kadmin walks the nodes of a cluster one at a time: drain the node, run
//! an operator-supplied maintenance job pinned to it, wait for the job and
//! for system pods to settle, uncordon, and record a completion marker on
//! the node. A per-step failure policy decides whether a failure skips the
//! node or aborts the whole run.

pub mod client;
pub mod error;
pub mod maintenance;

pub use crate::error::{Error, Result};
