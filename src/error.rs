//! Error types for node maintenance runs

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API or transport error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Target object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// Object was modified concurrently between read and write
    #[error("conflict while updating node '{name}'")]
    Conflict { name: String },

    /// The maintenance job reported a failed pod
    #[error("job '{name}' failed")]
    JobFailed { name: String },

    /// Eviction rejected, typically because a PodDisruptionBudget would be violated
    #[error("eviction of pod '{pod}' blocked by policy: {reason}")]
    EvictionBlocked { pod: String, reason: String },

    /// A bounded wait expired before the awaited state was reached
    #[error("timed out after {after:?} waiting for {what}")]
    TimedOut { what: String, after: Duration },

    /// Dispatch failed and the recovery uncordon also failed; the run stops here
    #[error("maintenance run aborted on node '{node}': job dispatch failed and the node could not be uncordoned")]
    RunAborted { node: String },

    /// Client bootstrap / configuration problem
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Map a `kube::Error` from a read or write against a named object,
    /// turning a 404 into [`Error::NotFound`].
    pub(crate) fn or_not_found(kind: &'static str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Error::NotFound {
                kind,
                name: name.to_string(),
            },
            other => Error::Kube(other),
        }
    }
}
