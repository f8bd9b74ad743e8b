//! Per-node maintenance orchestrator
//!
//! Drives each node through a strict linear sequence of steps:
//! drain → dispatch → await completion → uncordon → await readiness →
//! annotate. What happens when a step fails is data, not control flow:
//! every step maps to a [`FailurePolicy`]. All failures skip the node and
//! the run moves on, except a dispatch failure, which leaves a freshly
//! drained node behind; there the orchestrator uncordons the node again
//! and, if that recovery also fails, aborts the entire run rather than
//! silently abandoning the node cordoned.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::Client;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::maintenance::job::{job_name_for, JobParams};
use crate::maintenance::{drain, job, node};

/// Annotation key recording that a node has been processed.
pub const COMPLETE_ANNOTATION: &str = "job-complete";

pub const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_READY_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// One step of the per-node sequence, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Drain,
    Dispatch,
    AwaitCompletion,
    Uncordon,
    AwaitReadiness,
    Annotate,
}

/// What the orchestrator does when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log, record the outcome, continue with the next node.
    SkipNode,
    /// Uncordon the node again; if that fails too, abort the whole run.
    UncordonThenAbort,
}

impl Step {
    /// The full per-node sequence. Steps run exactly once, in this order,
    /// until one fails.
    pub const SEQUENCE: [Step; 6] = [
        Step::Drain,
        Step::Dispatch,
        Step::AwaitCompletion,
        Step::Uncordon,
        Step::AwaitReadiness,
        Step::Annotate,
    ];

    /// Failure policy table. Dispatch is the only step whose failure can
    /// abort the run: it is the one point where the node was just drained
    /// on our account and must not be left cordoned without a word.
    pub fn on_failure(self) -> FailurePolicy {
        match self {
            Step::Dispatch => FailurePolicy::UncordonThenAbort,
            _ => FailurePolicy::SkipNode,
        }
    }

    /// The outcome recorded for the node when this step fails.
    pub fn failure_outcome(self) -> NodeOutcome {
        match self {
            Step::Drain => NodeOutcome::DrainFailed,
            Step::Dispatch => NodeOutcome::DispatchFailed,
            Step::AwaitCompletion => NodeOutcome::WaitFailed,
            Step::Uncordon => NodeOutcome::UncordonFailed,
            Step::AwaitReadiness => NodeOutcome::ReadinessFailed,
            Step::Annotate => NodeOutcome::AnnotateFailed,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Drain => "draining",
            Step::Dispatch => "dispatching job",
            Step::AwaitCompletion => "awaiting job completion",
            Step::Uncordon => "uncordoning",
            Step::AwaitReadiness => "awaiting pod readiness",
            Step::Annotate => "annotating",
        };
        f.write_str(name)
    }
}

/// Final state of one node; exactly one per node per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeOutcome {
    Completed,
    DrainFailed,
    DispatchFailed,
    WaitFailed,
    UncordonFailed,
    ReadinessFailed,
    AnnotateFailed,
}

impl NodeOutcome {
    pub fn is_completed(self) -> bool {
        self == NodeOutcome::Completed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node: String,
    pub outcome: NodeOutcome,
}

/// Ordered per-node outcomes of one run. In-memory only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<NodeReport>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|r| r.outcome.is_completed())
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.completed()
    }
}

/// Tunables for one maintenance run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Namespace maintenance jobs are created in.
    pub namespace: String,
    /// Container image for the maintenance job.
    pub job_image: String,
    /// Command the maintenance job runs.
    pub job_command: Vec<String>,
    /// Deadline for job completion; `None` waits without bound.
    pub job_timeout: Option<Duration>,
    /// Deadline for pod readiness; `None` waits without bound.
    pub ready_timeout: Option<Duration>,
    pub job_poll_interval: Duration,
    pub ready_poll_interval: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            job_image: "busybox:latest".to_string(),
            job_command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "echo Hello && sleep 5".to_string(),
            ],
            job_timeout: Some(Duration::from_secs(3600)),
            ready_timeout: Some(Duration::from_secs(1800)),
            job_poll_interval: DEFAULT_JOB_POLL_INTERVAL,
            ready_poll_interval: DEFAULT_READY_POLL_INTERVAL,
        }
    }
}

/// Sequential maintenance driver: one node at a time, one step at a time.
pub struct Orchestrator {
    client: Client,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(client: Client, config: OrchestratorConfig) -> Self {
        Self { client, config }
    }

    /// Process every node in the cluster, in name order.
    ///
    /// Returns the per-node outcomes, or [`Error::RunAborted`] if a
    /// dispatch failure could not be recovered by uncordoning.
    pub async fn run(&self) -> Result<RunReport> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes.list(&ListParams::default()).await?;

        // Listing order is not guaranteed stable; sort for a deterministic walk.
        let mut names: Vec<String> = list
            .items
            .iter()
            .filter_map(|n| n.metadata.name.clone())
            .collect();
        names.sort();

        info!(nodes = names.len(), "Starting maintenance run");

        let mut report = RunReport::default();
        for name in names {
            let outcome = self.process_node(&name).await?;
            report.outcomes.push(NodeReport {
                node: name,
                outcome,
            });
        }

        info!(
            completed = report.completed(),
            skipped = report.skipped(),
            "Maintenance run finished"
        );
        Ok(report)
    }

    /// Drive one node through the full step sequence.
    ///
    /// `Ok` carries the node's single recorded outcome; `Err` is only the
    /// run-wide abort from the dispatch recovery path.
    async fn process_node(&self, node_name: &str) -> Result<NodeOutcome> {
        info!(node = %node_name, "Processing node");

        for step in Step::SEQUENCE {
            let Err(err) = self.run_step(step, node_name).await else {
                continue;
            };
            warn!(node = %node_name, step = %step, error = %err, "Step failed");

            match step.on_failure() {
                FailurePolicy::SkipNode => return Ok(step.failure_outcome()),
                FailurePolicy::UncordonThenAbort => {
                    if let Err(uncordon_err) = drain::uncordon_node(&self.client, node_name).await
                    {
                        error!(
                            node = %node_name,
                            error = %uncordon_err,
                            "Failed to uncordon node after dispatch failure, aborting run"
                        );
                        return Err(Error::RunAborted {
                            node: node_name.to_string(),
                        });
                    }
                    return Ok(step.failure_outcome());
                }
            }
        }

        info!(node = %node_name, "Successfully completed processing");
        Ok(NodeOutcome::Completed)
    }

    async fn run_step(&self, step: Step, node_name: &str) -> Result<()> {
        let cfg = &self.config;
        let job_name = job_name_for(node_name);

        match step {
            Step::Drain => drain::drain_node(&self.client, node_name).await,
            Step::Dispatch => {
                job::ensure_job(
                    &self.client,
                    &JobParams {
                        node_name,
                        job_name: &job_name,
                        namespace: &cfg.namespace,
                        image: &cfg.job_image,
                        command: &cfg.job_command,
                    },
                )
                .await
            }
            Step::AwaitCompletion => {
                job::await_completion(
                    &self.client,
                    &job_name,
                    &cfg.namespace,
                    cfg.job_poll_interval,
                    cfg.job_timeout,
                )
                .await
            }
            Step::Uncordon => drain::uncordon_node(&self.client, node_name).await,
            Step::AwaitReadiness => {
                node::wait_pods_ready(
                    &self.client,
                    node_name,
                    cfg.ready_poll_interval,
                    cfg.ready_timeout,
                )
                .await
            }
            Step::Annotate => {
                node::annotate_node(
                    &self.client,
                    node_name,
                    COMPLETE_ANNOTATION,
                    &Utc::now().to_rfc3339(),
                )
                .await
            }
        }
    }
}
