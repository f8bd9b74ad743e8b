//! Maintenance job dispatch and completion polling
//!
//! A maintenance job is a one-shot batch Job pinned to a single node via
//! its hostname label. It tolerates `NoExecute` and `NoSchedule` taints so
//! it can run on a node that was just cordoned. Dispatch is idempotent:
//! a job that already exists under the target name counts as dispatched.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, Toleration};
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
use tokio::time;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Deterministic job name for a node; at most one job per node per run.
pub fn job_name_for(node_name: &str) -> String {
    format!("job-on-{node_name}")
}

/// Everything needed to build a maintenance job.
pub struct JobParams<'a> {
    pub node_name: &'a str,
    pub job_name: &'a str,
    pub namespace: &'a str,
    pub image: &'a str,
    pub command: &'a [String],
}

/// Ensure exactly one maintenance job exists for the node.
///
/// If a job with the same name is already present this is a no-op success;
/// the existing object is left untouched.
pub async fn ensure_job(client: &Client, params: &JobParams<'_>) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), params.namespace);

    match jobs.get(params.job_name).await {
        Ok(_) => {
            info!(job = %params.job_name, "Job already exists, skipping");
            return Ok(());
        }
        Err(kube::Error::Api(resp)) if resp.code == 404 => {}
        Err(e) => return Err(Error::Kube(e)),
    }

    info!(job = %params.job_name, node = %params.node_name, "Creating maintenance job");
    jobs.create(&PostParams::default(), &build_job(params))
        .await?;

    Ok(())
}

/// Observed job state, derived from the succeeded/failed counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Active,
    Succeeded,
    Failed,
}

/// Classify a job by its status counters; terminal once either is > 0.
pub fn job_state(job: &Job) -> JobState {
    let status = job.status.as_ref();
    if status.and_then(|s| s.succeeded).unwrap_or(0) > 0 {
        JobState::Succeeded
    } else if status.and_then(|s| s.failed).unwrap_or(0) > 0 {
        JobState::Failed
    } else {
        JobState::Active
    }
}

/// Poll the job at a fixed interval until it reaches a terminal state.
///
/// Returns `Ok(())` on success, [`Error::JobFailed`] if the job reports a
/// failed pod, and [`Error::TimedOut`] if the deadline expires first.
/// `deadline: None` waits without bound. A transport error on any single
/// fetch propagates immediately.
pub async fn await_completion(
    client: &Client,
    job_name: &str,
    namespace: &str,
    interval: Duration,
    deadline: Option<Duration>,
) -> Result<()> {
    let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);
    let wait = poll_until_terminal(&jobs, job_name, interval);

    match deadline {
        Some(limit) => time::timeout(limit, wait).await.map_err(|_| Error::TimedOut {
            what: format!("completion of job '{job_name}'"),
            after: limit,
        })?,
        None => wait.await,
    }
}

async fn poll_until_terminal(jobs: &Api<Job>, job_name: &str, interval: Duration) -> Result<()> {
    loop {
        let job = jobs
            .get(job_name)
            .await
            .map_err(|e| Error::or_not_found("job", job_name, e))?;

        match job_state(&job) {
            JobState::Succeeded => {
                info!(job = %job_name, "Job completed successfully");
                return Ok(());
            }
            JobState::Failed => {
                return Err(Error::JobFailed {
                    name: job_name.to_string(),
                })
            }
            JobState::Active => {
                debug!(job = %job_name, "Job not yet complete, waiting");
                time::sleep(interval).await;
            }
        }
    }
}

fn build_job(params: &JobParams<'_>) -> Job {
    Job {
        metadata: ObjectMeta {
            name: Some(params.job_name.to_string()),
            namespace: Some(params.namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                "kadmin".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: None,
                spec: Some(PodSpec {
                    node_selector: Some(BTreeMap::from([(
                        "kubernetes.io/hostname".to_string(),
                        params.node_name.to_string(),
                    )])),
                    containers: vec![Container {
                        name: "kadmin-job".to_string(),
                        image: Some(params.image.to_string()),
                        command: Some(params.command.to_vec()),
                        ..Default::default()
                    }],
                    restart_policy: Some("OnFailure".to_string()),
                    tolerations: Some(vec![
                        Toleration {
                            effect: Some("NoExecute".to_string()),
                            operator: Some("Exists".to_string()),
                            ..Default::default()
                        },
                        Toleration {
                            effect: Some("NoSchedule".to_string()),
                            operator: Some("Exists".to_string()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
