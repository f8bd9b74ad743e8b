use std::time::Duration;

use clap::Parser;
use kadmin::maintenance::{Orchestrator, OrchestratorConfig};
use kadmin::Error;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Administer Kubernetes clusters with ease: drain each node, run a
/// maintenance job on it, and bring it back, one node at a time.
#[derive(Parser, Debug)]
#[command(name = "kadmin", author, version, about)]
struct Args {
    /// Namespace to create maintenance jobs in
    #[arg(short = 'n', long, env = "KADMIN_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Image to use for the maintenance job
    #[arg(long, env = "KADMIN_JOB_IMAGE", default_value = "busybox:latest")]
    job_image: String,

    /// Command to run in the maintenance job
    #[arg(long, num_args = 1.., default_values = ["sh", "-c", "echo Hello && sleep 5"])]
    job_command: Vec<String>,

    /// Seconds to wait for each maintenance job to finish (0 = no limit)
    #[arg(long, default_value_t = 3600)]
    job_timeout_secs: u64,

    /// Seconds to wait for system pods on each node to become ready (0 = no limit)
    #[arg(long, default_value_t = 1800)]
    ready_timeout_secs: u64,
}

fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();

    info!("Starting kadmin v{}", env!("CARGO_PKG_VERSION"));

    let client = kadmin::client::new_client().await?;
    info!("Connected to Kubernetes cluster");

    let config = OrchestratorConfig {
        namespace: args.namespace,
        job_image: args.job_image,
        job_command: args.job_command,
        job_timeout: timeout_from_secs(args.job_timeout_secs),
        ready_timeout: timeout_from_secs(args.ready_timeout_secs),
        ..Default::default()
    };

    // Only the dispatch-then-uncordon double failure surfaces as Err here;
    // every other per-node failure is recorded in the report.
    let report = Orchestrator::new(client, config).run().await?;

    for entry in &report.outcomes {
        if entry.outcome.is_completed() {
            info!(node = %entry.node, "Node processed");
        } else {
            warn!(node = %entry.node, outcome = ?entry.outcome, "Node skipped");
        }
    }
    info!(
        summary = %serde_json::to_string(&report).unwrap_or_default(),
        "Run report"
    );

    Ok(())
}
