//! Drain and uncordon controllers
//!
//! Draining is done client side: cordon the node, then evict every
//! evictable pod through the Eviction subresource so PodDisruptionBudgets
//! are respected. DaemonSet pods ignore cordons and static mirror pods
//! cannot be controlled, so both are left alone; pods already in a
//! terminal phase have nothing left to evict. Unreplicated pods and pods
//! backed by emptyDir storage are evicted rather than refused.
//!
//! No eviction is retried here: a 429 (an unsatisfied PodDisruptionBudget)
//! surfaces as [`Error::EvictionBlocked`] and the orchestrator decides what
//! happens to the node.

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, EvictParams, ListParams};
use kube::Client;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Evict all evictable pods from a node, leaving it cordoned.
pub async fn drain_node(client: &Client, node_name: &str) -> Result<()> {
    let nodes: Api<Node> = Api::all(client.clone());

    info!(node = %node_name, "Cordoning node");
    nodes
        .cordon(node_name)
        .await
        .map_err(|e| Error::or_not_found("node", node_name, e))?;

    let pods: Api<Pod> = Api::all(client.clone());
    let on_node = pods
        .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
        .await?;

    for pod in on_node.items.iter().filter(|p| is_evictable(p)) {
        evict_pod(client, pod).await?;
    }

    Ok(())
}

/// Mark a node schedulable again.
pub async fn uncordon_node(client: &Client, node_name: &str) -> Result<()> {
    let nodes: Api<Node> = Api::all(client.clone());

    info!(node = %node_name, "Uncordoning node");
    nodes
        .uncordon(node_name)
        .await
        .map_err(|e| Error::or_not_found("node", node_name, e))?;

    Ok(())
}

/// Whether a pod should be evicted during a drain.
///
/// Skips pods in a terminal phase, DaemonSet-controlled pods, and static
/// mirror pods. Everything else is fair game, including unreplicated pods
/// and pods with emptyDir volumes.
fn is_evictable(pod: &Pod) -> bool {
    if let Some(phase) = pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        if phase == "Succeeded" || phase == "Failed" {
            return false;
        }
    }

    if let Some(owners) = pod.metadata.owner_references.as_ref() {
        if owners
            .iter()
            .any(|o| o.controller == Some(true) && o.kind == "DaemonSet")
        {
            return false;
        }
    }

    if let Some(annotations) = pod.metadata.annotations.as_ref() {
        if annotations.contains_key("kubernetes.io/config.mirror") {
            return false;
        }
    }

    true
}

async fn evict_pod(client: &Client, pod: &Pod) -> Result<()> {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let pods: Api<Pod> = match pod.metadata.namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::default_namespaced(client.clone()),
    };

    debug!(pod = %name, "Evicting pod");
    match pods.evict(name, &EvictParams::default()).await {
        Ok(_) => Ok(()),
        // Pod vanished while draining; nothing left to evict.
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            debug!(pod = %name, "Pod already gone, skipping eviction");
            Ok(())
        }
        Err(kube::Error::Api(resp)) if resp.code == 429 => Err(Error::EvictionBlocked {
            pod: name.to_string(),
            reason: resp.message,
        }),
        Err(e) => Err(Error::Kube(e)),
    }
}
