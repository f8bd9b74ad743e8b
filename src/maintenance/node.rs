//! Node readiness gating and annotation
//!
//! After a node is uncordoned, system pods in `kube-system` are expected
//! to come back on their own; the readiness gate re-polls until they do.
//! Once the node is settled, a completion marker is merged into its
//! annotations so a later run can tell the node has been processed.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use tokio::time;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Namespace whose pods gate node readiness.
pub const SYSTEM_NAMESPACE: &str = "kube-system";

/// Block until every system pod on the node is settled.
///
/// Re-polls at `interval` while any non-terminal pod is not Running with a
/// true `Ready` condition. `deadline: None` waits without bound; otherwise
/// expiry yields [`Error::TimedOut`]. A transport error on any single list
/// propagates immediately.
pub async fn wait_pods_ready(
    client: &Client,
    node_name: &str,
    interval: Duration,
    deadline: Option<Duration>,
) -> Result<()> {
    info!(node = %node_name, "Waiting for pods to be ready");
    let pods: Api<Pod> = Api::namespaced(client.clone(), SYSTEM_NAMESPACE);
    let wait = poll_until_ready(&pods, node_name, interval);

    match deadline {
        Some(limit) => time::timeout(limit, wait).await.map_err(|_| Error::TimedOut {
            what: format!("pods on node '{node_name}' to become ready"),
            after: limit,
        })?,
        None => wait.await,
    }
}

async fn poll_until_ready(pods: &Api<Pod>, node_name: &str, interval: Duration) -> Result<()> {
    let params = ListParams::default().fields(&format!("spec.nodeName={node_name}"));
    loop {
        let on_node = pods.list(&params).await?;
        if all_pods_ready(&on_node.items) {
            return Ok(());
        }
        debug!(node = %node_name, "Pods not yet ready, waiting");
        time::sleep(interval).await;
    }
}

/// Whether every pod in the slice is settled: terminal-success pods pass,
/// everything else must be Running without a false `Ready` condition.
pub fn all_pods_ready(pods: &[Pod]) -> bool {
    pods.iter().all(|pod| {
        let status = match pod.status.as_ref() {
            Some(status) => status,
            None => return false,
        };

        match status.phase.as_deref() {
            Some("Succeeded") => true,
            Some("Running") => !status
                .conditions
                .iter()
                .flatten()
                .any(|c| c.type_ == "Ready" && c.status != "True"),
            _ => false,
        }
    })
}

/// Merge one key/value pair into the node's annotations and persist it.
///
/// No optimistic-lock retry: a concurrent modification surfaces as
/// [`Error::Conflict`] and the caller decides what to do with the node.
pub async fn annotate_node(client: &Client, node_name: &str, key: &str, value: &str) -> Result<()> {
    let nodes: Api<Node> = Api::all(client.clone());

    let mut node = nodes
        .get(node_name)
        .await
        .map_err(|e| Error::or_not_found("node", node_name, e))?;

    node.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());

    info!(node = %node_name, key = %key, "Annotating node");
    match nodes.replace(node_name, &PostParams::default(), &node).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 409 => Err(Error::Conflict {
            name: node_name.to_string(),
        }),
        Err(e) => Err(Error::Kube(e)),
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use kube::api::ObjectMeta;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn pod_in_phase(phase: &str, ready: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                namespace: Some(SYSTEM_NAMESPACE.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                conditions: ready.map(|status| {
                    vec![PodCondition {
                        type_: "Ready".to_string(),
                        status: status.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            }),
        }
    }

    async fn test_client(server: &MockServer) -> Client {
        let config = kube::Config::new(server.uri().parse().unwrap());
        Client::try_from(config).unwrap()
    }

    // ── readiness predicate ────────────────────────────────────────────────

    #[test]
    fn no_pods_means_ready() {
        assert!(all_pods_ready(&[]));
    }

    #[test]
    fn running_and_ready_pod_passes() {
        assert!(all_pods_ready(&[pod_in_phase("Running", Some("True"))]));
    }

    #[test]
    fn running_but_not_ready_pod_blocks() {
        assert!(!all_pods_ready(&[pod_in_phase("Running", Some("False"))]));
    }

    #[test]
    fn pending_pod_blocks() {
        assert!(!all_pods_ready(&[pod_in_phase("Pending", None)]));
    }

    #[test]
    fn succeeded_pod_is_skipped() {
        assert!(all_pods_ready(&[
            pod_in_phase("Succeeded", None),
            pod_in_phase("Running", Some("True")),
        ]));
    }

    #[test]
    fn one_blocked_pod_blocks_the_node() {
        assert!(!all_pods_ready(&[
            pod_in_phase("Running", Some("True")),
            pod_in_phase("Running", Some("False")),
        ]));
    }

    // ── readiness gate ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn gate_returns_immediately_with_no_matching_pods() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/api/v1/namespaces/{SYSTEM_NAMESPACE}/pods")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "PodList",
                "metadata": {},
                "items": [],
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        wait_pods_ready(&client, "n1", Duration::from_millis(10), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn gate_times_out_on_pending_pod() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/api/v1/namespaces/{SYSTEM_NAMESPACE}/pods")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "PodList",
                "metadata": {},
                "items": [serde_json::to_value(pod_in_phase("Pending", None)).unwrap()],
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = wait_pods_ready(
            &client,
            "n1",
            Duration::from_millis(5),
            Some(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::TimedOut { .. }));
    }

    // ── annotator ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn annotate_merges_key_into_existing_annotations() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/n1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": {
                    "name": "n1",
                    "annotations": { "existing": "kept" },
                },
            })))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/api/v1/nodes/n1"))
            .and(body_partial_json(json!({
                "metadata": {
                    "annotations": {
                        "existing": "kept",
                        "job-complete": "2024-01-01T00:00:00+00:00",
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": { "name": "n1" },
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        annotate_node(&client, "n1", "job-complete", "2024-01-01T00:00:00+00:00")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn annotate_surfaces_conflict() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/nodes/n1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Node",
                "metadata": { "name": "n1" },
            })))
            .mount(&server)
            .await;

        Mock::given(method("PUT"))
            .and(path("/api/v1/nodes/n1"))
            .respond_with(ResponseTemplate::new(409).set_body_json(json!({
                "apiVersion": "v1",
                "kind": "Status",
                "metadata": {},
                "status": "Failure",
                "message": "Operation cannot be fulfilled on nodes \"n1\": the object has been modified",
                "reason": "Conflict",
                "code": 409,
            })))
            .mount(&server)
            .await;

        let client = test_client(&server).await;
        let err = annotate_node(&client, "n1", "job-complete", "now")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { ref name } if name == "n1"));
    }
}
