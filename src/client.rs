//! Kubernetes client bootstrap
//!
//! Prefers in-cluster configuration; falls back to the local kubeconfig,
//! which honors `$KUBECONFIG` and defaults to `~/.kube/config`.

use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::info;

use crate::error::{Error, Result};

/// Build a [`Client`] from in-cluster config when running inside a pod,
/// otherwise from the local kubeconfig.
pub async fn new_client() -> Result<Client> {
    let config = match Config::incluster() {
        Ok(config) => config,
        Err(_) => {
            info!("In-cluster config not available, looking for kubeconfig");
            Config::from_kubeconfig(&KubeConfigOptions::default())
                .await
                .map_err(|e| Error::Config(e.to_string()))?
        }
    };

    Client::try_from(config).map_err(Error::Kube)
}
