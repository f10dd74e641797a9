use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Api;
use kube::Client;
use kube::Config;

use super::types::KubernetesError;

/// Read-only view of the cluster the capacity poller scans.
#[async_trait]
pub trait ClusterInventory: Send + Sync {
    /// List every node in the cluster.
    async fn list_nodes(&self) -> Result<Vec<Node>, Report<KubernetesError>>;

    /// List the pods bound to `node_name` that still hold resources.
    async fn list_pods_on_node(&self, node_name: &str)
        -> Result<Vec<Pod>, Report<KubernetesError>>;
}

/// [`ClusterInventory`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeInventory {
    client: Client,
}

/// Upper bound on a single list call. A stalled API server ends the scan
/// with an error instead of freezing the published snapshot.
const LIST_TIMEOUT: Duration = Duration::from_secs(30);

impl KubeInventory {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect using an explicit kubeconfig, or the in-cluster service
    /// account / `~/.kube/config` when none is given.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ConnectionFailed`] if no client configuration can
    ///   be loaded
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Report<KubernetesError>> {
        let mut config = match kubeconfig {
            Some(path) => config_from_file(path).await?,
            None => Config::infer()
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: "No in-cluster or default kubeconfig found".to_string(),
                })?,
        };
        config.read_timeout = Some(LIST_TIMEOUT);

        let client = Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
            message: "Failed to create Kubernetes client".to_string(),
        })?;
        Ok(Self::new(client))
    }
}

async fn config_from_file(path: &Path) -> Result<Config, Report<KubernetesError>> {
    let kubeconfig =
        Kubeconfig::read_from(path).change_context_lazy(|| KubernetesError::ConnectionFailed {
            message: format!("Failed to read kubeconfig file: {}", path.display()),
        })?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(|| KubernetesError::ConnectionFailed {
            message: format!("Invalid kubeconfig: {}", path.display()),
        })
}

/// Field selector for pods on a node, skipping pods that already finished and
/// no longer count against the node's allocatable resources.
pub(crate) fn active_pods_selector(node_name: &str) -> String {
    format!("spec.nodeName={node_name},status.phase!=Succeeded,status.phase!=Failed")
}

#[async_trait]
impl ClusterInventory for KubeInventory {
    async fn list_nodes(&self) -> Result<Vec<Node>, Report<KubernetesError>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = api.list(&ListParams::default()).await.change_context(
            KubernetesError::ListNodesFailed {
                message: "node list request failed".to_string(),
            },
        )?;
        Ok(nodes.items)
    }

    async fn list_pods_on_node(
        &self,
        node_name: &str,
    ) -> Result<Vec<Pod>, Report<KubernetesError>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params = ListParams::default().fields(&active_pods_selector(node_name));
        let pods = api
            .list(&params)
            .await
            .change_context(KubernetesError::ListPodsFailed {
                node_name: node_name.to_string(),
                message: "pod list request failed".to_string(),
            })?;
        Ok(pods.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_reports_unreadable_kubeconfig() {
        let Err(err) = KubeInventory::connect(Some(Path::new("/nonexistent/kubeconfig"))).await
        else {
            panic!("connecting with a missing kubeconfig should fail");
        };
        assert_eq!(
            err.current_context().to_string(),
            "Failed to connect to Kubernetes API: Failed to read kubeconfig file: /nonexistent/kubeconfig"
        );
    }

    #[test]
    fn active_pods_selector_filters_node_and_finished_phases() {
        assert_eq!(
            active_pods_selector("worker-1"),
            "spec.nodeName=worker-1,status.phase!=Succeeded,status.phase!=Failed"
        );
    }
}
