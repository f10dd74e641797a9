use std::sync::Arc;

use anyhow::Result;

use super::tasks::Tasks;
use crate::api::WebhookServer;
use crate::api::WebhookState;
use crate::capacity::snapshot_channel;
use crate::capacity::CapacityPoller;
use crate::config::ServeArgs;
use crate::k8s::KubeInventory;

/// The webhook process: one capacity poller and one HTTPS server sharing a
/// snapshot cell.
pub struct Application {
    args: ServeArgs,
    inventory: KubeInventory,
}

impl Application {
    /// Connect to the cluster.
    ///
    /// # Errors
    ///
    /// - if no Kubernetes client can be created
    pub async fn build(args: ServeArgs) -> Result<Self> {
        let inventory = KubeInventory::connect(args.cluster.kubeconfig.as_deref())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?;
        Ok(Self { args, inventory })
    }

    /// Run until a shutdown signal arrives or a task stops.
    ///
    /// # Errors
    ///
    /// - if the poller or the server stops with an error, or stops at all
    ///   before shutdown was requested
    pub async fn run(self) -> Result<()> {
        let thresholds = self.args.capacity.thresholds();
        tracing::info!(
            local_cpu_millis = thresholds.local().cpu_millis,
            local_cpu_scaled = thresholds.local_cpu_scaled(),
            local_memory_bytes = thresholds.local().memory_bytes,
            local_mem_scaled = thresholds.local_mem_scaled(),
            local_gpu_count = thresholds.local().gpu_count,
            external_cpu_millis = thresholds.external().cpu_millis,
            external_memory_bytes = thresholds.external().memory_bytes,
            external_gpu_count = thresholds.external().gpu_count,
            "Capacity thresholds configured"
        );
        if self.args.image.as_deref().unwrap_or_default().is_empty() {
            tracing::warn!("No proxy image configured, jobs selected for proxying will be denied");
        }

        let (publisher, snapshots) = snapshot_channel();
        let gpu_resource = self.args.cluster.gpu_resource_name.clone();

        let poller = CapacityPoller::new(
            self.inventory,
            gpu_resource.clone(),
            self.args.poll_interval(),
            publisher,
        );

        let state = Arc::new(WebhookState {
            thresholds,
            proxy: self.args.proxy_settings(),
            gpu_resource,
            snapshots,
            snapshot_timeout: self.args.snapshot_timeout(),
        });
        let server = WebhookServer::new(
            state,
            self.args.listen_addr.clone(),
            self.args.tls_files(),
        );

        let mut tasks = Tasks::new();
        tasks.spawn_poller(poller);
        tasks.spawn_server(server);
        tasks.wait_for_completion().await
    }
}
