use std::time::Duration;

use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::CapacitySnapshot;
use super::SnapshotPublisher;
use crate::k8s::resources::pod_requests;
use crate::k8s::ClusterInventory;
use crate::k8s::KubernetesError;
use crate::k8s::ResourceFootprint;

/// Continuously recomputes the largest per-node free CPU, memory and GPU in
/// the cluster.
///
/// A scan lists every schedulable node, sums the requests of the pods bound to
/// it and subtracts them from the node's allocatable resources. Only fully
/// completed scans are published.
pub struct CapacityPoller<C> {
    inventory: C,
    gpu_resource: String,
    interval: Duration,
    publisher: SnapshotPublisher,
}

impl<C: ClusterInventory> CapacityPoller<C> {
    /// Create a new poller.
    ///
    /// # Arguments
    ///
    /// * `inventory` - Source of node and pod objects
    /// * `gpu_resource` - Extended resource name counted as GPUs
    /// * `interval` - Pause between scans; zero rescans immediately
    /// * `publisher` - Where completed scans are published
    pub fn new(
        inventory: C,
        gpu_resource: impl Into<String>,
        interval: Duration,
        publisher: SnapshotPublisher,
    ) -> Self {
        Self {
            inventory,
            gpu_resource: gpu_resource.into(),
            interval,
            publisher,
        }
    }

    /// Scan the cluster until cancelled.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ListNodesFailed`] or [`KubernetesError::ListPodsFailed`]
    ///   as soon as any listing fails. Listings are not retried.
    #[tracing::instrument(skip(self, token), fields(gpu_resource = %self.gpu_resource))]
    pub async fn run(&self, token: CancellationToken) -> Result<(), Report<KubernetesError>> {
        info!("Starting capacity poller");

        loop {
            let snapshot = tokio::select! {
                _ = token.cancelled() => {
                    info!("Capacity poller shutdown requested");
                    return Ok(());
                }
                result = self.scan() => result?,
            };

            debug!(
                free_cpu_millis = snapshot.free.cpu_millis,
                free_memory_bytes = snapshot.free.memory_bytes,
                free_gpu_count = snapshot.free.gpu_count,
                nodes_scanned = snapshot.nodes_scanned,
                "Publishing capacity snapshot"
            );
            self.publisher.publish(snapshot);

            if self.interval.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                _ = token.cancelled() => {
                    info!("Capacity poller shutdown requested");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }

    /// Run a single full scan of the cluster.
    ///
    /// # Errors
    ///
    /// - [`KubernetesError::ListNodesFailed`] if nodes cannot be listed
    /// - [`KubernetesError::ListPodsFailed`] if pods of any node cannot be listed
    pub async fn scan(&self) -> Result<CapacitySnapshot, Report<KubernetesError>> {
        let nodes = self.inventory.list_nodes().await?;

        let mut free = ResourceFootprint::default();
        let mut nodes_scanned = 0;
        for node in &nodes {
            let Some(node_name) = node.metadata.name.as_deref() else {
                continue;
            };
            if is_unschedulable(node) {
                trace!(node = node_name, "Skipping unschedulable node");
                continue;
            }

            let allocatable = self.node_allocatable(node_name, node);
            let pods = self.inventory.list_pods_on_node(node_name).await?;
            let reserved = pods
                .iter()
                .try_fold(ResourceFootprint::default(), |total, pod| {
                    self.pod_reserved(node_name, pod)
                        .map(|requested| total.saturating_add(&requested))
                });

            // unknown reservations leave nothing free
            let node_free = reserved
                .map(|reserved| allocatable.saturating_sub(&reserved))
                .unwrap_or_default();
            trace!(node = node_name, ?allocatable, ?reserved, ?node_free, "Scanned node");

            free = free.max_each(&node_free);
            nodes_scanned += 1;
        }

        Ok(CapacitySnapshot {
            free,
            nodes_scanned,
            completed_at: Utc::now(),
        })
    }

    fn node_allocatable(&self, node_name: &str, node: &Node) -> ResourceFootprint {
        let Some(allocatable) = node
            .status
            .as_ref()
            .and_then(|status| status.allocatable.as_ref())
        else {
            return ResourceFootprint::default();
        };

        ResourceFootprint::from_resource_map(allocatable, &self.gpu_resource).unwrap_or_else(|e| {
            warn!(node = node_name, "Ignoring node with unparseable allocatable: {e}");
            ResourceFootprint::default()
        })
    }

    fn pod_reserved(&self, node_name: &str, pod: &Pod) -> Option<ResourceFootprint> {
        pod_requests(pod, &self.gpu_resource)
            .inspect_err(|e| {
                warn!(
                    node = node_name,
                    pod = pod.metadata.name.as_deref().unwrap_or("unknown"),
                    "Treating node as fully reserved, pod has unparseable requests: {e}"
                );
            })
            .ok()
    }
}

fn is_unschedulable(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.unschedulable)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::NodeSpec;
    use k8s_openapi::api::core::v1::NodeStatus;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::ResourceRequirements;
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;
    use crate::capacity::snapshot_channel;
    use crate::k8s::DEFAULT_GPU_RESOURCE;

    const GI: u64 = 1024 * 1024 * 1024;

    #[derive(Default)]
    struct FakeInventory {
        nodes: Vec<Node>,
        pods: HashMap<String, Vec<Pod>>,
        fail_pods_for: Option<String>,
        scans: AtomicUsize,
    }

    #[async_trait]
    impl ClusterInventory for FakeInventory {
        async fn list_nodes(&self) -> Result<Vec<Node>, Report<KubernetesError>> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Ok(self.nodes.clone())
        }

        async fn list_pods_on_node(
            &self,
            node_name: &str,
        ) -> Result<Vec<Pod>, Report<KubernetesError>> {
            if self.fail_pods_for.as_deref() == Some(node_name) {
                return Err(Report::new(KubernetesError::ListPodsFailed {
                    node_name: node_name.to_string(),
                    message: "forbidden".to_string(),
                }));
            }
            Ok(self.pods.get(node_name).cloned().unwrap_or_default())
        }
    }

    fn quantities(cpu: &str, memory: &str, gpu: &str) -> BTreeMap<String, Quantity> {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
            (DEFAULT_GPU_RESOURCE.to_string(), Quantity(gpu.to_string())),
        ])
    }

    fn node(name: &str, cpu: &str, memory: &str, gpu: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(quantities(cpu, memory, gpu)),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod(cpu: &str, memory: &str, gpu: &str) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "main".to_string(),
                    resources: Some(ResourceRequirements {
                        requests: Some(quantities(cpu, memory, gpu)),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn poller(inventory: FakeInventory) -> (CapacityPoller<FakeInventory>, crate::capacity::SnapshotReader) {
        let (publisher, reader) = snapshot_channel();
        let poller = CapacityPoller::new(inventory, DEFAULT_GPU_RESOURCE, Duration::ZERO, publisher);
        (poller, reader)
    }

    #[tokio::test]
    async fn scan_takes_independent_maxima_across_nodes() {
        let inventory = FakeInventory {
            nodes: vec![node("cpu-node", "8", "16Gi", "0"), node("gpu-node", "4", "64Gi", "2")],
            pods: HashMap::from([
                ("cpu-node".to_string(), vec![pod("2", "0", "0")]),
                ("gpu-node".to_string(), vec![pod("0", "8Gi", "1")]),
            ]),
            ..Default::default()
        };
        let (poller, _reader) = poller(inventory);

        let snapshot = poller.scan().await.expect("scan should succeed");

        assert_eq!(snapshot.free, ResourceFootprint::new(6000, 56 * GI, 1));
        assert_eq!(snapshot.nodes_scanned, 2);
    }

    #[tokio::test]
    async fn scan_clamps_overcommitted_node_to_zero() {
        let inventory = FakeInventory {
            nodes: vec![node("busy", "2", "4Gi", "0")],
            pods: HashMap::from([(
                "busy".to_string(),
                vec![pod("1500m", "3Gi", "0"), pod("1500m", "3Gi", "0")],
            )]),
            ..Default::default()
        };
        let (poller, _reader) = poller(inventory);

        let snapshot = poller.scan().await.expect("scan should succeed");

        assert_eq!(snapshot.free, ResourceFootprint::default());
    }

    #[tokio::test]
    async fn scan_never_reports_more_than_allocatable() {
        let inventory = FakeInventory {
            nodes: vec![
                node("a", "3", "8Gi", "1"),
                node("b", "12", "2Gi", "0"),
                node("c", "500m", "32Gi", "4"),
            ],
            pods: HashMap::from([("b".to_string(), vec![pod("20", "1Gi", "0")])]),
            ..Default::default()
        };
        let (poller, _reader) = poller(inventory);

        let snapshot = poller.scan().await.expect("scan should succeed");

        assert!(snapshot.free.cpu_millis <= 12_000);
        assert_eq!(snapshot.free.cpu_millis, 3000, "node b is overcommitted");
        assert_eq!(snapshot.free.memory_bytes, 32 * GI);
        assert_eq!(snapshot.free.gpu_count, 4);
    }

    #[tokio::test]
    async fn unparseable_pod_requests_leave_node_without_free_capacity() {
        let inventory = FakeInventory {
            nodes: vec![node("busy", "64", "256Gi", "8"), node("small", "2", "4Gi", "1")],
            pods: HashMap::from([(
                "busy".to_string(),
                vec![pod("1", "1Gi", "0"), pod("lots", "1Gi", "0")],
            )]),
            ..Default::default()
        };
        let (poller, _reader) = poller(inventory);

        let snapshot = poller.scan().await.expect("scan should succeed");

        assert_eq!(snapshot.free, ResourceFootprint::new(2000, 4 * GI, 1));
        assert_eq!(snapshot.nodes_scanned, 2);
    }

    #[tokio::test]
    async fn scan_skips_unschedulable_nodes() {
        let mut cordoned = node("cordoned", "64", "256Gi", "8");
        cordoned.spec = Some(NodeSpec {
            unschedulable: Some(true),
            ..Default::default()
        });
        let inventory = FakeInventory {
            nodes: vec![cordoned, node("small", "1", "1Gi", "0")],
            ..Default::default()
        };
        let (poller, _reader) = poller(inventory);

        let snapshot = poller.scan().await.expect("scan should succeed");

        assert_eq!(snapshot.free, ResourceFootprint::new(1000, GI, 0));
        assert_eq!(snapshot.nodes_scanned, 1);
    }

    #[tokio::test]
    async fn scan_fails_when_pods_cannot_be_listed() {
        let inventory = FakeInventory {
            nodes: vec![node("ok", "1", "1Gi", "0"), node("broken", "1", "1Gi", "0")],
            fail_pods_for: Some("broken".to_string()),
            ..Default::default()
        };
        let (poller, _reader) = poller(inventory);

        let err = poller.scan().await.expect_err("scan should fail");
        assert!(matches!(
            err.current_context(),
            KubernetesError::ListPodsFailed { node_name, .. } if node_name == "broken"
        ));
    }

    #[tokio::test]
    async fn run_stops_on_listing_error_without_publishing() {
        let inventory = FakeInventory {
            nodes: vec![node("broken", "1", "1Gi", "0")],
            fail_pods_for: Some("broken".to_string()),
            ..Default::default()
        };
        let (poller, reader) = poller(inventory);

        let result = poller.run(CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(reader.latest(), None);
    }

    #[test_log::test(tokio::test)]
    async fn run_publishes_until_cancelled() {
        let inventory = FakeInventory {
            nodes: vec![node("n1", "16", "32Gi", "2")],
            ..Default::default()
        };
        let (poller, reader) = poller(inventory);
        let token = CancellationToken::new();

        let handle = tokio::spawn({
            let token = token.clone();
            async move {
                let result = poller.run(token).await;
                (result, poller.inventory.scans.load(Ordering::SeqCst))
            }
        });

        let snapshot = reader
            .wait_latest(Duration::from_secs(5))
            .await
            .expect("poller should publish a snapshot");
        assert_eq!(snapshot.free, ResourceFootprint::new(16_000, 32 * GI, 2));

        token.cancel();
        let (result, scans) = handle.await.expect("poller task should not panic");
        assert!(result.is_ok());
        assert!(scans >= 1);
    }
}
