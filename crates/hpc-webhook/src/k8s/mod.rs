//! Kubernetes integration module.
//!
//! The webhook only reads from the cluster: it lists nodes and the pods bound
//! to them so the capacity poller can work out how much room is left. The
//! main components are:
//! - [`ClusterInventory`]: the "list nodes" / "list pods on node" seam
//! - [`KubeInventory`]: its implementation over the API server
//! - [`ResourceFootprint`]: CPU, memory and GPU amounts parsed from quantities

pub mod inventory;
pub mod quantity;
pub mod resources;
pub mod types;

pub use inventory::ClusterInventory;
pub use inventory::KubeInventory;
pub use quantity::QuantityError;
pub use resources::ResourceFootprint;
pub use resources::DEFAULT_GPU_RESOURCE;
pub use types::KubernetesError;
