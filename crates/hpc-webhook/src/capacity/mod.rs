//! Live view of free cluster capacity.
//!
//! [`CapacityPoller`] rescans the cluster in a loop and publishes each
//! completed scan through a [`SnapshotPublisher`]; request handlers read the
//! latest one through any number of cloned [`SnapshotReader`]s.

pub mod poller;
pub mod snapshot;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

pub use poller::CapacityPoller;
pub use snapshot::snapshot_channel;
pub use snapshot::SnapshotError;
pub use snapshot::SnapshotPublisher;
pub use snapshot::SnapshotReader;

use crate::k8s::ResourceFootprint;

/// Result of one complete cluster scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshot {
    /// Largest free amount of each resource found on any single node.
    /// CPU, memory and GPU maxima may come from different nodes.
    pub free: ResourceFootprint,
    pub nodes_scanned: usize,
    pub completed_at: DateTime<Utc>,
}
