use std::future::Future;
use std::str::FromStr;

use thiserror::Error;

use super::CapacityThresholds;
use crate::capacity::CapacitySnapshot;
use crate::capacity::SnapshotError;
use crate::k8s::ResourceFootprint;

/// Job label that opts a Job into transfer handling.
pub const TRANSFER_LABEL: &str = "hpctransfer";

/// Recognized values of the [`TRANSFER_LABEL`] label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum TransferMode {
    /// Always run through the proxy unless nothing can host the job.
    #[display("must")]
    Must,
    /// Run through the proxy only when the job is too big for the local cluster.
    #[display("can")]
    Can,
    /// Like `can`, but also offload when the cluster has no room right now.
    #[display("cooperative")]
    Cooperative,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized hpctransfer value `{0}`, expected one of must, can, cooperative")]
pub struct UnknownTransferMode(pub String);

impl FromStr for TransferMode {
    type Err = UnknownTransferMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "must" => Ok(Self::Must),
            "can" => Ok(Self::Can),
            "cooperative" => Ok(Self::Cooperative),
            other => Err(UnknownTransferMode(other.to_string())),
        }
    }
}

impl TransferMode {
    /// Whether a job with this label is rewritten into a proxy for `decision`.
    pub fn requires_proxy(self, decision: &PlacementDecision) -> bool {
        match decision {
            PlacementDecision::Reject(_) => false,
            PlacementDecision::Offload => true,
            PlacementDecision::StayLocal => self == Self::Must,
        }
    }
}

/// Where a job should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementDecision {
    StayLocal,
    Offload,
    /// Neither the local cluster nor the external system can host the job.
    Reject(String),
}

/// Decide placement for a job carrying `mode`.
///
/// `snapshot` is only awaited in [`TransferMode::Cooperative`] and only when
/// the static check did not already reject the job.
///
/// # Errors
///
/// - [`SnapshotError`] if a live snapshot is needed but none can be read
pub async fn decide<F, Fut>(
    mode: TransferMode,
    footprint: &ResourceFootprint,
    thresholds: &CapacityThresholds,
    snapshot: F,
) -> Result<PlacementDecision, SnapshotError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<CapacitySnapshot, SnapshotError>>,
{
    let decision = check_max_resources(footprint, thresholds);
    if mode != TransferMode::Cooperative || matches!(decision, PlacementDecision::Reject(_)) {
        return Ok(decision);
    }

    let snapshot = snapshot().await?;
    if exceeds_free_capacity(footprint, &snapshot.free) {
        Ok(external_fit(footprint, thresholds))
    } else {
        Ok(PlacementDecision::StayLocal)
    }
}

/// Static placement against the configured ceilings.
///
/// GPU jobs are compared against the unscaled local GPU ceiling first and
/// only then against the scaled CPU and memory thresholds.
pub fn check_max_resources(
    footprint: &ResourceFootprint,
    thresholds: &CapacityThresholds,
) -> PlacementDecision {
    if footprint.gpu_count > 0 {
        if footprint.gpu_count > thresholds.local().gpu_count {
            return external_fit(footprint, thresholds);
        }
        if footprint.memory_bytes > thresholds.local_mem_scaled()
            || footprint.cpu_millis > thresholds.local_cpu_scaled()
        {
            return external_fit(footprint, thresholds);
        }
        return PlacementDecision::StayLocal;
    }

    if footprint.memory_bytes > thresholds.local_mem_scaled() {
        return external_fit(footprint, thresholds);
    }
    if footprint.cpu_millis > thresholds.local_cpu_scaled() {
        return external_fit(footprint, thresholds);
    }
    PlacementDecision::StayLocal
}

/// `Offload` when the external system can host the job, `Reject` otherwise.
fn external_fit(footprint: &ResourceFootprint, thresholds: &CapacityThresholds) -> PlacementDecision {
    let external = thresholds.external();
    let mut exceeded = Vec::new();

    if footprint.cpu_millis > external.cpu_millis {
        exceeded.push(format!(
            "cpu {}m > {}m",
            footprint.cpu_millis, external.cpu_millis
        ));
    }
    if footprint.memory_bytes > external.memory_bytes {
        exceeded.push(format!(
            "memory {} > {} bytes",
            footprint.memory_bytes, external.memory_bytes
        ));
    }
    if footprint.gpu_count > external.gpu_count {
        exceeded.push(format!(
            "gpu {} > {}",
            footprint.gpu_count, external.gpu_count
        ));
    }

    if exceeded.is_empty() {
        PlacementDecision::Offload
    } else {
        PlacementDecision::Reject(format!(
            "job exceeds the capacity of the local cluster and the external system ({})",
            exceeded.join(", ")
        ))
    }
}

fn exceeds_free_capacity(footprint: &ResourceFootprint, free: &ResourceFootprint) -> bool {
    (footprint.gpu_count > 0 && footprint.gpu_count > free.gpu_count)
        || footprint.memory_bytes > free.memory_bytes
        || footprint.cpu_millis > free.cpu_millis
}
