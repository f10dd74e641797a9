use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;

use super::quantity::parse_milli_value;
use super::quantity::parse_value;
use super::quantity::QuantityError;

/// Default extended resource name used for GPUs.
pub const DEFAULT_GPU_RESOURCE: &str = "nvidia.com/gpu";

/// CPU, memory and GPU amounts, used both for what a workload asks for and
/// for what a node has left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFootprint {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
    pub gpu_count: u64,
}

impl ResourceFootprint {
    pub const fn new(cpu_millis: u64, memory_bytes: u64, gpu_count: u64) -> Self {
        Self {
            cpu_millis,
            memory_bytes,
            gpu_count,
        }
    }

    /// Read `cpu`, `memory` and the GPU resource out of a requests/limits map.
    /// Missing entries count as zero.
    pub fn from_resource_map(
        resources: &BTreeMap<String, Quantity>,
        gpu_resource: &str,
    ) -> Result<Self, QuantityError> {
        Ok(Self {
            cpu_millis: parse_entry(resources, "cpu", parse_milli_value)?,
            memory_bytes: parse_entry(resources, "memory", parse_value)?,
            gpu_count: parse_entry(resources, gpu_resource, parse_value)?,
        })
    }

    pub const fn is_empty(&self) -> bool {
        self.cpu_millis == 0 && self.memory_bytes == 0 && self.gpu_count == 0
    }

    pub const fn saturating_add(&self, other: &Self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            gpu_count: self.gpu_count.saturating_add(other.gpu_count),
        }
    }

    /// Per-resource subtraction clamped at zero, so an overcommitted node
    /// reports no free capacity instead of wrapping.
    pub const fn saturating_sub(&self, other: &Self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.saturating_sub(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_sub(other.memory_bytes),
            gpu_count: self.gpu_count.saturating_sub(other.gpu_count),
        }
    }

    /// Per-resource maximum. The three fields may come from different inputs.
    pub fn max_each(&self, other: &Self) -> Self {
        Self {
            cpu_millis: self.cpu_millis.max(other.cpu_millis),
            memory_bytes: self.memory_bytes.max(other.memory_bytes),
            gpu_count: self.gpu_count.max(other.gpu_count),
        }
    }
}

fn parse_entry(
    resources: &BTreeMap<String, Quantity>,
    name: &str,
    parse: fn(&str) -> Result<u64, QuantityError>,
) -> Result<u64, QuantityError> {
    resources
        .get(name)
        .map(|quantity| parse(&quantity.0))
        .transpose()
        .map(Option::unwrap_or_default)
}

/// Sum of the resource requests of every container in the pod.
pub fn pod_requests(pod: &Pod, gpu_resource: &str) -> Result<ResourceFootprint, QuantityError> {
    let Some(spec) = &pod.spec else {
        return Ok(ResourceFootprint::default());
    };

    spec.containers
        .iter()
        .filter_map(|container| {
            container
                .resources
                .as_ref()
                .and_then(|resources| resources.requests.as_ref())
        })
        .try_fold(ResourceFootprint::default(), |total, requests| {
            let requested = ResourceFootprint::from_resource_map(requests, gpu_resource)?;
            Ok(total.saturating_add(&requested))
        })
}
