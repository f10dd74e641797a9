use crate::k8s::ResourceFootprint;

/// Share of the local ceilings a single job may claim before it is
/// considered too big to stay local. GPUs are exempt.
const LOCAL_HEADROOM_PERCENT: u64 = 70;

/// Static capacity ceilings of the local cluster and of the external system,
/// fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityThresholds {
    local: ResourceFootprint,
    external: ResourceFootprint,
    local_cpu_scaled: u64,
    local_mem_scaled: u64,
}

impl CapacityThresholds {
    pub fn new(local: ResourceFootprint, external: ResourceFootprint) -> Self {
        Self {
            local,
            external,
            local_cpu_scaled: scale(local.cpu_millis),
            local_mem_scaled: scale(local.memory_bytes),
        }
    }

    pub const fn local(&self) -> &ResourceFootprint {
        &self.local
    }

    pub const fn external(&self) -> &ResourceFootprint {
        &self.external
    }

    /// `floor(local cpu max * 0.7)` in millicores.
    pub const fn local_cpu_scaled(&self) -> u64 {
        self.local_cpu_scaled
    }

    /// `floor(local memory max * 0.7)` in bytes.
    pub const fn local_mem_scaled(&self) -> u64 {
        self.local_mem_scaled
    }
}

fn scale(value: u64) -> u64 {
    // u128 keeps the multiplication exact for any u64 input; the result is
    // smaller than the input so the narrowing cannot truncate.
    (u128::from(value) * u128::from(LOCAL_HEADROOM_PERCENT) / 100) as u64
}
