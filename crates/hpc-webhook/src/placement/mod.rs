//! Placement decisions for labeled Jobs.
//!
//! A job is compared against static [`CapacityThresholds`] and, in
//! cooperative mode, against the latest capacity snapshot.

pub mod decider;
pub mod thresholds;

pub use decider::check_max_resources;
pub use decider::decide;
pub use decider::PlacementDecision;
pub use decider::TransferMode;
pub use decider::UnknownTransferMode;
pub use decider::TRANSFER_LABEL;
pub use thresholds::CapacityThresholds;
