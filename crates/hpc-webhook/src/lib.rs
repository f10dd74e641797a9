//! Mutating admission webhook for batch Jobs labeled `hpctransfer`.
//!
//! Each labeled Job is placed locally, offloaded to an external compute
//! system through a proxy container, or denied, based on its resource
//! requests, static capacity ceilings and a live view of free cluster
//! capacity.

pub mod api;
pub mod app;
pub mod capacity;
pub mod config;
pub mod job;
pub mod k8s;
pub mod patch;
pub mod placement;
