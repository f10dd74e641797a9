use thiserror::Error;

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Error)]
pub enum KubernetesError {
    #[error("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[error("Failed to list nodes: {message}")]
    ListNodesFailed { message: String },
    #[error("Failed to list pods on node {node_name}: {message}")]
    ListPodsFailed { node_name: String, message: String },
}
