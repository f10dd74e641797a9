use core::error::Error;

use poem::error::ResponseError;
use poem::http::StatusCode;
use thiserror::Error;

use super::review::GroupVersionResource;
use crate::capacity::SnapshotError;
use crate::k8s::QuantityError;
use crate::placement::UnknownTransferMode;

/// Reasons an admission request could not be answered with an
/// AdmissionReview.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("admission request must be application/json content-type, got `{0}`")]
    UnsupportedContentType(String),
    #[error("unmarshalling body into admission review object not successful: {0}")]
    InvalidReview(String),
    #[error("using admission review not possible: request field is nil")]
    MissingRequest,
    #[error("wrong resource type: {0}")]
    WrongResource(GroupVersionResource),
    #[error("deserializing job not successful: {0}")]
    InvalidJob(String),
    #[error("job is not valid for mutation: label 'hpctransfer' not found")]
    MissingTransferLabel,
    #[error("job is not valid for mutation: {0}")]
    InvalidTransferLabel(#[from] UnknownTransferMode),
    #[error("job is not valid for mutation: {0}")]
    InvalidQuantity(#[from] QuantityError),
    #[error("capacity snapshot unavailable: {0}")]
    SnapshotUnavailable(#[from] SnapshotError),
    #[error("marshalling patches not successful: {0}")]
    Encoding(String),
}

impl ResponseError for AdmissionError {
    fn status(&self) -> StatusCode {
        match self {
            Self::SnapshotUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Errors of the HTTPS listener
#[derive(Debug, derive_more::Display)]
pub enum ServerError {
    #[display("Failed to read TLS material {path}")]
    TlsMaterial { path: String },
    #[display("Webhook server failed")]
    ServerFailed,
}

impl Error for ServerError {}
