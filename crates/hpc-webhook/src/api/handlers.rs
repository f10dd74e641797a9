use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::batch::v1::Job;
use poem::handler;
use poem::http::Uri;
use poem::web::Data;
use poem::web::Json;
use poem::Body;
use poem::Request;
use tracing::error;
use tracing::info;

use super::errors::AdmissionError;
use super::review::AdmissionResponse;
use super::review::AdmissionReview;
use crate::capacity::SnapshotReader;
use crate::job::extract;
use crate::job::transfer_label;
use crate::job::Extraction;
use crate::patch::build_patch;
use crate::patch::PatchError;
use crate::patch::ProxySettings;
use crate::placement::decide;
use crate::placement::CapacityThresholds;
use crate::placement::PlacementDecision;
use crate::placement::TransferMode;

const JSON_CONTENT_TYPE: &str = "application/json";

/// Read-only state shared by all admission requests.
#[derive(Debug, Clone)]
pub struct WebhookState {
    pub thresholds: CapacityThresholds,
    pub proxy: ProxySettings,
    pub gpu_resource: String,
    pub snapshots: SnapshotReader,
    /// Upper bound on waiting for the first capacity snapshot.
    pub snapshot_timeout: Duration,
}

/// Mutate a batch Job admission request.
#[handler]
pub async fn mutate(
    req: &Request,
    body: Body,
    state: Data<&Arc<WebhookState>>,
) -> poem::Result<Json<AdmissionReview>> {
    info!("Received mutation request");
    let body = body.into_vec().await?;

    let review = admit(&state, req.content_type(), &body)
        .await
        .inspect_err(|e| error!(error = %e, "Admission request failed"))?;
    Ok(Json(review))
}

#[handler]
pub fn health(uri: &Uri) -> String {
    let message = format!("healthy uri {uri}");
    info!("{message}");
    message
}

/// Answer one admission request.
///
/// Jobs that are not proxied are admitted unchanged; jobs nothing can host
/// are denied inside a successful review.
///
/// # Errors
///
/// - [`AdmissionError`] for malformed requests, unknown trigger labels,
///   unparseable quantities and a missing capacity snapshot
#[tracing::instrument(skip_all, fields(uid = tracing::field::Empty))]
pub async fn admit(
    state: &WebhookState,
    content_type: Option<&str>,
    body: &[u8],
) -> Result<AdmissionReview, AdmissionError> {
    check_content_type(content_type)?;

    let review: AdmissionReview = serde_json::from_slice(body)
        .map_err(|e| AdmissionError::InvalidReview(e.to_string()))?;
    let request = review.request.ok_or(AdmissionError::MissingRequest)?;
    tracing::Span::current().record("uid", request.uid.as_str());

    if !request.resource.is_batch_v1_jobs() {
        return Err(AdmissionError::WrongResource(request.resource));
    }
    let object = request
        .object
        .ok_or_else(|| AdmissionError::InvalidJob("request carries no object".to_string()))?;
    let job: Job =
        serde_json::from_value(object).map_err(|e| AdmissionError::InvalidJob(e.to_string()))?;

    let mode: TransferMode = transfer_label(&job)
        .ok_or(AdmissionError::MissingTransferLabel)?
        .parse()?;

    let view = match extract(&job, &state.gpu_resource)? {
        Extraction::Eligible(view) => view,
        Extraction::Passthrough(reason) => {
            info!(reason, "Sending back response, job left unchanged");
            return Ok(AdmissionResponse::allow(request.uid).into_review());
        }
    };

    let decision = decide(mode, &view.footprint, &state.thresholds, || {
        state.snapshots.wait_latest(state.snapshot_timeout)
    })
    .await?;
    info!(
        job = %view.name,
        %mode,
        ?decision,
        cpu_millis = view.footprint.cpu_millis,
        memory_bytes = view.footprint.memory_bytes,
        gpu_count = view.footprint.gpu_count,
        "Placement decided"
    );

    let response = match decision {
        PlacementDecision::Reject(reason) => AdmissionResponse::deny(request.uid, reason),
        decision if !mode.requires_proxy(&decision) => AdmissionResponse::allow(request.uid),
        decision => match build_patch(&view, &decision, &state.proxy, &state.gpu_resource) {
            Ok(patch) => AdmissionResponse::allow(request.uid)
                .with_patch(&patch)
                .map_err(|e| AdmissionError::Encoding(e.to_string()))?,
            Err(e @ PatchError::ProxyImageNotSet) => {
                AdmissionResponse::deny(request.uid, e.to_string())
            }
            Err(PatchError::Serialization(e)) => {
                return Err(AdmissionError::Encoding(e.to_string()));
            }
        },
    };

    if response.allowed {
        info!(mutated = response.patch.is_some(), "Sending back response");
    } else {
        info!(reason = ?response.result.as_ref().map(|status| &status.message), "Denying job");
    }
    Ok(response.into_review())
}

fn check_content_type(content_type: Option<&str>) -> Result<(), AdmissionError> {
    let essence = content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .unwrap_or_default();
    if essence.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
        Ok(())
    } else {
        Err(AdmissionError::UnsupportedContentType(
            content_type.unwrap_or_default().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;
    use crate::capacity::snapshot_channel;
    use crate::k8s::ResourceFootprint;
    use crate::k8s::DEFAULT_GPU_RESOURCE;

    fn state() -> WebhookState {
        let (_publisher, snapshots) = snapshot_channel();
        WebhookState {
            thresholds: CapacityThresholds::new(
                ResourceFootprint::new(8000, 64 << 30, 0),
                ResourceFootprint::new(100_000, 1 << 40, 4),
            ),
            proxy: ProxySettings {
                image: Some("hpc-proxy".to_string()),
                ..Default::default()
            },
            gpu_resource: DEFAULT_GPU_RESOURCE.to_string(),
            snapshots,
            snapshot_timeout: Duration::from_millis(20),
        }
    }

    fn review_body(label: &str, cpu: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "uid-1",
                "resource": {"group": "batch", "version": "v1", "resource": "jobs"},
                "object": {
                    "apiVersion": "batch/v1",
                    "kind": "Job",
                    "metadata": {"name": "sim", "labels": {"hpctransfer": label}},
                    "spec": {"template": {"spec": {"containers": [{
                        "name": "main",
                        "image": "solver:1",
                        "resources": {"requests": {"cpu": cpu}}
                    }]}}}
                }
            }
        }))
        .unwrap()
    }

    fn response(review: AdmissionReview) -> AdmissionResponse {
        review.response.expect("review should carry a response")
    }

    #[test]
    fn content_type_allows_parameters() {
        assert!(check_content_type(Some("application/json")).is_ok());
        assert!(check_content_type(Some("application/json; charset=utf-8")).is_ok());
        assert!(check_content_type(Some("text/plain")).is_err());
        assert!(check_content_type(None).is_err());
    }

    #[tokio::test]
    async fn small_can_job_is_left_alone() {
        let review = admit(&state(), Some(JSON_CONTENT_TYPE), &review_body("can", "1"))
            .await
            .unwrap();
        let response = response(review);
        assert!(response.allowed);
        assert_eq!(response.uid, "uid-1");
        assert_eq!(response.patch, None);
    }

    #[tokio::test]
    async fn small_must_job_is_proxied() {
        let review = admit(&state(), Some(JSON_CONTENT_TYPE), &review_body("must", "1"))
            .await
            .unwrap();
        let response = response(review);
        assert!(response.allowed);
        assert_eq!(response.patch_type.as_deref(), Some("JSONPatch"));
    }

    #[tokio::test]
    async fn oversized_job_is_denied() {
        let review = admit(&state(), Some(JSON_CONTENT_TYPE), &review_body("must", "500"))
            .await
            .unwrap();
        let response = response(review);
        assert!(!response.allowed);
        assert_eq!(response.result.map(|status| status.code), Some(403));
    }

    #[tokio::test]
    async fn missing_proxy_image_denies() {
        let mut state = state();
        state.proxy.image = None;
        let review = admit(&state, Some(JSON_CONTENT_TYPE), &review_body("must", "1"))
            .await
            .unwrap();
        let response = response(review);
        assert!(!response.allowed);
        assert_eq!(
            response.result.map(|status| status.message),
            Some("proxy image not set".to_string())
        );
    }

    #[tokio::test]
    async fn unknown_label_is_rejected() {
        let result = admit(&state(), Some(JSON_CONTENT_TYPE), &review_body("yes", "1")).await;
        assert!(matches!(result, Err(AdmissionError::InvalidTransferLabel(_))));
    }

    #[tokio::test]
    async fn cooperative_without_snapshot_is_unavailable() {
        let result = admit(
            &state(),
            Some(JSON_CONTENT_TYPE),
            &review_body("cooperative", "1"),
        )
        .await;
        assert!(matches!(result, Err(AdmissionError::SnapshotUnavailable(_))));
    }

    #[tokio::test]
    async fn missing_request_is_rejected() {
        let body = br#"{"apiVersion":"admission.k8s.io/v1","kind":"AdmissionReview"}"#;
        let result = admit(&state(), Some(JSON_CONTENT_TYPE), body).await;
        assert!(matches!(result, Err(AdmissionError::MissingRequest)));
    }

    #[tokio::test]
    async fn garbage_body_is_rejected() {
        let result = admit(&state(), Some(JSON_CONTENT_TYPE), b"not json").await;
        assert!(matches!(result, Err(AdmissionError::InvalidReview(_))));
    }
}
