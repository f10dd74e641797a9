use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use json_patch::Patch;
use serde::Deserialize;
use serde::Serialize;

pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
pub const JSON_PATCH_TYPE: &str = "JSONPatch";

/// Status code carried by a denied admission response.
pub const DENIED_CODE: u16 = 403;

/// `admission.k8s.io/v1` AdmissionReview envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReview {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<AdmissionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<AdmissionResponse>,
}

/// The parts of an admission request the webhook reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    #[serde(default)]
    pub resource: GroupVersionResource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupVersionResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub resource: String,
}

impl GroupVersionResource {
    pub fn is_batch_v1_jobs(&self) -> bool {
        self.group == "batch" && self.version == "v1" && self.resource == "jobs"
    }
}

impl std::fmt::Display for GroupVersionResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.resource)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    /// Base64 of the serialized JSON Patch array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ResponseStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStatus {
    pub code: u16,
    pub status: String,
    pub message: String,
}

impl AdmissionResponse {
    /// Admit the object unchanged.
    pub fn allow(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            ..Default::default()
        }
    }

    /// Refuse the object with `reason`.
    pub fn deny(uid: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            uid: uid.into(),
            allowed: false,
            result: Some(ResponseStatus {
                code: DENIED_CODE,
                status: reason.clone(),
                message: reason,
            }),
            ..Default::default()
        }
    }

    /// Attach `patch` to an allowing response.
    ///
    /// # Errors
    ///
    /// - [`serde_json::Error`] if the patch cannot be serialized
    pub fn with_patch(mut self, patch: &Patch) -> Result<Self, serde_json::Error> {
        let encoded = serde_json::to_vec(patch)?;
        self.patch = Some(STANDARD.encode(encoded));
        self.patch_type = Some(JSON_PATCH_TYPE.to_string());
        Ok(self)
    }

    pub fn into_review(self) -> AdmissionReview {
        AdmissionReview {
            api_version: ADMISSION_API_VERSION.to_string(),
            kind: ADMISSION_REVIEW_KIND.to_string(),
            request: None,
            response: Some(self),
        }
    }
}
