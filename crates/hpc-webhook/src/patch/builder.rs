use std::collections::BTreeMap;

use json_patch::AddOperation;
use json_patch::Patch;
use json_patch::PatchOperation;
use json_patch::RemoveOperation;
use json_patch::ReplaceOperation;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::EnvVarSource;
use k8s_openapi::api::core::v1::ObjectFieldSelector;
use k8s_openapi::api::core::v1::ResourceFieldSelector;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde_json::json;
use serde_json::Value;

use super::PatchError;
use super::ProxySettings;
use crate::job::JobView;
use crate::placement::PlacementDecision;

const POD_SPEC_PATH: &str = "/spec/template/spec";
const CONTAINER_PATH: &str = "/spec/template/spec/containers/0";
const TEMPLATE_METADATA_PATH: &str = "/spec/template/metadata";

const APP_LABEL: &str = "app";

const PROXY_REQUESTS: [(&str, &str); 2] = [("cpu", "100m"), ("memory", "128Mi")];
const PROXY_LIMITS: [(&str, &str); 2] = [("cpu", "1"), ("memory", "256Mi")];

/// Env var name, section and resource of the original reservations.
const RESOURCE_ENV: [(&str, &str, &str); 4] = [
    ("CPUR", "requests", "cpu"),
    ("CPUL", "limits", "cpu"),
    ("MEMR", "requests", "memory"),
    ("MEML", "limits", "memory"),
];

/// Escape one JSON Pointer reference token (RFC 6901).
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

/// Ordered patch operations for a single admission request.
///
/// Tracks whether the container env array and the pod template label map
/// exist yet, so the first write creates them and later writes append.
#[derive(Debug)]
pub struct PatchBuilder {
    operations: Vec<PatchOperation>,
    env_empty: bool,
    labels_empty: bool,
    template_metadata_present: bool,
}

impl PatchBuilder {
    pub fn new(view: &JobView) -> Self {
        Self {
            operations: Vec::new(),
            env_empty: view.env.is_empty(),
            labels_empty: view.template_labels.is_empty(),
            template_metadata_present: view.has_template_metadata,
        }
    }

    pub fn add(&mut self, path: impl Into<String>, value: Value) {
        self.operations.push(PatchOperation::Add(AddOperation {
            path: path.into(),
            value,
        }));
    }

    pub fn replace(&mut self, path: impl Into<String>, value: Value) {
        self.operations.push(PatchOperation::Replace(ReplaceOperation {
            path: path.into(),
            value,
        }));
    }

    pub fn remove(&mut self, path: impl Into<String>) {
        self.operations
            .push(PatchOperation::Remove(RemoveOperation { path: path.into() }));
    }

    /// `replace` when the target exists, `add` otherwise.
    pub fn set(&mut self, path: impl Into<String>, present: bool, value: Value) {
        if present {
            self.replace(path, value);
        } else {
            self.add(path, value);
        }
    }

    /// Append a variable to the container env.
    ///
    /// # Errors
    ///
    /// - [`PatchError::Serialization`] if the variable cannot be encoded
    pub fn push_env(&mut self, var: EnvVar) -> Result<(), PatchError> {
        if self.env_empty {
            let value = serde_json::to_value(vec![var])?;
            self.add(format!("{CONTAINER_PATH}/env"), value);
            self.env_empty = false;
        } else {
            let value = serde_json::to_value(var)?;
            self.add(format!("{CONTAINER_PATH}/env/-"), value);
        }
        Ok(())
    }

    /// Add a label to the pod template, creating the metadata and label map
    /// when missing.
    pub fn push_label(&mut self, key: &str, value: &str) {
        if !self.labels_empty {
            self.add(
                format!("{TEMPLATE_METADATA_PATH}/labels/{}", escape_token(key)),
                Value::from(value),
            );
            return;
        }

        let labels = Value::Object([(key.to_string(), Value::from(value))].into_iter().collect());
        if self.template_metadata_present {
            self.add(format!("{TEMPLATE_METADATA_PATH}/labels"), labels);
        } else {
            self.add(TEMPLATE_METADATA_PATH, json!({ "labels": labels }));
            self.template_metadata_present = true;
        }
        self.labels_empty = false;
    }

    pub fn finish(self) -> Patch {
        Patch(self.operations)
    }

    fn clamp_resources(&mut self, view: &JobView) {
        let resources = format!("{CONTAINER_PATH}/resources");
        if !view.has_resources {
            self.add(
                resources,
                json!({
                    "requests": quantity_map(&PROXY_REQUESTS),
                    "limits": quantity_map(&PROXY_LIMITS),
                }),
            );
            return;
        }
        self.clamp_section(&format!("{resources}/requests"), view.requests.as_ref(), &PROXY_REQUESTS);
        self.clamp_section(&format!("{resources}/limits"), view.limits.as_ref(), &PROXY_LIMITS);
    }

    fn clamp_section(
        &mut self,
        path: &str,
        existing: Option<&BTreeMap<String, Quantity>>,
        clamped: &[(&str, &str)],
    ) {
        let Some(existing) = existing else {
            self.add(path, quantity_map(clamped));
            return;
        };
        for (name, quantity) in clamped {
            self.set(
                format!("{path}/{}", escape_token(name)),
                existing.contains_key(*name),
                Value::from(*quantity),
            );
        }
    }

    fn remove_gpu(&mut self, view: &JobView, gpu_resource: &str) {
        let escaped = escape_token(gpu_resource);
        for (section, entries) in [("requests", &view.requests), ("limits", &view.limits)] {
            if entries
                .as_ref()
                .is_some_and(|entries| entries.contains_key(gpu_resource))
            {
                self.remove(format!("{CONTAINER_PATH}/resources/{section}/{escaped}"));
            }
        }
    }
}

/// Build the patch turning the job's container into the transfer proxy.
///
/// An [`PlacementDecision::Offload`] also clamps the container's own
/// resources and drops its GPU entries; the original amounts are passed on as
/// literal env values. Any other decision keeps the container's resources and
/// passes them on as resource field references.
///
/// # Errors
///
/// - [`PatchError::ProxyImageNotSet`] if no proxy image is configured
/// - [`PatchError::Serialization`] if an env value cannot be encoded
pub fn build_patch(
    view: &JobView,
    decision: &PlacementDecision,
    proxy: &ProxySettings,
    gpu_resource: &str,
) -> Result<Patch, PatchError> {
    let image = proxy.image_reference()?;
    let clamp = *decision == PlacementDecision::Offload;
    let mut builder = PatchBuilder::new(view);

    builder.set(
        format!("{CONTAINER_PATH}/image"),
        !view.image.is_empty(),
        Value::from(image),
    );
    builder.set(
        format!("{CONTAINER_PATH}/command"),
        view.has_command,
        Value::from(proxy.command.clone()),
    );
    builder.set(
        format!("{POD_SPEC_PATH}/automountServiceAccountToken"),
        view.has_automount_token,
        Value::Bool(true),
    );

    if clamp {
        builder.clamp_resources(view);
        if view.footprint.gpu_count > 0 {
            builder.remove_gpu(view, gpu_resource);
        }
    }

    for (i, token) in view.command.iter().enumerate() {
        builder.push_env(literal(format!("CMD_{i}"), token))?;
    }
    for (i, arg) in view.args.iter().enumerate() {
        builder.push_env(literal(format!("ARG_{i}"), arg))?;
    }
    for var in &view.env {
        builder.push_env(EnvVar {
            name: format!("ENV_{}", var.name),
            ..var.clone()
        })?;
    }
    for (i, mount) in view.pvc_mounts.iter().enumerate() {
        let name = format!("PVC_{i:02}_{}", mount.claim_name.replace('-', "_"));
        builder.push_env(literal(name, &mount.mount_path))?;
    }

    builder.push_env(literal("CONTAINER", &view.image))?;
    builder.push_env(field_ref("NAMESPACE", "metadata.namespace"))?;
    builder.push_env(field_ref("POD_NAME", "metadata.name"))?;

    for (name, section, resource) in RESOURCE_ENV {
        if !clamp {
            builder.push_env(resource_ref(name, &format!("{section}.{resource}")))?;
            continue;
        }
        let entries = match section {
            "requests" => view.requests.as_ref(),
            _ => view.limits.as_ref(),
        };
        if let Some(quantity) = entries.and_then(|entries| entries.get(resource)) {
            builder.push_env(literal(name, &quantity.0))?;
        }
    }
    if clamp && view.footprint.gpu_count > 0 {
        builder.push_env(literal("GPUR", &view.footprint.gpu_count.to_string()))?;
    }

    builder.push_label(APP_LABEL, &view.name);

    Ok(builder.finish())
}

fn quantity_map(entries: &[(&str, &str)]) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(name, quantity)| (name.to_string(), Value::from(*quantity)))
            .collect(),
    )
}

fn literal(name: impl Into<String>, value: &str) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value.to_string()),
        ..Default::default()
    }
}

fn field_ref(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn resource_ref(name: &str, resource: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            resource_field_ref: Some(ResourceFieldSelector {
                resource: resource.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
