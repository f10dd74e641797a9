use std::collections::BTreeMap;
use std::collections::HashMap;

use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::k8s::QuantityError;
use crate::k8s::ResourceFootprint;
use crate::placement::TRANSFER_LABEL;

/// A volume mount backed by a `PersistentVolumeClaim`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvcMount {
    pub claim_name: String,
    pub mount_path: String,
}

/// Everything the patch builder needs from a single-container Job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobView {
    /// Job name, or `generateName` without its trailing `-`.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub has_command: bool,
    pub args: Vec<String>,
    pub env: Vec<EnvVar>,
    /// In container mount order.
    pub pvc_mounts: Vec<PvcMount>,
    pub has_resources: bool,
    pub requests: Option<BTreeMap<String, Quantity>>,
    pub limits: Option<BTreeMap<String, Quantity>>,
    /// Requests, with limits standing in for absent requests.
    pub footprint: ResourceFootprint,
    pub has_automount_token: bool,
    pub has_template_metadata: bool,
    pub template_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    Eligible(Box<JobView>),
    /// The job is admitted as is; the reason is only logged.
    Passthrough(&'static str),
}

/// Value of the transfer label on the Job itself, if any.
pub fn transfer_label(job: &Job) -> Option<&str> {
    job.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(TRANSFER_LABEL))
        .map(String::as_str)
}

/// Read the single container of `job` into a [`JobView`].
///
/// Jobs with more or fewer than one container, or with exposed ports, are
/// not proxied.
///
/// # Errors
///
/// - [`QuantityError`] if a CPU, memory or GPU quantity cannot be parsed
pub fn extract(job: &Job, gpu_resource: &str) -> Result<Extraction, QuantityError> {
    let template = job.spec.as_ref().map(|spec| &spec.template);
    let pod_spec = template.and_then(|template| template.spec.as_ref());

    let container = match pod_spec.map(|spec| spec.containers.as_slice()) {
        Some([container]) => container,
        None | Some([]) => return Ok(Extraction::Passthrough("spec not changed (no containers)")),
        Some(_) => return Ok(Extraction::Passthrough("spec not changed (multiple containers)")),
    };
    if container.ports.as_ref().is_some_and(|ports| !ports.is_empty()) {
        return Ok(Extraction::Passthrough("spec not changed (exposed ports)"));
    }

    let resources = container.resources.as_ref();
    let requests = resources.and_then(|resources| resources.requests.clone());
    let limits = resources.and_then(|resources| resources.limits.clone());
    let footprint = effective_footprint(requests.as_ref(), limits.as_ref(), gpu_resource)?;

    let template_metadata = template.and_then(|template| template.metadata.as_ref());

    Ok(Extraction::Eligible(Box::new(JobView {
        name: job_name(job),
        image: container.image.clone().unwrap_or_default(),
        command: container.command.clone().unwrap_or_default(),
        has_command: container.command.is_some(),
        args: container.args.clone().unwrap_or_default(),
        env: container.env.clone().unwrap_or_default(),
        pvc_mounts: pod_spec.map(|spec| pvc_mounts(spec, container)).unwrap_or_default(),
        has_resources: resources.is_some(),
        requests,
        limits,
        footprint,
        has_automount_token: pod_spec
            .is_some_and(|spec| spec.automount_service_account_token.is_some()),
        has_template_metadata: template_metadata.is_some(),
        template_labels: template_metadata
            .and_then(|metadata| metadata.labels.clone())
            .unwrap_or_default(),
    })))
}

fn job_name(job: &Job) -> String {
    match (&job.metadata.name, &job.metadata.generate_name) {
        (Some(name), _) if !name.is_empty() => name.clone(),
        (_, Some(prefix)) => prefix.trim_end_matches('-').to_string(),
        _ => String::new(),
    }
}

fn effective_footprint(
    requests: Option<&BTreeMap<String, Quantity>>,
    limits: Option<&BTreeMap<String, Quantity>>,
    gpu_resource: &str,
) -> Result<ResourceFootprint, QuantityError> {
    let mut effective = limits.cloned().unwrap_or_default();
    effective.extend(requests.cloned().unwrap_or_default());
    ResourceFootprint::from_resource_map(&effective, gpu_resource)
}

fn pvc_mounts(spec: &PodSpec, container: &Container) -> Vec<PvcMount> {
    let claims: HashMap<&str, &str> = spec
        .volumes
        .iter()
        .flatten()
        .filter_map(|volume| {
            volume
                .persistent_volume_claim
                .as_ref()
                .map(|pvc| (volume.name.as_str(), pvc.claim_name.as_str()))
        })
        .collect();

    container
        .volume_mounts
        .iter()
        .flatten()
        .filter_map(|mount| {
            claims.get(mount.name.as_str()).map(|claim| PvcMount {
                claim_name: claim.to_string(),
                mount_path: mount.mount_path.clone(),
            })
        })
        .collect()
}
