use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use clap::Parser;

use super::ConfigError;
use crate::api::TlsFiles;
use crate::k8s::quantity::parse_milli_value;
use crate::k8s::quantity::parse_value;
use crate::k8s::ResourceFootprint;
use crate::k8s::DEFAULT_GPU_RESOURCE;
use crate::patch::ProxySettings;
use crate::patch::DEFAULT_PROXY_COMMAND;
use crate::placement::CapacityThresholds;

/// Cluster access shared by every subcommand.
#[derive(Args, Clone, Debug)]
pub struct ClusterArgs {
    #[arg(
        long,
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file (defaults to cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "GPU_RESOURCE_NAME",
        default_value = DEFAULT_GPU_RESOURCE,
        help = "Extended resource name counted as GPUs"
    )]
    pub gpu_resource_name: String,
}

/// Capacity ceilings of the local cluster and of the external system.
#[derive(Args, Clone, Debug)]
pub struct CapacityArgs {
    #[arg(long, env = "K8S_CPU", value_parser = parse_cpu, help = "CPU ceiling of the local cluster, e.g. 64 or 7500m")]
    pub k8s_cpu: u64,

    #[arg(long, env = "K8S_MEM", value_parser = parse_memory, help = "Memory ceiling of the local cluster, e.g. 256Gi")]
    pub k8s_mem: u64,

    #[arg(long, env = "K8S_GPU", value_parser = parse_gpu, default_value = "0", help = "GPU ceiling of the local cluster")]
    pub k8s_gpu: u64,

    #[arg(long, env = "EXT_CPU", value_parser = parse_cpu, help = "CPU ceiling of the external system")]
    pub ext_cpu: u64,

    #[arg(long, env = "EXT_MEM", value_parser = parse_memory, help = "Memory ceiling of the external system")]
    pub ext_mem: u64,

    #[arg(long, env = "EXT_GPU", value_parser = parse_gpu, default_value = "0", help = "GPU ceiling of the external system")]
    pub ext_gpu: u64,
}

impl CapacityArgs {
    pub fn thresholds(&self) -> CapacityThresholds {
        CapacityThresholds::new(
            ResourceFootprint::new(self.k8s_cpu, self.k8s_mem, self.k8s_gpu),
            ResourceFootprint::new(self.ext_cpu, self.ext_mem, self.ext_gpu),
        )
    }
}

#[derive(Parser, Clone, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub capacity: CapacityArgs,

    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[arg(long, env = "IMAGE", help = "Image of the transfer proxy container")]
    pub image: Option<String>,

    #[arg(long, env = "TAG", help = "Tag of the proxy image, defaults to latest")]
    pub tag: Option<String>,

    #[arg(
        long,
        env = "PROXY_COMMAND",
        value_delimiter = ',',
        default_values = DEFAULT_PROXY_COMMAND,
        help = "Comma separated entrypoint of the proxy container"
    )]
    pub proxy_command: Vec<String>,

    #[arg(
        long,
        env = "LISTEN_ADDR",
        default_value = "0.0.0.0:8443",
        help = "Address the webhook listens on"
    )]
    pub listen_addr: String,

    #[arg(
        long,
        env = "TLS_CERT",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/etc/tls/ca.crt",
        help = "PEM certificate chain served by the webhook"
    )]
    pub tls_cert: PathBuf,

    #[arg(
        long,
        env = "TLS_KEY",
        value_hint = clap::ValueHint::FilePath,
        default_value = "/etc/tls/tls.key",
        help = "PEM private key of the certificate"
    )]
    pub tls_key: PathBuf,

    #[arg(long, env = "INSECURE", help = "Serve plain HTTP, for local testing only")]
    pub insecure: bool,

    #[arg(
        long,
        env = "POLL_INTERVAL_MS",
        default_value_t = 0,
        help = "Pause between two cluster scans in milliseconds"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long,
        env = "SNAPSHOT_TIMEOUT_MS",
        default_value_t = 10_000,
        help = "How long a cooperative request waits for the first cluster scan"
    )]
    pub snapshot_timeout_ms: u64,
}

impl ServeArgs {
    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            image: self.image.clone(),
            tag: self.tag.clone(),
            command: self.proxy_command.clone(),
        }
    }

    /// `None` when serving without TLS.
    pub fn tls_files(&self) -> Option<TlsFiles> {
        (!self.insecure).then(|| TlsFiles {
            cert: self.tls_cert.clone(),
            key: self.tls_key.clone(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

#[derive(Parser, Clone, Debug)]
pub struct ScanArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,
}

fn parse_cpu(value: &str) -> Result<u64, ConfigError> {
    non_zero(value, parse_milli_value(value))
}

fn parse_memory(value: &str) -> Result<u64, ConfigError> {
    non_zero(value, parse_value(value))
}

fn parse_gpu(value: &str) -> Result<u64, ConfigError> {
    parse_value(value).map_err(|source| ConfigError::InvalidQuantity {
        value: value.to_string(),
        source,
    })
}

fn non_zero(
    value: &str,
    parsed: Result<u64, crate::k8s::QuantityError>,
) -> Result<u64, ConfigError> {
    match parsed {
        Ok(0) => Err(ConfigError::Zero {
            value: value.to_string(),
        }),
        Ok(parsed) => Ok(parsed),
        Err(source) => Err(ConfigError::InvalidQuantity {
            value: value.to_string(),
            source,
        }),
    }
}
