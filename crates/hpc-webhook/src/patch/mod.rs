//! JSON Patch construction for proxied Jobs.
//!
//! The container is swapped for the transfer proxy and everything the proxy
//! needs to reproduce the original workload downstream travels as
//! environment variables.

pub mod builder;

use thiserror::Error;

pub use builder::build_patch;
pub use builder::escape_token;
pub use builder::PatchBuilder;

/// Entrypoint the proxy container is started with unless configured otherwise.
pub const DEFAULT_PROXY_COMMAND: [&str; 3] = ["/bin/bash", "-c", "/srv/start.sh"];

const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("proxy image not set")]
    ProxyImageNotSet,
    #[error("failed to serialize patch value: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Image and entrypoint of the transfer proxy container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub image: Option<String>,
    pub tag: Option<String>,
    pub command: Vec<String>,
}

impl ProxySettings {
    /// `"{image}:{tag}"`, with an empty or missing tag read as `latest`.
    ///
    /// # Errors
    ///
    /// - [`PatchError::ProxyImageNotSet`] if no image is configured
    pub fn image_reference(&self) -> Result<String, PatchError> {
        let image = self
            .image
            .as_deref()
            .filter(|image| !image.is_empty())
            .ok_or(PatchError::ProxyImageNotSet)?;
        let tag = self
            .tag
            .as_deref()
            .filter(|tag| !tag.is_empty())
            .unwrap_or(DEFAULT_TAG);
        Ok(format!("{image}:{tag}"))
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            image: None,
            tag: None,
            command: DEFAULT_PROXY_COMMAND.iter().map(ToString::to_string).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn image_reference_defaults_tag_to_latest() {
        let proxy = ProxySettings {
            image: Some("registry.local/hpc-proxy".to_string()),
            tag: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(proxy.image_reference().unwrap(), "registry.local/hpc-proxy:latest");
    }

    #[test]
    fn image_reference_uses_tag() {
        let proxy = ProxySettings {
            image: Some("hpc-proxy".to_string()),
            tag: Some("v2".to_string()),
            ..Default::default()
        };
        assert_eq!(proxy.image_reference().unwrap(), "hpc-proxy:v2");
    }

    #[test]
    fn image_reference_requires_image() {
        for image in [None, Some(String::new())] {
            let proxy = ProxySettings {
                image,
                tag: Some("v2".to_string()),
                ..Default::default()
            };
            assert!(matches!(
                proxy.image_reference(),
                Err(PatchError::ProxyImageNotSet)
            ));
        }
    }
}
