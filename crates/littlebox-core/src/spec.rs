//! Container specification types.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Where a new container's root filesystem comes from.
///
/// An alias is shorthand for `{"type": "image", "alias": <alias>}` against the
/// daemon's local image store. A structured source is sent to the daemon
/// exactly as given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageSource {
    /// Local image alias, e.g. `"19.10"`.
    Alias(String),
    /// Full LXD source object (type, server, protocol, mode...).
    Source(serde_json::Map<String, serde_json::Value>),
}

impl ImageSource {
    /// Render the `source` field of a create request.
    pub fn to_source(&self) -> serde_json::Value {
        match self {
            ImageSource::Alias(alias) => serde_json::json!({
                "type": "image",
                "alias": alias,
            }),
            ImageSource::Source(map) => serde_json::Value::Object(map.clone()),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            ImageSource::Alias(alias) if alias.is_empty() => Err(CoreError::InvalidArgument(
                "image alias must not be empty".into(),
            )),
            ImageSource::Source(map) if map.is_empty() => Err(CoreError::InvalidArgument(
                "image source must not be empty".into(),
            )),
            _ => Ok(()),
        }
    }
}

impl From<&str> for ImageSource {
    fn from(alias: &str) -> Self {
        ImageSource::Alias(alias.to_string())
    }
}

impl From<String> for ImageSource {
    fn from(alias: String) -> Self {
        ImageSource::Alias(alias)
    }
}

impl From<serde_json::Map<String, serde_json::Value>> for ImageSource {
    fn from(map: serde_json::Map<String, serde_json::Value>) -> Self {
        ImageSource::Source(map)
    }
}

/// How a container should look if it has to be created.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Image to create from.
    pub image: Option<ImageSource>,
    /// Runtime config keys (`limits.cpu`, `security.nesting`, ...).
    pub config: Option<HashMap<String, String>>,
    /// Profile to apply (default: `default`).
    pub profile: Option<String>,
    /// Ephemeral containers are deleted by the daemon when stopped (default: false).
    pub ephemeral: bool,
    /// Create and launch the container when it does not exist (default: true).
    pub create_if_not_exists: bool,
}

impl Default for ContainerSpec {
    fn default() -> Self {
        Self {
            image: None,
            config: None,
            profile: None,
            ephemeral: false,
            create_if_not_exists: true,
        }
    }
}

impl ContainerSpec {
    /// Create a new spec builder.
    pub fn builder() -> ContainerSpecBuilder {
        ContainerSpecBuilder::default()
    }

    /// Validate the spec.
    pub fn validate(&self) -> Result<()> {
        if let Some(image) = &self.image {
            image.validate()?;
        }
        if matches!(&self.profile, Some(p) if p.is_empty()) {
            return Err(CoreError::InvalidArgument(
                "profile must not be empty".into(),
            ));
        }
        if let Some(config) = &self.config {
            if config.keys().any(|k| k.is_empty()) {
                return Err(CoreError::InvalidArgument(
                    "config keys must not be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Builder for ContainerSpec.
#[derive(Debug, Default)]
pub struct ContainerSpecBuilder {
    spec: ContainerSpec,
}

impl ContainerSpecBuilder {
    /// Set the image source.
    pub fn image(mut self, image: impl Into<ImageSource>) -> Self {
        self.spec.image = Some(image.into());
        self
    }

    /// Replace the runtime config map.
    pub fn config(mut self, config: HashMap<String, String>) -> Self {
        self.spec.config = Some(config);
        self
    }

    /// Add a single runtime config key.
    pub fn config_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec
            .config
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the profile name.
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.spec.profile = Some(profile.into());
        self
    }

    /// Mark the container ephemeral.
    pub fn ephemeral(mut self, ephemeral: bool) -> Self {
        self.spec.ephemeral = ephemeral;
        self
    }

    /// Allow or forbid implicit creation.
    pub fn create_if_not_exists(mut self, create: bool) -> Self {
        self.spec.create_if_not_exists = create;
        self
    }

    /// Build the spec, validating all fields.
    pub fn build(self) -> Result<ContainerSpec> {
        self.spec.validate()?;
        Ok(self.spec)
    }
}
