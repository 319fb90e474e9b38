use std::fmt;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::model::propagate;
use crate::model::tree;

/// Options recognized by the propagation core. Anything about how controls are found or drawn belongs to the
/// adapter, not here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Label of the node above which aggregation stops.
    #[serde(default)]
    pub container_boundary: Option<String>,
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(toml::de::Error),
    UnknownBoundary(String),
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Config, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Parse)
    }

    /// Scopes the tree to the container boundary (looked up by label) and builds a propagator for the result. The
    /// returned tree holds only the boundary's subtree, so nothing stale is left above it.
    pub fn resolve(&self, tree: &tree::Tree) -> Result<(tree::Tree, propagate::Propagator), ConfigError> {
        let label = match &self.container_boundary {
            None => return Ok((tree.clone(), propagate::Propagator::new())),
            Some(label) => label,
        };

        let scoped = match tree.find(label).map(|id| tree.subtree(id)) {
            Some(Ok(scoped)) => scoped,
            Some(Err(_)) | None => return Err(ConfigError::UnknownBoundary(label.clone())),
        };

        let propagator = propagate::Propagator::with_container_boundary(Some(scoped.root()));
        Ok((scoped, propagator))
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::UnknownBoundary(label) => write!(f, "Container boundary \"{}\" is not in the tree", label),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            ConfigError::UnknownBoundary(_) => None,
        }
    }
}
