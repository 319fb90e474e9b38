use std::collections::HashSet;
use std::fmt;
use std::path;
use std::vec;

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::config;
use crate::model::tree;

/// How an adapter hands over the initial tree: nested nodes, each leaf's checked state, and the core's
/// configuration. Labels must be unique since they're how nodes are addressed from outside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Description {
    #[serde(default)]
    pub config: config::Config,

    pub root: NodeDescription,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDescription {
    pub label: String,

    /// On a branch, checks everything beneath it.
    #[serde(default)]
    pub checked: bool,

    #[serde(default)]
    pub children: vec::Vec<NodeDescription>,
}

#[derive(Debug)]
pub enum LoadError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    EmptyLabel,
    DuplicateLabel(String),
}

impl Description {
    pub fn from_toml(text: &str) -> Result<Description, LoadError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<path::Path>>(path: P) -> Result<Description, LoadError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    pub fn build(&self) -> Result<tree::Tree, LoadError> {
        self.root.validate(&mut HashSet::new())?;
        Ok(self.root.to_builder().build())
    }
}

impl NodeDescription {
    fn validate<'a>(&'a self, seen: &mut HashSet<&'a str>) -> Result<(), LoadError> {
        if self.label.is_empty() {
            return Err(LoadError::EmptyLabel);
        }

        if !seen.insert(&self.label) {
            return Err(LoadError::DuplicateLabel(self.label.clone()));
        }

        for child in &self.children {
            child.validate(seen)?;
        }

        Ok(())
    }

    fn to_builder(&self) -> tree::Builder {
        self.children.iter().fold(
            tree::Tree::builder().label(self.label.as_str()).checked(self.checked),
            |builder, child| builder.with_child(child.to_builder()))
    }
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> LoadError {
        LoadError::Io(e)
    }
}

impl From<toml::de::Error> for LoadError {
    fn from(e: toml::de::Error) -> LoadError {
        LoadError::Parse(e)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io(e) => e.fmt(f),
            LoadError::Parse(e) => write!(f, "Failed to parse tree description: {}", e),
            LoadError::EmptyLabel => write!(f, "Every node needs a label"),
            LoadError::DuplicateLabel(label) => write!(f, "Label \"{}\" is used by more than one node", label),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io(e) => Some(e),
            LoadError::Parse(e) => Some(e),
            LoadError::EmptyLabel | LoadError::DuplicateLabel(_) => None,
        }
    }
}
