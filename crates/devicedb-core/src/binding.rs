//! Binding (schema) document loading
//!
//! Bindings are YAML documents describing the properties of a device type. A
//! document may pull in other bindings with an `!include <file name>` tag; the tag is
//! replaced by the fully loaded content of the named file. Every loaded binding gets
//! an implicit `status` property.

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::files::{FileIndex, WalkError, YAML_EXT};

/// Tag marking an include of another binding document
pub const INCLUDE_TAG: &str = "include";

#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Binding {0} is not registered")]
    NotRegistered(String),
    #[error("Failed to read binding {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse binding {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("Include cycle through binding {0}")]
    IncludeCycle(String),
    #[error("Malformed binding {name}: {reason}")]
    Malformed { name: String, reason: String },
}

/// A fully resolved binding document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Binding {
    document: Value,
}

impl Binding {
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// The `properties` mapping
    pub fn properties(&self) -> Option<&Mapping> {
        self.document.get("properties")?.as_mapping()
    }

    /// Descriptor of a single property
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.document.get("properties")?.get(name)
    }
}

/// Descriptor injected as `properties.status` into every binding
pub fn status_property() -> Value {
    let mut descriptor = Mapping::new();
    descriptor.insert("type".into(), "string".into());
    descriptor.insert("category".into(), "required".into());
    descriptor.insert("description".into(), "Device status".into());
    Value::Mapping(descriptor)
}

/// Name a binding is stored under (`nordic,nrf-uart.yaml` -> `nordic,nrf-uart`)
pub fn binding_name(file_name: &str) -> &str {
    file_name.strip_suffix(".yaml").unwrap_or(file_name)
}

/// Loads binding documents registered in a filename index
#[derive(Debug, Clone, Default)]
pub struct BindingLoader {
    index: FileIndex,
}

impl BindingLoader {
    /// Create a loader over an existing index
    pub fn new(index: FileIndex) -> Self {
        Self { index }
    }

    /// Register every binding document under `root`
    pub fn discover(root: &Path) -> Result<Self, WalkError> {
        let mut index = FileIndex::new();
        index.add_dir(root, YAML_EXT)?;
        Ok(Self::new(index))
    }

    /// Registered file names, sorted
    pub fn file_names(&self) -> Vec<&str> {
        self.index.names()
    }

    pub fn path(&self, file_name: &str) -> Option<&Path> {
        self.index.get(file_name)
    }

    /// Load a registered binding, resolve its includes and add the `status` property
    pub fn load(&self, file_name: &str) -> Result<Binding, BindingError> {
        let mut chain = Vec::new();
        let mut document = self.load_document(file_name, &mut chain)?;
        inject_status(&mut document, file_name)?;
        Ok(Binding { document })
    }

    fn load_document(&self, file_name: &str, chain: &mut Vec<String>) -> Result<Value, BindingError> {
        if chain.iter().any(|name| name == file_name) {
            return Err(BindingError::IncludeCycle(file_name.to_string()));
        }

        let path = self
            .index
            .get(file_name)
            .ok_or_else(|| BindingError::NotRegistered(file_name.to_string()))?;
        let content = std::fs::read_to_string(path).map_err(|source| BindingError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut document = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(&content).map_err(|source| BindingError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        };

        chain.push(file_name.to_string());
        self.resolve_includes(&mut document, chain)?;
        chain.pop();

        Ok(document)
    }

    fn resolve_includes(&self, value: &mut Value, chain: &mut Vec<String>) -> Result<(), BindingError> {
        if let Some(targets) = include_targets(value, chain)? {
            debug!(targets = ?targets, "Resolving binding include");
            *value = match targets {
                IncludeTargets::One(name) => self.load_document(&name, chain)?,
                IncludeTargets::Many(names) => Value::Sequence(
                    names
                        .iter()
                        .map(|name| self.load_document(name, chain))
                        .collect::<Result<_, _>>()?,
                ),
            };
            return Ok(());
        }

        match value {
            Value::Tagged(tagged) => self.resolve_includes(&mut tagged.value, chain)?,
            Value::Sequence(items) => {
                for item in items {
                    self.resolve_includes(item, chain)?;
                }
            }
            Value::Mapping(mapping) => {
                for (_, item) in mapping.iter_mut() {
                    self.resolve_includes(item, chain)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug)]
enum IncludeTargets {
    One(String),
    Many(Vec<String>),
}

/// File name(s) named by an `!include` tag, if `value` is one
fn include_targets(value: &Value, chain: &[String]) -> Result<Option<IncludeTargets>, BindingError> {
    let Value::Tagged(tagged) = value else {
        return Ok(None);
    };
    if tagged.tag != INCLUDE_TAG {
        return Ok(None);
    }

    let malformed = || BindingError::Malformed {
        name: chain.last().cloned().unwrap_or_default(),
        reason: "!include expects a file name or a list of file names".to_string(),
    };

    match &tagged.value {
        Value::String(name) => Ok(Some(IncludeTargets::One(name.clone()))),
        Value::Sequence(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(malformed))
            .collect::<Result<Vec<_>, _>>()
            .map(|names| Some(IncludeTargets::Many(names))),
        _ => Err(malformed()),
    }
}

fn inject_status(document: &mut Value, file_name: &str) -> Result<(), BindingError> {
    let malformed = |reason: &str| BindingError::Malformed {
        name: file_name.to_string(),
        reason: reason.to_string(),
    };

    if document.is_null() {
        *document = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(root) = document else {
        return Err(malformed("document is not a mapping"));
    };

    let properties = root
        .entry("properties".into())
        .or_insert(Value::Mapping(Mapping::new()));
    if properties.is_null() {
        *properties = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(properties) = properties else {
        return Err(malformed("properties is not a mapping"));
    };

    properties.insert("status".into(), status_property());
    Ok(())
}
