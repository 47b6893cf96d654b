//! Sample descriptor documents (`sample.yaml`)

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Name used by descriptors that are not real samples yet
pub const PLACEHOLDER_NAME: &str = "TBD";

#[derive(Error, Debug)]
pub enum SampleError {
    #[error("Failed to read sample descriptor {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse sample descriptor {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// A sample application
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    #[serde(skip)]
    pub name: String,
    /// Directory holding the descriptor
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SampleFile {
    sample: Option<SampleSection>,
}

#[derive(Debug, Deserialize)]
struct SampleSection {
    name: String,
    description: Option<String>,
}

impl Sample {
    /// Parse a descriptor located in `dir`.
    ///
    /// Returns `Ok(None)` for documents without a `sample` mapping and for
    /// placeholder samples.
    pub fn from_yaml(content: &str, dir: &Path) -> Result<Option<Self>, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        let document: Value = serde_yaml::from_str(content)?;
        // Other YAML documents (test lists, plain scalars) live next to descriptors
        let is_descriptor = document
            .get("sample")
            .map_or(false, Value::is_mapping);
        if !is_descriptor {
            return Ok(None);
        }
        let file: SampleFile = serde_yaml::from_value(document)?;
        Ok(file
            .sample
            .filter(|section| section.name != PLACEHOLDER_NAME)
            .map(|section| Sample {
                name: section.name,
                path: dir.to_path_buf(),
                description: section.description,
            }))
    }

    pub fn from_file(path: &Path) -> Result<Option<Self>, SampleError> {
        let content = std::fs::read_to_string(path).map_err(|source| SampleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_yaml(&content, dir).map_err(|source| SampleError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
