//! Source tree discovery and filename indexes
//!
//! Files are classified purely by extension. Walks are sorted by file name so the
//! same tree always produces the same load order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Board description files
pub const BOARD_EXT: &str = "dts";
/// Device description (include) files
pub const DEVICE_EXT: &str = "dtsi";
/// Header symbol files
pub const HEADER_EXT: &str = "h";
/// Binding and sample documents
pub const YAML_EXT: &str = "yaml";

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("Directory not found: {0}")]
    MissingRoot(PathBuf),
}

/// Recursively collect every file under `root` with the given extension.
///
/// Unreadable entries below the root are logged and skipped.
pub fn collect_files(root: &Path, ext: &str) -> Result<Vec<PathBuf>, WalkError> {
    if !root.is_dir() {
        return Err(WalkError::MissingRoot(root.to_path_buf()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if entry.file_type().is_file() && has_extension(entry.path(), ext) {
            files.push(entry.into_path());
        }
    }

    debug!(root = %root.display(), ext, count = files.len(), "Collected files");
    Ok(files)
}

/// Check whether `path` has exactly the extension `ext`
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

/// Index of files keyed by their file name (e.g. `gpio.h`)
///
/// Used to resolve include directives and `!include` tags, which name files
/// without a usable directory.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    files: HashMap<String, PathBuf>,
}

impl FileIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every file under `root` with extension `ext`, returning how many were added.
    ///
    /// A later file with the same name replaces the earlier one.
    pub fn add_dir(&mut self, root: &Path, ext: &str) -> Result<usize, WalkError> {
        let files = collect_files(root, ext)?;
        let count = files.len();
        for path in files {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                let name = name.to_string();
                self.insert(name, path);
            }
        }
        Ok(count)
    }

    /// Register a single file under `name`
    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<PathBuf>) {
        let name = name.into();
        let path = path.into();
        if let Some(previous) = self.files.insert(name.clone(), path) {
            debug!(name = %name, previous = %previous.display(), "Replaced indexed file");
        }
    }

    /// Look up a file by name
    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(|p| p.as_path())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    /// Indexed file names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.files.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn clear(&mut self) {
        self.files.clear();
    }
}

/// Extract the target of an `#include <...>` or `#include "..."` line
pub(crate) fn include_target(line: &str) -> Option<&str> {
    let rest = line.trim_start().strip_prefix("#include")?.trim();
    let (open, close) = match rest.chars().next()? {
        '<' => ('<', '>'),
        '"' => ('"', '"'),
        _ => return None,
    };
    let inner = rest.strip_prefix(open)?;
    let end = inner.rfind(close)?;
    Some(&inner[..end])
}

/// Last path component of an include target (`dt-bindings/gpio/gpio.h` -> `gpio.h`)
pub(crate) fn base_name(target: &str) -> &str {
    target.rsplit('/').next().unwrap_or(target)
}

/// Split `name` into stem and extension at the last dot
pub(crate) fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_include_target() {
        assert_eq!(include_target("#include <arm/nordic/nrf52840.dtsi>"), Some("arm/nordic/nrf52840.dtsi"));
        assert_eq!(include_target("#include \"board.dtsi\""), Some("board.dtsi"));
        assert_eq!(include_target("  #include   <gpio.h>  "), Some("gpio.h"));
        assert_eq!(include_target("#include gpio.h"), None);
        assert_eq!(include_target("#define X 1"), None);
    }

    #[test]
    fn test_name_helpers() {
        assert_eq!(base_name("dt-bindings/gpio/gpio.h"), "gpio.h");
        assert_eq!(base_name("gpio.h"), "gpio.h");
        assert_eq!(split_extension("nrf52840.dtsi"), ("nrf52840", Some("dtsi")));
        assert_eq!(split_extension("skeleton"), ("skeleton", None));
        assert_eq!(split_extension(".hidden"), (".hidden", None));
    }

    #[test]
    fn test_collect_files_filters_by_extension() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("arm/nordic")).unwrap();
        fs::write(root.join("arm/nordic/nrf52.dtsi"), "").unwrap();
        fs::write(root.join("arm/nordic/board.dts"), "").unwrap();
        fs::write(root.join("skeleton.dtsi"), "").unwrap();

        let files = collect_files(root, DEVICE_EXT).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["nrf52.dtsi", "skeleton.dtsi"]);
    }

    #[test]
    fn test_collect_files_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(
            collect_files(&missing, BOARD_EXT),
            Err(WalkError::MissingRoot(p)) if p == missing
        ));
    }

    #[test]
    fn test_file_index() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("dt-bindings/gpio")).unwrap();
        fs::write(root.join("dt-bindings/gpio/gpio.h"), "").unwrap();
        fs::write(root.join("readme.txt"), "").unwrap();

        let mut index = FileIndex::new();
        assert_eq!(index.add_dir(root, HEADER_EXT).unwrap(), 1);
        assert!(index.contains("gpio.h"));
        assert_eq!(index.get("gpio.h").unwrap(), root.join("dt-bindings/gpio/gpio.h"));
        assert_eq!(index.names(), vec!["gpio.h"]);
        assert!(index.get("readme.txt").is_none());
    }
}
