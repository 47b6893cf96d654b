//! Device database: walks a source tree and aggregates the five collections
//!
//! Every collection is loaded independently. A file that fails to read or parse is
//! logged, recorded in the [`LoadReport`] and skipped; its siblings still load.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::binding::{binding_name, Binding, BindingLoader};
use crate::devicetree::DeviceTree;
use crate::files::{self, FileIndex, BOARD_EXT, DEVICE_EXT, HEADER_EXT, YAML_EXT};
use crate::kconfig::{ConfigMap, DotConfig, MenuNode};
use crate::sample::Sample;

/// Where each collection lives, relative to the source root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutConfig {
    /// Board descriptions (`.dts`)
    #[serde(default = "default_boards_dir")]
    pub boards_dir: PathBuf,
    /// Device descriptions (`.dtsi`)
    #[serde(default = "default_devices_dir")]
    pub devices_dir: PathBuf,
    /// Binding documents (`.yaml`)
    #[serde(default = "default_bindings_dir")]
    pub bindings_dir: PathBuf,
    /// Sample descriptors (`.yaml`)
    #[serde(default = "default_samples_dir")]
    pub samples_dir: PathBuf,
    /// Directories searched for header (`.h`) files
    #[serde(default = "default_header_dirs")]
    pub header_dirs: Vec<PathBuf>,
    /// Configuration model (JSON); the config collection stays empty without it
    #[serde(default)]
    pub config_model: Option<PathBuf>,
    /// `.config` values applied to the model before flattening
    #[serde(default)]
    pub dot_config: Option<PathBuf>,
}

fn default_boards_dir() -> PathBuf {
    PathBuf::from("boards")
}

fn default_devices_dir() -> PathBuf {
    PathBuf::from("dts")
}

fn default_bindings_dir() -> PathBuf {
    PathBuf::from("dts/bindings")
}

fn default_samples_dir() -> PathBuf {
    PathBuf::from("samples")
}

fn default_header_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("dts"), PathBuf::from("include/dt-bindings")]
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            boards_dir: default_boards_dir(),
            devices_dir: default_devices_dir(),
            bindings_dir: default_bindings_dir(),
            samples_dir: default_samples_dir(),
            header_dirs: default_header_dirs(),
            config_model: None,
            dot_config: None,
        }
    }
}

/// A file or directory that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Summary of one [`DeviceDatabase::load`] call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub headers: usize,
    pub boards: usize,
    pub devices: usize,
    pub samples: usize,
    pub bindings: usize,
    /// Top-level entries of the flattened configuration
    pub config: usize,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    /// True when nothing failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn file_failed(&mut self, path: &Path, error: impl fmt::Display) {
        warn!(path = %path.display(), error = %error, "Failed to load file");
        self.failures.push(LoadFailure {
            path: path.to_path_buf(),
            error: error.to_string(),
        });
    }

    fn walk_failed(&mut self, root: &Path, error: impl fmt::Display) {
        error!(root = %root.display(), error = %error, "Directory walk failed");
        self.failures.push(LoadFailure {
            path: root.to_path_buf(),
            error: error.to_string(),
        });
    }
}

/// In-memory database of boards, devices, samples, bindings and configuration
#[derive(Debug, Default, Serialize)]
pub struct DeviceDatabase {
    #[serde(skip)]
    headers: FileIndex,
    boards: BTreeMap<String, DeviceTree>,
    devices: BTreeMap<String, DeviceTree>,
    samples: BTreeMap<String, Sample>,
    bindings: BTreeMap<String, Binding>,
    config: ConfigMap,
}

impl DeviceDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents of the database with everything found under `root`
    pub fn load(&mut self, root: &Path, layout: &LayoutConfig) -> LoadReport {
        info!(root = %root.display(), "Loading device database");
        *self = Self::default();
        let mut report = LoadReport::default();

        self.index_headers(root, layout, &mut report);
        self.load_devices(&root.join(&layout.devices_dir), &mut report);
        self.load_boards(&root.join(&layout.boards_dir), &mut report);
        self.load_bindings(&root.join(&layout.bindings_dir), &mut report);
        self.load_samples(&root.join(&layout.samples_dir), &mut report);
        if let Some(model) = &layout.config_model {
            let values = layout.dot_config.as_ref().map(|p| root.join(p));
            self.load_config(&root.join(model), values.as_deref(), &mut report);
        }

        info!(
            boards = report.boards,
            devices = report.devices,
            samples = report.samples,
            bindings = report.bindings,
            config = report.config,
            failures = report.failures.len(),
            "Device database loaded"
        );
        report
    }

    /// Register every header file under the layout's header directories
    pub fn index_headers(&mut self, root: &Path, layout: &LayoutConfig, report: &mut LoadReport) {
        for dir in &layout.header_dirs {
            let dir = root.join(dir);
            match self.headers.add_dir(&dir, HEADER_EXT) {
                Ok(count) => debug!(root = %dir.display(), count, "Indexed headers"),
                Err(e) => report.walk_failed(&dir, e),
            }
        }
        report.headers = self.headers.len();
    }

    /// Parse every device description (`.dtsi`) under `dir`
    pub fn load_devices(&mut self, dir: &Path, report: &mut LoadReport) {
        self.devices = load_trees(dir, DEVICE_EXT, &self.headers, report);
        report.devices = self.devices.len();
    }

    /// Parse every board description (`.dts`) under `dir`
    pub fn load_boards(&mut self, dir: &Path, report: &mut LoadReport) {
        self.boards = load_trees(dir, BOARD_EXT, &self.headers, report);
        report.boards = self.boards.len();
    }

    /// Load and resolve every binding document under `dir`
    pub fn load_bindings(&mut self, dir: &Path, report: &mut LoadReport) {
        let loader = match BindingLoader::discover(dir) {
            Ok(loader) => loader,
            Err(e) => return report.walk_failed(dir, e),
        };

        for file_name in loader.file_names() {
            match loader.load(file_name) {
                Ok(binding) => insert_unique(&mut self.bindings, binding_name(file_name), binding),
                Err(e) => {
                    let path = loader.path(file_name).unwrap_or(dir);
                    report.file_failed(path, e);
                }
            }
        }
        report.bindings = self.bindings.len();
    }

    /// Read every sample descriptor under `dir`, skipping placeholders
    pub fn load_samples(&mut self, dir: &Path, report: &mut LoadReport) {
        let paths = match files::collect_files(dir, YAML_EXT) {
            Ok(paths) => paths,
            Err(e) => return report.walk_failed(dir, e),
        };

        for path in paths {
            match Sample::from_file(&path) {
                Ok(Some(sample)) => {
                    let name = sample.name.clone();
                    insert_unique(&mut self.samples, &name, sample);
                }
                Ok(None) => debug!(path = %path.display(), "Not a sample descriptor"),
                Err(e) => report.file_failed(&path, e),
            }
        }
        report.samples = self.samples.len();
    }

    /// Load the configuration model, apply `.config` values and flatten it
    pub fn load_config(&mut self, model: &Path, values: Option<&Path>, report: &mut LoadReport) {
        let mut top = match MenuNode::from_file(model) {
            Ok(top) => top,
            Err(e) => return report.file_failed(model, e),
        };

        if let Some(path) = values {
            match DotConfig::from_file(path) {
                Ok(values) => {
                    let applied = top.apply_values(&values);
                    debug!(path = %path.display(), applied, "Applied configuration values");
                }
                Err(e) => report.file_failed(path, e),
            }
        }

        self.config = top.flatten();
        report.config = self.config.len();
    }

    pub fn boards(&self) -> &BTreeMap<String, DeviceTree> {
        &self.boards
    }

    pub fn devices(&self) -> &BTreeMap<String, DeviceTree> {
        &self.devices
    }

    pub fn samples(&self) -> &BTreeMap<String, Sample> {
        &self.samples
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn bindings(&self) -> &BTreeMap<String, Binding> {
        &self.bindings
    }

    /// Header files available to include resolution
    pub fn headers(&self) -> &FileIndex {
        &self.headers
    }
}

/// Parse every file with extension `ext` under `dir`, keyed by file stem
fn load_trees(
    dir: &Path,
    ext: &str,
    headers: &FileIndex,
    report: &mut LoadReport,
) -> BTreeMap<String, DeviceTree> {
    let mut trees = BTreeMap::new();
    let paths = match files::collect_files(dir, ext) {
        Ok(paths) => paths,
        Err(e) => {
            report.walk_failed(dir, e);
            return trees;
        }
    };

    for path in paths {
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            report.file_failed(&path, "file name is not valid UTF-8");
            continue;
        };
        match DeviceTree::from_file(&path, headers) {
            Ok(tree) => insert_unique(&mut trees, name, tree),
            Err(e) => report.file_failed(&path, e),
        }
    }
    trees
}

fn insert_unique<T>(collection: &mut BTreeMap<String, T>, name: &str, value: T) {
    if collection.insert(name.to_string(), value).is_some() {
        warn!(name, "Duplicate entry, replacing earlier one");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, content: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn source_tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write(
            root,
            "include/dt-bindings/gpio/gpio.h",
            "#define GPIO_ACTIVE_HIGH 0\n#define GPIO_ACTIVE_LOW (1 << 0)\n",
        );
        write(root, "dts/arm/armv7-m.dtsi", "/ {\n\tcpus {\n\t};\n};\n");
        write(
            root,
            "dts/arm/nordic/nrf52840.dtsi",
            "#include <arm/armv7-m.dtsi>\n#include <dt-bindings/gpio/gpio.h>\n\n/ {\n\tsoc {\n\t\tuart0: uart@40002000 {\n\t\t\tcompatible = \"nordic,nrf-uart\";\n\t\t\tstatus = \"disabled\";\n\t\t};\n\t};\n};\n",
        );
        write(
            root,
            "boards/arm/nrf52840_pca10056/nrf52840_pca10056.dts",
            "/dts-v1/;\n#include <nordic/nrf52840.dtsi>\n\n/ {\n\tmodel = \"Nordic PCA10056\";\n};\n",
        );
        write(
            root,
            "dts/bindings/serial/nordic,nrf-uart.yaml",
            "title: Nordic UART\nproperties:\n  current-speed:\n    type: int\n    category: required\n    description: baud rate\n",
        );
        write(root, "samples/hello_world/sample.yaml", "sample:\n  name: hello_world\n  description: Hello\n");
        write(root, "samples/wip/sample.yaml", "sample:\n  name: TBD\n");
        temp_dir
    }

    #[test]
    fn test_layout_defaults() {
        let layout = LayoutConfig::default();
        assert_eq!(layout.boards_dir, PathBuf::from("boards"));
        assert_eq!(layout.bindings_dir, PathBuf::from("dts/bindings"));
        assert_eq!(layout.header_dirs.len(), 2);
        assert!(layout.config_model.is_none());
    }

    #[test]
    fn test_load_collections() {
        let temp_dir = source_tree();
        let mut db = DeviceDatabase::new();
        let report = db.load(temp_dir.path(), &LayoutConfig::default());

        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.headers, 1);
        assert_eq!(db.devices().keys().collect::<Vec<_>>(), vec!["armv7-m", "nrf52840"]);
        assert_eq!(db.boards().keys().collect::<Vec<_>>(), vec!["nrf52840_pca10056"]);
        assert_eq!(db.bindings().keys().collect::<Vec<_>>(), vec!["nordic,nrf-uart"]);
        assert_eq!(db.samples().keys().collect::<Vec<_>>(), vec!["hello_world"]);
        assert!(db.config().is_empty());
        assert_eq!(report.samples, 1);
    }

    #[test]
    fn test_loaded_content() {
        let temp_dir = source_tree();
        let mut db = DeviceDatabase::new();
        db.load(temp_dir.path(), &LayoutConfig::default());

        let device = &db.devices()["nrf52840"];
        assert_eq!(device.dependencies(), ["armv7-m".to_string()]);
        let symbols = device.symbols().unwrap();
        assert_eq!(symbols.get("GPIO_ACTIVE_LOW").and_then(|v| v.as_int()), Some(1));

        let board = &db.boards()["nrf52840_pca10056"];
        assert_eq!(board.dependencies(), ["nrf52840".to_string()]);
        let model = board.devicetree().unwrap().sequence("model").unwrap();
        assert_eq!(model, ["Nordic PCA10056".to_string()]);

        let binding = &db.bindings()["nordic,nrf-uart"];
        assert_eq!(binding.property("status").unwrap()["type"].as_str(), Some("string"));

        let sample = &db.samples()["hello_world"];
        assert_eq!(sample.path, temp_dir.path().join("samples/hello_world"));
    }

    #[test]
    fn test_failures_are_isolated() {
        let temp_dir = source_tree();
        let root = temp_dir.path();
        write(root, "dts/bindings/broken.yaml", "properties: [unclosed\n");
        write(root, "samples/bad/sample.yaml", "sample: [\n");

        let mut db = DeviceDatabase::new();
        let report = db.load(root, &LayoutConfig::default());

        assert_eq!(report.failures.len(), 2);
        assert!(report.failures.iter().any(|f| f.path.ends_with("dts/bindings/broken.yaml")));
        assert!(report.failures.iter().any(|f| f.path.ends_with("samples/bad/sample.yaml")));
        assert_eq!(db.bindings().len(), 1);
        assert_eq!(db.samples().len(), 1);
        assert_eq!(db.devices().len(), 2);
    }

    #[test]
    fn test_non_descriptor_yaml_under_samples_is_not_a_failure() {
        let temp_dir = source_tree();
        let root = temp_dir.path();
        write(root, "samples/hello_world/testcase.yaml", "- common\n- build_only\n");
        write(root, "samples/hello_world/notes.yaml", "plain text\n");

        let mut db = DeviceDatabase::new();
        let report = db.load(root, &LayoutConfig::default());

        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.samples, 1);
    }

    #[test]
    fn test_missing_directory_fails_only_its_walk() {
        let temp_dir = source_tree();
        let root = temp_dir.path();
        fs::remove_dir_all(root.join("boards")).unwrap();

        let mut db = DeviceDatabase::new();
        let report = db.load(root, &LayoutConfig::default());

        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].path, root.join("boards"));
        assert!(db.boards().is_empty());
        assert_eq!(db.devices().len(), 2);
    }

    #[test]
    fn test_reload_replaces_contents() {
        let temp_dir = source_tree();
        let root = temp_dir.path();
        let mut db = DeviceDatabase::new();
        db.load(root, &LayoutConfig::default());

        fs::remove_file(root.join("dts/arm/armv7-m.dtsi")).unwrap();
        let report = db.load(root, &LayoutConfig::default());
        assert_eq!(report.devices, 1);
        assert!(!db.devices().contains_key("armv7-m"));
    }

    #[test]
    fn test_config_model() {
        let temp_dir = source_tree();
        let root = temp_dir.path();
        write(
            root,
            "build/kconfig.json",
            r#"{"item": {"kind": "menu"}, "prompt": "Main menu", "children": [
                {"item": {"kind": "symbol", "name": "GPIO", "type": "bool", "visibility": "y"}},
                {"item": {"kind": "symbol", "name": "BOARD", "type": "string", "visibility": "y"}}
            ]}"#,
        );
        write(root, "build/.config", "CONFIG_GPIO=y\nCONFIG_BOARD=\"nrf52840_pca10056\"\n");

        let layout = LayoutConfig {
            config_model: Some(PathBuf::from("build/kconfig.json")),
            dot_config: Some(PathBuf::from("build/.config")),
            ..LayoutConfig::default()
        };
        let mut db = DeviceDatabase::new();
        let report = db.load(root, &layout);

        assert!(report.is_clean(), "{:?}", report.failures);
        assert_eq!(report.config, 1);
        assert_eq!(
            serde_json::to_value(db.config()).unwrap(),
            serde_json::json!({"Main menu": {"GPIO": true, "BOARD": "nrf52840_pca10056"}})
        );
    }

    #[test]
    fn test_serialized_database_has_five_collections() {
        let temp_dir = source_tree();
        let mut db = DeviceDatabase::new();
        db.load(temp_dir.path(), &LayoutConfig::default());

        let value = serde_json::to_value(&db).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["bindings", "boards", "config", "devices", "samples"]);
    }
}
