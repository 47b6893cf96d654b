//! Configuration tree flattening
//!
//! The configuration model is produced by an external tool and handed over as JSON.
//! Flattening turns it into nested maps keyed by menu prompt and option name,
//! holding the enabled/disabled state of boolean options and the raw value of
//! string, int and hex options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration model {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tristate {
    #[default]
    N,
    M,
    Y,
}

impl Tristate {
    fn from_value(value: &str) -> Option<Self> {
        match value {
            "n" => Some(Tristate::N),
            "m" => Some(Tristate::M),
            "y" => Some(Tristate::Y),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SymbolType {
    Bool,
    Tristate,
    String,
    Int,
    Hex,
    #[serde(other)]
    Unknown,
}

/// A configuration option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSymbol {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: SymbolType,
    #[serde(default)]
    pub visibility: Tristate,
    #[serde(default)]
    pub tri_value: Tristate,
    #[serde(default)]
    pub str_value: String,
}

impl ConfigSymbol {
    fn is_boolean(&self) -> bool {
        matches!(self.kind, SymbolType::Bool | SymbolType::Tristate)
    }

    /// Boolean options ignore visibility: an invisible option can still be selected
    fn is_enabled(&self) -> bool {
        self.tri_value == Tristate::Y
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MenuItem {
    Menu,
    Comment,
    Symbol(ConfigSymbol),
}

/// Node of the configuration model; `children` are in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuNode {
    pub item: MenuItem,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub children: Vec<MenuNode>,
}

/// Flattened value of a configuration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ConfigEntry {
    Bool(bool),
    Str(String),
    Menu(ConfigMap),
}

pub type ConfigMap = BTreeMap<String, ConfigEntry>;

impl MenuNode {
    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Set symbol values from a `.config` file; returns how many symbols were updated
    pub fn apply_values(&mut self, values: &DotConfig) -> usize {
        let mut applied = 0;
        if let MenuItem::Symbol(symbol) = &mut self.item {
            let value = symbol.name.as_deref().and_then(|name| values.get(name));
            if let Some(value) = value {
                if symbol.is_boolean() {
                    symbol.tri_value = Tristate::from_value(value).unwrap_or_default();
                }
                symbol.str_value = value.to_string();
                applied += 1;
            }
        }
        for child in &mut self.children {
            applied += child.apply_values(values);
        }
        applied
    }

    /// Flatten this node as the top of the model
    pub fn flatten(&self) -> ConfigMap {
        flatten(std::slice::from_ref(self))
    }
}

/// Flatten a list of sibling nodes
pub fn flatten(nodes: &[MenuNode]) -> ConfigMap {
    let mut map = ConfigMap::new();
    flatten_into(nodes, &mut map);
    map
}

fn flatten_into(nodes: &[MenuNode], map: &mut ConfigMap) {
    for node in nodes {
        match &node.item {
            MenuItem::Menu => {
                let Some(prompt) = node.prompt.as_ref().filter(|_| !node.children.is_empty()) else {
                    continue;
                };
                map.insert(prompt.clone(), ConfigEntry::Menu(flatten(&node.children)));
            }
            MenuItem::Comment => {}
            MenuItem::Symbol(symbol) => flatten_symbol(node, symbol, map),
        }
    }
}

fn flatten_symbol(node: &MenuNode, symbol: &ConfigSymbol, map: &mut ConfigMap) {
    let Some(name) = symbol.name.as_ref() else {
        return;
    };

    if symbol.is_boolean() {
        let entry = if !symbol.is_enabled() {
            ConfigEntry::Bool(false)
        } else if node.children.is_empty() {
            ConfigEntry::Bool(true)
        } else {
            ConfigEntry::Menu(flatten(&node.children))
        };
        map.insert(name.clone(), entry);
        return;
    }

    if symbol.visibility != Tristate::Y {
        trace!(symbol = %name, "Skipping invisible option");
        return;
    }

    match symbol.kind {
        SymbolType::String | SymbolType::Int | SymbolType::Hex => {
            map.insert(name.clone(), ConfigEntry::Str(symbol.str_value.clone()));
        }
        _ => trace!(symbol = %name, "Skipping option of unknown type"),
    }
}

/// Values of a `.config` file, keyed by option name without the `CONFIG_` prefix
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DotConfig {
    values: BTreeMap<String, String>,
}

const CONFIG_PREFIX: &str = "CONFIG_";

impl DotConfig {
    pub fn parse(content: &str) -> Self {
        let mut values = BTreeMap::new();
        for line in content.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix('#') {
                if let Some(name) = rest.trim().strip_suffix(" is not set") {
                    values.insert(strip_prefix(name).to_string(), "n".to_string());
                }
                continue;
            }
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            values.insert(strip_prefix(name.trim()).to_string(), unquote(value.trim()));
        }
        debug!(count = values.len(), "Parsed configuration values");
        Self { values }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn strip_prefix(name: &str) -> &str {
    name.strip_prefix(CONFIG_PREFIX).unwrap_or(name)
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.extend(chars.next()),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn symbol(name: &str, kind: SymbolType, visibility: Tristate, tri_value: Tristate, str_value: &str) -> MenuNode {
        MenuNode {
            item: MenuItem::Symbol(ConfigSymbol {
                name: Some(name.to_string()),
                kind,
                visibility,
                tri_value,
                str_value: str_value.to_string(),
            }),
            prompt: Some(name.to_lowercase()),
            children: Vec::new(),
        }
    }

    fn menu(prompt: &str, children: Vec<MenuNode>) -> MenuNode {
        MenuNode {
            item: MenuItem::Menu,
            prompt: Some(prompt.to_string()),
            children,
        }
    }

    #[test]
    fn test_deserialize_model() {
        let node = MenuNode::from_json(
            r#"{
                "item": {"kind": "menu"},
                "prompt": "Main menu",
                "children": [
                    {"item": {"kind": "comment"}, "prompt": "note"},
                    {"item": {"kind": "symbol", "name": "GPIO", "type": "bool",
                              "visibility": "y", "tri_value": "y", "str_value": "y"}},
                    {"item": {"kind": "symbol", "name": "ODD", "type": "choice"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(node.children.len(), 3);
        let MenuItem::Symbol(odd) = &node.children[2].item else {
            panic!("expected symbol");
        };
        assert_eq!(odd.kind, SymbolType::Unknown);
        assert_eq!(odd.visibility, Tristate::N);
    }

    #[test]
    fn test_booleans() {
        let map = flatten(&[
            symbol("ON", SymbolType::Bool, Tristate::Y, Tristate::Y, "y"),
            symbol("OFF", SymbolType::Bool, Tristate::Y, Tristate::N, "n"),
            symbol("HIDDEN", SymbolType::Bool, Tristate::N, Tristate::N, "n"),
            symbol("MODULE", SymbolType::Tristate, Tristate::Y, Tristate::M, "m"),
        ]);
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            json!({"ON": true, "OFF": false, "HIDDEN": false, "MODULE": false})
        );
    }

    #[test]
    fn test_invisible_selected_bool_is_enabled() {
        let mut soc = symbol("SOC_FAMILY_NRF", SymbolType::Bool, Tristate::N, Tristate::Y, "y");
        soc.children = vec![symbol("SOC_SERIES_NRF52X", SymbolType::Bool, Tristate::N, Tristate::Y, "y")];
        let map = flatten(&[
            symbol("HAS_HW_NRF_UARTE0", SymbolType::Bool, Tristate::N, Tristate::Y, "y"),
            soc,
        ]);
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            json!({"HAS_HW_NRF_UARTE0": true, "SOC_FAMILY_NRF": {"SOC_SERIES_NRF52X": true}})
        );
    }

    #[test]
    fn test_value_options() {
        let map = flatten(&[
            symbol("NAME", SymbolType::String, Tristate::Y, Tristate::N, "nrf52840_pca10056"),
            symbol("SIZE", SymbolType::Int, Tristate::Y, Tristate::N, "1024"),
            symbol("BASE", SymbolType::Hex, Tristate::Y, Tristate::N, "0x20000000"),
            symbol("SECRET", SymbolType::String, Tristate::N, Tristate::N, "x"),
            symbol("ODD", SymbolType::Unknown, Tristate::Y, Tristate::Y, "x"),
        ]);
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            json!({"NAME": "nrf52840_pca10056", "SIZE": "1024", "BASE": "0x20000000"})
        );
    }

    #[test]
    fn test_menus_and_enabled_bool_children() {
        let mut serial = symbol("SERIAL", SymbolType::Bool, Tristate::Y, Tristate::Y, "y");
        serial.children = vec![symbol("UART_0", SymbolType::Bool, Tristate::Y, Tristate::Y, "y")];
        let mut disabled = symbol("USB", SymbolType::Bool, Tristate::Y, Tristate::N, "n");
        disabled.children = vec![symbol("USB_CDC", SymbolType::Bool, Tristate::Y, Tristate::Y, "y")];

        let top = menu(
            "Main menu",
            vec![
                menu("Device Drivers", vec![serial, disabled]),
                menu("Empty", Vec::new()),
                MenuNode {
                    item: MenuItem::Comment,
                    prompt: Some("just text".to_string()),
                    children: Vec::new(),
                },
            ],
        );

        assert_eq!(
            serde_json::to_value(top.flatten()).unwrap(),
            json!({"Main menu": {"Device Drivers": {"SERIAL": {"UART_0": true}, "USB": false}}})
        );
    }

    #[test]
    fn test_collisions_last_write_wins() {
        let map = flatten(&[
            menu("Options", vec![symbol("A", SymbolType::Bool, Tristate::Y, Tristate::Y, "y")]),
            menu("Options", vec![symbol("B", SymbolType::Bool, Tristate::Y, Tristate::Y, "y")]),
            symbol("X", SymbolType::String, Tristate::Y, Tristate::N, "first"),
            symbol("X", SymbolType::String, Tristate::Y, Tristate::N, "second"),
        ]);
        assert_eq!(
            serde_json::to_value(&map).unwrap(),
            json!({"Options": {"B": true}, "X": "second"})
        );
    }

    #[test]
    fn test_parse_dot_config() {
        let config = DotConfig::parse(
            "#\n# Automatically generated file\n#\nCONFIG_GPIO=y\n# CONFIG_USB is not set\n\
             CONFIG_BOARD=\"nrf52840_pca10056\"\nCONFIG_QUOTE=\"a \\\"b\\\"\"\nCONFIG_SRAM_SIZE=256\n",
        );
        assert_eq!(config.get("GPIO"), Some("y"));
        assert_eq!(config.get("USB"), Some("n"));
        assert_eq!(config.get("BOARD"), Some("nrf52840_pca10056"));
        assert_eq!(config.get("QUOTE"), Some("a \"b\""));
        assert_eq!(config.get("SRAM_SIZE"), Some("256"));
        assert_eq!(config.len(), 5);
    }

    #[test]
    fn test_apply_values() {
        let mut top = menu(
            "Main menu",
            vec![
                symbol("GPIO", SymbolType::Bool, Tristate::Y, Tristate::N, "n"),
                symbol("USB", SymbolType::Bool, Tristate::Y, Tristate::Y, "y"),
                symbol("BOARD", SymbolType::String, Tristate::Y, Tristate::N, ""),
                symbol("UNTOUCHED", SymbolType::Int, Tristate::Y, Tristate::N, "7"),
            ],
        );
        let config = DotConfig::parse("CONFIG_GPIO=y\n# CONFIG_USB is not set\nCONFIG_BOARD=\"pca\"\n");

        assert_eq!(top.apply_values(&config), 3);
        assert_eq!(
            serde_json::to_value(top.flatten()).unwrap(),
            json!({"Main menu": {"GPIO": true, "USB": false, "BOARD": "pca", "UNTOUCHED": "7"}})
        );
    }
}
