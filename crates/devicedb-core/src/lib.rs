//! devicedb Core - Parsing, symbol resolution and aggregation for hardware source trees
//!
//! This crate provides everything needed to turn a source tree into a queryable database:
//! - Device tree source reading into a nested node model
//! - Header symbol resolution (`#define` tables with a restricted expression evaluator)
//! - YAML binding loading with `!include` chaining
//! - Configuration tree flattening
//! - The device database that walks the tree and aggregates the collections

pub mod binding;
pub mod database;
pub mod devicetree;
pub mod expr;
pub mod files;
pub mod kconfig;
pub mod sample;
pub mod symbols;

pub use binding::{Binding, BindingError, BindingLoader};
pub use database::{DeviceDatabase, LayoutConfig, LoadFailure, LoadReport};
pub use devicetree::{DeviceTree, DeviceTreeError, DtNode, DtValue};
pub use files::{FileIndex, WalkError};
pub use kconfig::{ConfigEntry, ConfigError, ConfigMap, DotConfig, MenuNode};
pub use sample::{Sample, SampleError};
pub use symbols::{HeaderResolver, SymbolError, SymbolTable, SymbolValue};
