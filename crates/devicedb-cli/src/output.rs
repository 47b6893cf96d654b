//! JSON rendering of database collections

use anyhow::Result;
use clap::ValueEnum;
use devicedb_core::DeviceDatabase;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Collection {
    Boards,
    Devices,
    Samples,
    Config,
    Bindings,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Boards,
        Collection::Devices,
        Collection::Samples,
        Collection::Config,
        Collection::Bindings,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Boards => "boards",
            Collection::Devices => "devices",
            Collection::Samples => "samples",
            Collection::Config => "config",
            Collection::Bindings => "bindings",
        }
    }

    fn to_value(self, db: &DeviceDatabase) -> serde_json::Result<Value> {
        match self {
            Collection::Boards => serde_json::to_value(db.boards()),
            Collection::Devices => serde_json::to_value(db.devices()),
            Collection::Samples => serde_json::to_value(db.samples()),
            Collection::Config => serde_json::to_value(db.config()),
            Collection::Bindings => serde_json::to_value(db.bindings()),
        }
    }
}

/// Render the requested collections as one JSON object keyed by collection name.
///
/// An empty selection renders all five.
pub fn render(db: &DeviceDatabase, collections: &[Collection], pretty: bool) -> Result<String> {
    let selected = if collections.is_empty() {
        &Collection::ALL[..]
    } else {
        collections
    };

    let mut object = Map::new();
    for collection in selected {
        object.insert(collection.name().to_string(), collection.to_value(db)?);
    }

    let value = Value::Object(object);
    let text = if pretty {
        serde_json::to_string_pretty(&value)?
    } else {
        serde_json::to_string(&value)?
    };
    Ok(text)
}
