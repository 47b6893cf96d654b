//! Header symbol resolution
//!
//! Header files contribute `#define NAME BODY` symbols to a device tree document.
//! Bodies are evaluated with the restricted evaluator in [`crate::expr`]; a body that
//! references an earlier symbol gets one substitution attempt, and anything that
//! still does not evaluate is kept as its literal text.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::expr::{self, Value};
use crate::files::{self, FileIndex, HEADER_EXT};

#[derive(Error, Debug)]
pub enum SymbolError {
    #[error("Header {0} is not in the header index")]
    NotIndexed(String),
    #[error("Failed to read header {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Resolved value of a header symbol
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum SymbolValue {
    Int(i64),
    Str(String),
    /// Body text that could not be evaluated
    Raw(String),
}

impl SymbolValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SymbolValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SymbolValue::Raw(_))
    }
}

impl From<Value> for SymbolValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Int(n) => SymbolValue::Int(n),
            Value::Str(s) => SymbolValue::Str(s),
        }
    }
}

impl fmt::Display for SymbolValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolValue::Int(n) => write!(f, "{}", n),
            SymbolValue::Str(s) | SymbolValue::Raw(s) => f.write_str(s),
        }
    }
}

/// Ordered symbol table
///
/// Insertion order is significant: it is the order in which symbols are tried
/// when substituting into an unresolved body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    entries: Vec<(String, SymbolValue)>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SymbolValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Insert or redefine a symbol; a redefinition keeps its original position
    pub fn insert(&mut self, name: impl Into<String>, value: SymbolValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evaluate a macro body against the current table.
    ///
    /// 1. Evaluate the body on its own.
    /// 2. Otherwise substitute the first symbol (in insertion order) whose name occurs
    ///    in the body and evaluate once more.
    /// 3. Otherwise keep the body text.
    pub fn resolve_body(&self, body: &str) -> SymbolValue {
        let body = strip_comment(body).trim();

        if let Ok(value) = expr::evaluate(body) {
            return value.into();
        }

        if let Some((name, value)) = self.iter().find(|(name, _)| body.contains(name)) {
            let substituted = body.replace(name, &value.to_string());
            if let Ok(value) = expr::evaluate(&substituted) {
                return value.into();
            }
            trace!(body, symbol = name, "Substitution did not resolve body");
        }

        SymbolValue::Raw(body.to_string())
    }

    /// Resolve a `#define` body and store it under `name`
    pub fn define(&mut self, name: &str, body: &str) {
        let value = self.resolve_body(body);
        self.insert(name, value);
    }
}

impl Serialize for SymbolTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Split a `#define NAME BODY` line into name and body; `None` when there is no body
fn parse_define(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix("#define")?;
    if !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }
    // Bodyless defines (include guards) carry no value
    let (name, body) = rest.trim().split_once(char::is_whitespace)?;
    if strip_comment(body).trim().is_empty() {
        None
    } else {
        Some((name, body))
    }
}

fn strip_comment(body: &str) -> &str {
    let body = body.split("/*").next().unwrap_or(body);
    body.split("//").next().unwrap_or(body)
}

/// Resolver context for one device tree document
///
/// Holds the header index and the set of headers already read, so that a header
/// included twice (directly or through another header) is only read once.
#[derive(Debug)]
pub struct HeaderResolver<'a> {
    index: &'a FileIndex,
    visited: HashSet<String>,
}

impl<'a> HeaderResolver<'a> {
    pub fn new(index: &'a FileIndex) -> Self {
        Self {
            index,
            visited: HashSet::new(),
        }
    }

    /// Read header `name` from the index and merge its symbols into `table`
    pub fn resolve(&mut self, name: &str, table: &mut SymbolTable) -> Result<(), SymbolError> {
        if !self.visited.insert(name.to_string()) {
            trace!(header = name, "Header already resolved");
            return Ok(());
        }

        let path = self
            .index
            .get(name)
            .ok_or_else(|| SymbolError::NotIndexed(name.to_string()))?;
        let content = std::fs::read_to_string(path).map_err(|source| SymbolError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let before = table.len();
        self.resolve_source(&content, table);
        debug!(
            header = name,
            path = %path.display(),
            added = table.len() - before,
            "Resolved header symbols"
        );
        Ok(())
    }

    /// Merge the symbols defined in `source` into `table`, following nested header includes
    pub fn resolve_source(&mut self, source: &str, table: &mut SymbolTable) {
        for line in source.lines() {
            if let Some(target) = files::include_target(line) {
                let name = files::base_name(target);
                if files::split_extension(name).1 == Some(HEADER_EXT) {
                    if let Err(e) = self.resolve(name, table) {
                        warn!(header = name, error = %e, "Skipping nested header");
                    }
                }
                continue;
            }

            if let Some((name, body)) = parse_define(line) {
                table.define(name, body);
            }
        }
    }
}
