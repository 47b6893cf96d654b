//! Device tree source reading
//!
//! The reader is line oriented: it recognizes include directives, the root marker,
//! scope open/close lines and `key = value;` properties, and builds a nested
//! [`DtNode`] tree. Anything else is skipped. No semantic validation is done.
//!
//! Scopes are tracked on an explicit stack of paths from the document root, so the
//! reader never recurses.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::files::{self, FileIndex, DEVICE_EXT, HEADER_EXT};
use crate::symbols::{HeaderResolver, SymbolTable};

/// Child of the document root holding the `/ { ... }` contents
pub const DEVICETREE_KEY: &str = "devicetree";
/// Sequence under `devicetree` listing included device files
pub const DEPENDENCY_KEY: &str = "dependency";
/// Key carrying the label of a repeated child
pub const INSTANCE_KEY: &str = "instance";

#[derive(Error, Debug)]
pub enum DeviceTreeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Value stored under a node key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DtValue {
    /// Unsplit property text, used inside repeated-instance sequences
    Scalar(String),
    /// Property tokens
    Sequence(Vec<String>),
    /// Single child node
    Node(DtNode),
    /// Repeated child nodes sharing one key
    Instances(Vec<DtNode>),
}

/// Mapping from property or child name to value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DtNode {
    entries: BTreeMap<String, DtValue>,
}

impl DtNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&DtValue> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut DtValue> {
        self.entries.get_mut(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: DtValue) -> Option<DtValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DtValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Single child node under `key`
    pub fn child(&self, key: &str) -> Option<&DtNode> {
        match self.entries.get(key)? {
            DtValue::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Repeated child nodes under `key`
    pub fn instances(&self, key: &str) -> Option<&[DtNode]> {
        match self.entries.get(key)? {
            DtValue::Instances(nodes) => Some(nodes),
            _ => None,
        }
    }

    /// Property tokens under `key`
    pub fn sequence(&self, key: &str) -> Option<&[String]> {
        match self.entries.get(key)? {
            DtValue::Sequence(tokens) => Some(tokens),
            _ => None,
        }
    }

    pub fn scalar(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            DtValue::Scalar(s) => Some(s),
            _ => None,
        }
    }
}

/// A parsed board or device description
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceTree {
    #[serde(flatten)]
    root: DtNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbols: Option<SymbolTable>,
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceTree {
    /// Create an empty document with an empty `devicetree.dependency` list
    pub fn new() -> Self {
        let mut devicetree = DtNode::new();
        devicetree.insert(DEPENDENCY_KEY, DtValue::Sequence(Vec::new()));
        let mut root = DtNode::new();
        root.insert(DEVICETREE_KEY, DtValue::Node(devicetree));
        Self {
            root,
            symbols: None,
        }
    }

    /// Parse device tree source, resolving header includes through `headers`
    pub fn parse(source: &str, headers: &FileIndex) -> Self {
        DtsReader::new(headers).read(source)
    }

    /// Parse a device tree source file
    pub fn from_file(path: &Path, headers: &FileIndex) -> Result<Self, DeviceTreeError> {
        let source = std::fs::read_to_string(path).map_err(|source| DeviceTreeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::parse(&source, headers))
    }

    /// Document root (holds `devicetree` and any top-level overrides)
    pub fn root(&self) -> &DtNode {
        &self.root
    }

    /// Contents of the `/ { ... }` block
    pub fn devicetree(&self) -> Option<&DtNode> {
        self.root.child(DEVICETREE_KEY)
    }

    /// Names of included device files, in include order
    pub fn dependencies(&self) -> &[String] {
        self.devicetree()
            .and_then(|dt| dt.sequence(DEPENDENCY_KEY))
            .unwrap_or(&[])
    }

    /// Symbols collected from included headers
    pub fn symbols(&self) -> Option<&SymbolTable> {
        self.symbols.as_ref()
    }

    fn add_dependency(&mut self, name: &str) {
        if !matches!(self.root.get(DEVICETREE_KEY), Some(DtValue::Node(_))) {
            self.root.insert(DEVICETREE_KEY, DtValue::Node(DtNode::new()));
        }
        if let Some(DtValue::Node(devicetree)) = self.root.get_mut(DEVICETREE_KEY) {
            match devicetree.get_mut(DEPENDENCY_KEY) {
                Some(DtValue::Sequence(deps)) => deps.push(name.to_string()),
                _ => {
                    devicetree.insert(DEPENDENCY_KEY, DtValue::Sequence(vec![name.to_string()]));
                }
            }
        }
    }
}

/// One step from a scope to an entry inside it
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// Entry of a node by key (a `Node` or an `Instances` sequence)
    Key(String),
    /// Element of an `Instances` sequence
    Index(usize),
}

/// Where the current scope points
enum Target<'t> {
    Node(&'t mut DtNode),
    Sequence(&'t mut Vec<DtNode>),
}

fn resolve<'t>(root: &'t mut DtNode, path: &[Step]) -> Option<Target<'t>> {
    let mut target = Target::Node(root);
    for step in path {
        target = match (target, step) {
            (Target::Node(node), Step::Key(key)) => match node.entries.get_mut(key)? {
                DtValue::Node(child) => Target::Node(child),
                DtValue::Instances(list) => Target::Sequence(list),
                _ => return None,
            },
            (Target::Sequence(list), Step::Index(i)) => Target::Node(list.get_mut(*i)?),
            _ => return None,
        };
    }
    Some(target)
}

/// Single-pass device tree source reader
pub struct DtsReader<'i> {
    headers: HeaderResolver<'i>,
    tree: DeviceTree,
    /// Absolute path of every open scope; the last one is current
    scopes: Vec<Vec<Step>>,
}

impl<'i> DtsReader<'i> {
    pub fn new(headers: &'i FileIndex) -> Self {
        Self {
            headers: HeaderResolver::new(headers),
            tree: DeviceTree::new(),
            scopes: Vec::new(),
        }
    }

    /// Consume `source` and return the finished document
    pub fn read(mut self, source: &str) -> DeviceTree {
        for line in logical_lines(source) {
            self.read_line(&line);
        }
        if !self.scopes.is_empty() {
            debug!(open = self.scopes.len(), "Source ended with unclosed scopes");
        }
        self.tree
    }

    /// Current scope depth
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    fn current_path(&self) -> Vec<Step> {
        self.scopes.last().cloned().unwrap_or_default()
    }

    fn read_line(&mut self, line: &str) {
        if line.starts_with("#include") {
            self.include(line);
            return;
        }

        if is_root_marker(line) {
            self.scopes.push(vec![Step::Key(DEVICETREE_KEY.to_string())]);
            return;
        }

        let tokens: Vec<&str> = line
            .split('=')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .collect();
        let Some(last) = tokens.last() else {
            return;
        };

        if last.ends_with('{') {
            self.open_scope(tokens[0]);
        } else if *last == "};" {
            self.close_scope();
        } else if tokens.len() >= 2 {
            self.property(tokens[0], tokens[1], tokens.len() == 2);
        } else {
            trace!(line, "Skipping unrecognized line");
        }
    }

    fn include(&mut self, line: &str) {
        let Some(target) = files::include_target(line) else {
            return;
        };
        let name = files::base_name(target);
        match files::split_extension(name) {
            (stem, Some(DEVICE_EXT)) => self.tree.add_dependency(stem),
            (_, Some(HEADER_EXT)) => {
                let table = self.tree.symbols.get_or_insert_with(SymbolTable::new);
                if let Err(e) = self.headers.resolve(name, table) {
                    warn!(header = name, error = %e, "Skipping header include");
                }
            }
            _ => trace!(include = target, "Ignoring include"),
        }
    }

    fn open_scope(&mut self, head: &str) {
        let head = head.trim_end_matches('{').trim();
        let words: Vec<&str> = head.split_whitespace().collect();
        let path = self.current_path();
        match words.as_slice() {
            [] => {}
            [key] => self.enter_child(path, bare_key(key)),
            // `label: key@addr {` opens a repeated instance named by its first label
            [label, extra @ .., key] if words[..words.len() - 1].iter().all(|w| w.ends_with(':')) => {
                if !extra.is_empty() {
                    debug!(label = %label, extra = ?extra, "Keeping first label of instance");
                }
                self.enter_instance(path, bare_key(key), label.trim_end_matches(':'))
            }
            [first, ..] => self.enter_child(path, bare_key(first)),
        }
    }

    fn enter_child(&mut self, mut path: Vec<Step>, key: &str) {
        let Some(target) = resolve(&mut self.tree.root, &path) else {
            debug!(key, "Scope target vanished, ignoring scope");
            return;
        };
        match target {
            Target::Node(node) => {
                if !matches!(node.get(key), Some(DtValue::Node(_) | DtValue::Instances(_))) {
                    node.insert(key, DtValue::Node(DtNode::new()));
                }
                path.push(Step::Key(key.to_string()));
            }
            Target::Sequence(list) => {
                let mut holder = DtNode::new();
                holder.insert(key, DtValue::Node(DtNode::new()));
                list.push(holder);
                path.push(Step::Index(list.len() - 1));
                path.push(Step::Key(key.to_string()));
            }
        }
        self.scopes.push(path);
    }

    fn enter_instance(&mut self, mut path: Vec<Step>, key: &str, label: &str) {
        let Some(target) = resolve(&mut self.tree.root, &path) else {
            debug!(key, "Scope target vanished, ignoring scope");
            return;
        };
        let mut instance = DtNode::new();
        instance.insert(INSTANCE_KEY, DtValue::Scalar(label.to_string()));

        let node = match target {
            Target::Node(node) => node,
            Target::Sequence(list) => {
                list.push(DtNode::new());
                path.push(Step::Index(list.len() - 1));
                match list.last_mut() {
                    Some(node) => node,
                    None => return,
                }
            }
        };

        if !matches!(node.get(key), Some(DtValue::Instances(_))) {
            let list = match node.entries.remove(key) {
                Some(DtValue::Node(previous)) => vec![previous],
                _ => Vec::new(),
            };
            node.insert(key, DtValue::Instances(list));
        }
        let Some(DtValue::Instances(list)) = node.get_mut(key) else {
            return;
        };
        list.push(instance);
        let index = list.len() - 1;

        path.push(Step::Key(key.to_string()));
        path.push(Step::Index(index));
        self.scopes.push(path);
    }

    fn close_scope(&mut self) {
        if self.scopes.pop().is_none() {
            debug!("Ignoring scope close at top level");
        }
    }

    fn property(&mut self, key: &str, value: &str, single: bool) {
        let path = self.current_path();
        let Some(target) = resolve(&mut self.tree.root, &path) else {
            debug!(key, "Property target vanished, ignoring property");
            return;
        };

        match target {
            Target::Node(node) => {
                let tokens = if single && value.starts_with('<') && value.ends_with(">;") {
                    array_tokens(value)
                } else {
                    quoted_tokens(value)
                };
                node.insert(key, DtValue::Sequence(tokens));
            }
            Target::Sequence(list) => {
                let mut entry = DtNode::new();
                entry.insert(key, DtValue::Scalar(value.to_string()));
                list.push(entry);
            }
        }
    }
}

fn is_root_marker(line: &str) -> bool {
    line.strip_prefix('/')
        .map(|rest| rest.trim_start() == "{")
        .unwrap_or(false)
}

/// Drop a unit address: `serial@40002000` -> `serial`
fn bare_key(word: &str) -> &str {
    word.split('@').next().unwrap_or(word)
}

/// `<1 2 3>;` -> `["1", "2", "3"]`
fn array_tokens(value: &str) -> Vec<String> {
    value
        .trim_end_matches(|c| c == '>' || c == ';')
        .trim_start_matches('<')
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// `"a", "b";` -> `["a", "b"]`
fn quoted_tokens(value: &str) -> Vec<String> {
    value
        .split('"')
        .map(|fragment| fragment.trim_matches(|c| matches!(c, ' ' | '"' | ',' | ';')))
        .filter(|fragment| !fragment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Strip comments and split source into one statement per line.
///
/// A new line starts after every `{` and `;` outside double quotes.
fn logical_lines(source: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut in_block_comment = false;

    for raw in source.lines() {
        let mut current = String::new();
        let mut in_quotes = false;
        let mut chars = raw.chars().peekable();

        while let Some(c) = chars.next() {
            if in_block_comment {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    in_block_comment = false;
                }
                continue;
            }

            match c {
                '\\' if in_quotes => {
                    current.push(c);
                    if let Some(escaped) = chars.next() {
                        current.push(escaped);
                    }
                }
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(c);
                }
                '/' if !in_quotes && chars.peek() == Some(&'/') => break,
                '/' if !in_quotes && chars.peek() == Some(&'*') => {
                    chars.next();
                    in_block_comment = true;
                }
                '{' | ';' if !in_quotes => {
                    current.push(c);
                    flush_line(&mut lines, &mut current);
                }
                _ => current.push(c),
            }
        }
        flush_line(&mut lines, &mut current);
    }

    lines
}

fn flush_line(lines: &mut Vec<String>, current: &mut String) {
    let line = current.trim();
    if !line.is_empty() {
        lines.push(line.to_string());
    }
    current.clear();
}
