//! Module extraction from an instrument tree.
//!
//! A module declaration is any map carrying a `module` field. Its `config`
//! block holds the channel description (`source`, `topic`, `dtype`,
//! `value_units`). Declarations without a `source` are structural groupings
//! and are never reported.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::model::DeviceSpec;
use crate::path::{join_positional, ChannelPath, PathSegment};
use crate::walker::{walk_named, walk_positional};

/// Module kinds the simulator drives.
pub const ALLOWED_MODULES: [&str; 2] = ["f144", "tdct"];

/// Source names of simulated channels start with this prefix.
pub const SIM_SOURCE_PREFIX: &str = "SIM_";

const MODULE_KEY: &str = "module";
const CONFIG_KEY: &str = "config";
const SOURCE_KEY: &str = "source";

/// A module declaration found in the tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FoundModule {
    /// Rendered path of the declaration
    pub path: String,
    /// Module kind as declared
    pub module: String,
    /// The declaration's `config` block
    pub config: Map<String, Value>,
}

/// Match predicate shared by every search: a map with a `module` field.
pub fn is_module(node: &Value) -> bool {
    node.as_object()
        .map_or(false, |map| map.contains_key(MODULE_KEY))
}

/// Positional search for modules of one kind.
pub fn find_modules_with_type<'a>(
    tree: &'a Value,
    module_type: &str,
) -> Vec<(&'a Value, Vec<PathSegment>)> {
    let mut found = Vec::new();
    walk_positional(
        tree,
        |node| node.get(MODULE_KEY).and_then(Value::as_str) == Some(module_type),
        |node, path| found.push((node, path.to_vec())),
    );
    found
}

/// Positional search for every module declaring a source.
///
/// Finds declarations nested anywhere, including inside other declarations.
pub fn find_all_modules(tree: &Value) -> Vec<FoundModule> {
    let mut found = Vec::new();
    walk_positional(tree, is_module, |node, path| {
        if let Some(module) = sourced_module(node) {
            found.push(FoundModule {
                path: join_positional(path),
                ..module
            });
        }
    });
    found
}

/// Named-path search for every module declaring a source.
pub fn find_all_modules_with_named_paths(tree: &Value) -> Vec<FoundModule> {
    let mut found = Vec::new();
    walk_named(tree, is_module, |node, path| {
        if let Some(module) = sourced_module(node) {
            found.push(FoundModule {
                path: ChannelPath::from_segments(path.iter().cloned()).to_string(),
                ..module
            });
        }
    });
    found
}

/// Extract the `module` kind and `config` block if the block has a source.
fn sourced_module(node: &Value) -> Option<FoundModule> {
    let config = node.get(CONFIG_KEY)?.as_object()?;
    if !config.contains_key(SOURCE_KEY) {
        return None;
    }
    let module = match node.get(MODULE_KEY)? {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(FoundModule {
        path: String::new(),
        module,
        config: config.clone(),
    })
}

/// Build the flat channel registry: channel path → device description.
///
/// Only allowed module kinds whose source carries the simulation prefix are
/// kept. Missing optional fields become `None`.
pub fn build_config(tree: &Value) -> BTreeMap<String, DeviceSpec> {
    let mut config = BTreeMap::new();

    for found in find_all_modules_with_named_paths(tree) {
        if !ALLOWED_MODULES.contains(&found.module.as_str()) {
            debug!("Skipping {} module at {}", found.module, found.path);
            continue;
        }

        let source = text_field(&found.config, SOURCE_KEY);
        if !source
            .as_deref()
            .map_or(false, |s| s.starts_with(SIM_SOURCE_PREFIX))
        {
            debug!("Skipping non-simulated source at {}", found.path);
            continue;
        }

        let spec = DeviceSpec {
            module: found.module.clone(),
            source,
            topic: text_field(&found.config, "topic"),
            dtype: text_field(&found.config, "dtype"),
            value_units: text_field(&found.config, "value_units"),
        };

        if config.insert(found.path.clone(), spec).is_some() {
            warn!("Duplicate channel path {}, keeping the last declaration", found.path);
        }
    }

    config
}

fn text_field(config: &Map<String, Value>, key: &str) -> Option<String> {
    config.get(key).and_then(Value::as_str).map(String::from)
}
