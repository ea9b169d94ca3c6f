//! Instrument tree traversal.
//!
//! Two depth-first walks over a `serde_json::Value` tree, both taking a
//! match predicate and an action invoked on every matching node:
//!
//! - [`walk_positional`] visits every node and records the structural
//!   position (map keys and sequence indices) of each match.
//! - [`walk_named`] records the names of the enclosing groups instead. A map
//!   carrying a `name` field extends the path and opens only its `children`
//!   collection for further descent; its other fields are terminal data.
//!   A map without a name is transparent and all of its fields are explored.

use serde_json::Value;

use crate::path::PathSegment;

/// Key that extends a named path.
pub const NAME_KEY: &str = "name";

/// The only key descended into below a named node.
pub const CHILDREN_KEY: &str = "children";

/// Walk every node, passing matches together with their positional path.
///
/// The match test runs on a node before its children are visited.
pub fn walk_positional<'a, M, A>(node: &'a Value, mut matches: M, mut action: A)
where
    M: FnMut(&Value) -> bool,
    A: FnMut(&'a Value, &[PathSegment]),
{
    let mut path = Vec::new();
    positional(node, &mut path, &mut matches, &mut action);
}

fn positional<'a, M, A>(node: &'a Value, path: &mut Vec<PathSegment>, matches: &mut M, action: &mut A)
where
    M: FnMut(&Value) -> bool,
    A: FnMut(&'a Value, &[PathSegment]),
{
    if matches(node) {
        action(node, path);
    }

    match node {
        Value::Object(map) => {
            for (key, value) in map {
                path.push(PathSegment::Key(key.clone()));
                positional(value, path, matches, action);
                path.pop();
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                path.push(PathSegment::Index(index));
                positional(item, path, matches, action);
                path.pop();
            }
        }
        _ => {}
    }
}

/// Walk the tree along named groups, passing matches together with the
/// names of their enclosing groups (the node's own name included).
pub fn walk_named<'a, M, A>(node: &'a Value, mut matches: M, mut action: A)
where
    M: FnMut(&Value) -> bool,
    A: FnMut(&'a Value, &[String]),
{
    let mut path = Vec::new();
    named(node, &mut path, &mut matches, &mut action);
}

fn named<'a, M, A>(node: &'a Value, path: &mut Vec<String>, matches: &mut M, action: &mut A)
where
    M: FnMut(&Value) -> bool,
    A: FnMut(&'a Value, &[String]),
{
    match node {
        Value::Object(map) => {
            let extended = match map.get(NAME_KEY) {
                Some(name) => {
                    path.push(name_text(name));
                    true
                }
                None => false,
            };

            if matches(node) {
                action(node, path);
            }

            for (key, value) in map {
                if key != NAME_KEY && (!extended || key == CHILDREN_KEY) {
                    named(value, path, matches, action);
                }
            }

            if extended {
                path.pop();
            }
        }
        Value::Array(items) => {
            for item in items {
                named(item, path, matches, action);
            }
        }
        _ => {}
    }
}

fn name_text(name: &Value) -> String {
    match name {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
