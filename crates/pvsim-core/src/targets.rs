//! Persisted target file.
//!
//! The target file is a flat JSON object mapping channel names to their
//! simulation parameters:
//!
//! ```json
//! {
//!   "entry/instrument/temperature": {
//!     "target_value": 5.0,
//!     "std_dev": 0.2,
//!     "update_period": 0.5
//!   }
//! }
//! ```
//!
//! The raw object is kept alongside the typed entries so that repairing the
//! file never rewrites existing entries, including fields this crate does
//! not know about.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::TargetEntry;

/// Errors that can occur while loading or saving the target file.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Target file {0} must contain a JSON object")]
    NotAnObject(PathBuf),

    #[error("Invalid entry for {name}: {source}")]
    InvalidEntry {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// The target file contents plus the path it is persisted to.
#[derive(Debug, Clone, Default)]
pub struct TargetFile {
    /// Backing file; `None` disables persistence
    path: Option<PathBuf>,
    raw: Map<String, Value>,
    entries: BTreeMap<String, TargetEntry>,
}

impl TargetFile {
    /// A target set with no backing file and no entries.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Read the file at `path`, creating it as `{}` if it does not exist.
    ///
    /// Malformed contents are an error rather than an empty target set.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, TargetError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            warn!(
                "Target file {} does not exist, creating empty file",
                path.display()
            );
            write_json(&path, &Map::new())?;
        }

        Self::load(path)
    }

    /// Read an existing target file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TargetError> {
        let path = path.as_ref().to_path_buf();
        let text = fs::read_to_string(&path).map_err(|source| TargetError::Io {
            path: path.clone(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| TargetError::Parse {
            path: path.clone(),
            source,
        })?;
        let raw = match value {
            Value::Object(map) => map,
            _ => return Err(TargetError::NotAnObject(path)),
        };

        let mut file = Self::from_map(raw)?;
        file.path = Some(path);
        debug!("Loaded {} target entries", file.entries.len());
        Ok(file)
    }

    /// Build a target set from an already parsed object, without persistence.
    pub fn from_map(raw: Map<String, Value>) -> Result<Self, TargetError> {
        let mut entries = BTreeMap::new();
        for (name, value) in &raw {
            let entry: TargetEntry =
                serde_json::from_value(value.clone()).map_err(|source| {
                    TargetError::InvalidEntry {
                        name: name.clone(),
                        source,
                    }
                })?;
            entries.insert(name.clone(), entry);
        }

        Ok(Self {
            path: None,
            raw,
            entries,
        })
    }

    /// Backing file, if persistence is enabled.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Typed entry for a channel.
    pub fn get(&self, name: &str) -> Option<&TargetEntry> {
        self.entries.get(name)
    }

    /// Target value for a channel, when present and non-null.
    pub fn target_value(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|entry| entry.target_value)
    }

    /// Every channel name in the file, including placeholders.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.raw.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.raw.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Insert placeholders for every name not yet present and persist.
    ///
    /// Existing entries are left untouched. Returns the number of entries
    /// added.
    pub fn repair<'a, I>(&mut self, names: I) -> Result<usize, TargetError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut added = 0;
        for name in names {
            if !self.raw.contains_key(name) {
                self.raw.insert(name.to_string(), TargetEntry::placeholder());
                self.entries.insert(name.to_string(), TargetEntry::default());
                added += 1;
            }
        }

        match &self.path {
            Some(path) => {
                write_json(path, &self.raw)?;
                info!("Added {} placeholder targets to {}", added, path.display());
            }
            None => warn!("No target file configured, skipping update"),
        }

        Ok(added)
    }
}

/// Write the object next to `path` and rename it into place, so a failed
/// write never leaves a truncated target file.
fn write_json(path: &Path, map: &Map<String, Value>) -> Result<(), TargetError> {
    let text = serde_json::to_string_pretty(map).map_err(|source| TargetError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp_path = path.with_extension("json.partial");
    fs::write(&tmp_path, text).map_err(|source| TargetError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| TargetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");

        let file = TargetFile::load_or_create(&path).unwrap();

        assert!(file.is_empty());
        assert!(path.exists());
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), json!({}));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(&path, "{ not json").unwrap();

        let err = TargetFile::load_or_create(&path).unwrap_err();
        assert!(matches!(err, TargetError::Parse { .. }));
    }

    #[test]
    fn test_non_object_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(&path, "[1, 2]").unwrap();

        let err = TargetFile::load_or_create(&path).unwrap_err();
        assert!(matches!(err, TargetError::NotAnObject(_)));
    }

    #[test]
    fn test_load_does_not_create() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");

        let err = TargetFile::load(&path).unwrap_err();
        assert!(matches!(err, TargetError::Io { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn test_wrongly_typed_entry_is_an_error() {
        let raw = json!({"a": {"target_value": "five"}});
        let err = TargetFile::from_map(raw.as_object().unwrap().clone()).unwrap_err();
        assert!(matches!(err, TargetError::InvalidEntry { .. }));
    }

    #[test]
    fn test_null_target_value() {
        let raw = json!({"a": {"target_value": null, "std_dev": null}, "b": {"target_value": 2.5}});
        let file = TargetFile::from_map(raw.as_object().unwrap().clone()).unwrap();

        assert_eq!(file.target_value("a"), None);
        assert_eq!(file.target_value("b"), Some(2.5));
        assert_eq!(file.target_value("c"), None);
    }

    #[test]
    fn test_repair_is_additive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(
            &path,
            r#"{"existing": {"target_value": 5, "std_dev": 0.2, "note": "keep me"}}"#,
        )
        .unwrap();

        let mut file = TargetFile::load_or_create(&path).unwrap();
        let added = file.repair(["existing", "new/one", "new/two"]).unwrap();
        assert_eq!(added, 2);

        let text = fs::read_to_string(&path).unwrap();
        let persisted: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            persisted,
            json!({
                "existing": {"target_value": 5, "std_dev": 0.2, "note": "keep me"},
                "new/one": {"target_value": null, "std_dev": null},
                "new/two": {"target_value": null, "std_dev": null}
            })
        );

        let reloaded = TargetFile::load_or_create(&path).unwrap();
        assert_eq!(reloaded.target_value("existing"), Some(5.0));
        assert_eq!(reloaded.get("existing").unwrap().std_dev, Some(0.2));
        assert!(reloaded.contains("new/two"));
    }

    #[test]
    fn test_repair_keeps_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("targets.json");
        fs::write(&path, r#"{"zeta": {"target_value": 1}, "alpha": {"target_value": 2}}"#).unwrap();

        let mut file = TargetFile::load_or_create(&path).unwrap();
        file.repair(["mid"]).unwrap();

        let names: Vec<&str> = file.names().collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);

        let text = fs::read_to_string(&path).unwrap();
        let zeta = text.find("\"zeta\"").unwrap();
        let alpha = text.find("\"alpha\"").unwrap();
        let mid = text.find("\"mid\"").unwrap();
        assert!(zeta < alpha && alpha < mid);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("targets.json")]);
    }

    #[test]
    fn test_repair_without_path() {
        let mut file = TargetFile::in_memory();
        assert_eq!(file.repair(["a"]).unwrap(), 1);
        assert!(file.contains("a"));
        assert_eq!(file.path(), None);
    }
}
