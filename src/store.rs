use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreError;

pub const LAST_EXPRESSION: &str = "lastExpression";
pub const SYMBOL_TABLE: &str = "symbolTable";
pub const EVALUATED_EXPRESSIONS: &str = "evaluatedExpressions";
pub const LAST_GENERATED_TREE: &str = "lastGeneratedTree";

pub const ALL_KEYS: [&str; 4] = [LAST_EXPRESSION, SYMBOL_TABLE, EVALUATED_EXPRESSIONS, LAST_GENERATED_TREE];

/// String key/value storage that outlives a single process run.
pub trait Store {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError>;
    fn remove(&mut self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Keeps every key in one pretty printed JSON object on disk, rewritten on
/// each change.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let contents = fs::read_to_string(&path).map_err(|source| StoreError::IO {
            path: path.clone(),
            source,
        })?;
        let entries = serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
            key: path.display().to_string(),
            source,
        })?;

        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StoreError> {
        let io_error = |source: std::io::Error| StoreError::IO {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io_error)?;
        }
        let contents = serde_json::to_string_pretty(&self.entries).map_err(|source| StoreError::Encode {
            key: self.path.display().to_string(),
            source,
        })?;
        fs::write(&self.path, contents).map_err(io_error)
    }
}

impl Store for FileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        self.save()
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        if self.entries.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        store.set(LAST_EXPRESSION, "x = 1".to_string()).unwrap();
        assert_eq!(store.get(LAST_EXPRESSION).as_deref(), Some("x = 1"));
        store.remove(LAST_EXPRESSION).unwrap();
        assert_eq!(store.get(LAST_EXPRESSION), None);
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut store = FileStore::open(&path).unwrap();
        store.set(SYMBOL_TABLE, r#"{"x":3.0}"#.to_string()).unwrap();
        store.set(LAST_EXPRESSION, "x = 3".to_string()).unwrap();
        assert!(path.exists());

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(SYMBOL_TABLE).as_deref(), Some(r#"{"x":3.0}"#));
        assert_eq!(reopened.get(LAST_EXPRESSION).as_deref(), Some("x = 3"));
    }

    #[test]
    fn test_file_store_remove_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");

        let mut store = FileStore::open(&path).unwrap();
        store.set(LAST_GENERATED_TREE, "http://host/tree.png".to_string()).unwrap();
        store.remove(LAST_GENERATED_TREE).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get(LAST_GENERATED_TREE), None);
    }

    #[test]
    fn test_file_store_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "not json").unwrap();

        assert!(matches!(FileStore::open(&path), Err(StoreError::Corrupt { .. })));
    }
}
