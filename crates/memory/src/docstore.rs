//! Namespaced key-value document store.
//!
//! Namespaces are string tuples (`["session_abc", "memories",
//! "simplemem_atom"]`); values are JSON documents.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use axon_domain::{Error, Result};

/// Namespaced KV storage for memory metadata and similar documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Prepare backing storage (tables, directories). Idempotent.
    async fn setup(&self) -> Result<()>;

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Value>>;

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()>;

    async fn delete(&self, namespace: &[String], key: &str) -> Result<()>;
}

fn namespace_key(namespace: &[String]) -> String {
    namespace.join("/")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct InMemoryDocumentStore {
    data: RwLock<HashMap<String, HashMap<String, Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Value>> {
        let data = self.data.read();
        Ok(data
            .get(&namespace_key(namespace))
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        let mut data = self.data.write();
        data.entry(namespace_key(namespace))
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<()> {
        let mut data = self.data.write();
        if let Some(ns) = data.get_mut(&namespace_key(namespace)) {
            ns.remove(key);
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSON file store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One JSON file per namespace under a root directory. Unreadable
/// files are treated as absent rather than failing the whole load.
pub struct JsonFileDocumentStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileDocumentStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    fn namespace_path(&self, namespace: &[String]) -> PathBuf {
        let sanitized: Vec<String> = namespace
            .iter()
            .map(|part| {
                part.chars()
                    .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
                    .collect()
            })
            .collect();
        self.root.join(format!("{}.json", sanitized.join("__")))
    }

    fn load(&self, path: &Path) -> HashMap<String, Value> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            Err(_) => HashMap::new(),
        }
    }

    fn store(&self, path: &Path, docs: &HashMap<String, Value>) -> Result<()> {
        let json = serde_json::to_string_pretty(docs)?;
        std::fs::write(path, json).map_err(Error::Io)
    }
}

#[async_trait]
impl DocumentStore for JsonFileDocumentStore {
    async fn setup(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(Error::Io)
    }

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.read();
        let docs = self.load(&self.namespace_path(namespace));
        Ok(docs.get(key).cloned())
    }

    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.write();
        let path = self.namespace_path(namespace);
        let mut docs = self.load(&path);
        docs.insert(key.to_string(), value);
        self.store(&path, &docs)
    }

    async fn delete(&self, namespace: &[String], key: &str) -> Result<()> {
        let _guard = self.lock.write();
        let path = self.namespace_path(namespace);
        let mut docs = self.load(&path);
        if docs.remove(key).is_some() {
            self.store(&path, &docs)?;
        }
        Ok(())
    }
}
