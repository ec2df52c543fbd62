//! In-process store

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::trace;

use super::{join_path, KvStore};
use crate::types::Payload;
use crate::Result;

/// Store kept in memory, shared between clones
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<Mutex<BTreeMap<String, Payload>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        self.records.lock().keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn read(&self, path: &str) -> Result<Option<Payload>> {
        let path = join_path(&[path]);
        Ok(self.records.lock().get(&path).cloned())
    }

    async fn write(&self, path: &str, data: Payload) -> Result<()> {
        let path = join_path(&[path]);
        trace!("memory store write {}", path);
        self.records.lock().insert(path, data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = join_path(&[path]);
        trace!("memory store delete {}", path);
        self.records.lock().remove(&path);
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<String>> {
        let prefix = format!("{}/", join_path(&[path]));
        let records = self.records.lock();

        let children: BTreeSet<String> = records
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|rest| rest.split('/').next())
            .filter(|child| !child.is_empty())
            .map(str::to_string)
            .collect();

        Ok(children.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(v: serde_json::Value) -> Payload {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_read_write_delete() {
        let store = MemoryStore::new();
        assert!(store.read("a/b").await.unwrap().is_none());

        store.write("a/b", payload(json!({"x": 1}))).await.unwrap();
        assert_eq!(store.read("/a/b/").await.unwrap().unwrap()["x"], 1);

        store.delete("a/b").await.unwrap();
        assert!(store.read("a/b").await.unwrap().is_none());

        // Deleting again is fine
        store.delete("a/b").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_list_immediate_children() {
        let store = MemoryStore::new();
        store.write("m/nodes/a", payload(json!({}))).await.unwrap();
        store.write("m/nodes/b", payload(json!({}))).await.unwrap();
        store.write("m/nodes/b/extra", payload(json!({}))).await.unwrap();
        store.write("m/mp", payload(json!({}))).await.unwrap();
        store.write("m/nodesx/c", payload(json!({}))).await.unwrap();

        assert_eq!(store.list("m/nodes").await.unwrap(), vec!["a", "b"]);
        assert_eq!(store.list("m").await.unwrap(), vec!["mp", "nodes", "nodesx"]);
        assert!(store.list("other").await.unwrap().is_empty());
    }
}
