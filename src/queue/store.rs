//! Persistence contract for per-guild queue snapshots.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::track::Track;

/// Serialized form of a queue, written on every mutation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub tracks: Vec<Track>,
    pub previous: Vec<Track>,
}

/// External key/value persistence for queue snapshots.
///
/// The runtime only ever needs these four operations; anything from an
/// in-memory map to a remote key-value store can satisfy them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn get(&self, guild_id: &str) -> Result<Option<QueueSnapshot>>;
    async fn set(&self, guild_id: &str, snapshot: QueueSnapshot) -> Result<()>;
    async fn delete(&self, guild_id: &str) -> Result<()>;
    async fn has(&self, guild_id: &str) -> Result<bool>;
}

/// In-memory store, the default when no external persistence is wired in.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: DashMap<String, QueueSnapshot>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn get(&self, guild_id: &str) -> Result<Option<QueueSnapshot>> {
        Ok(self.data.get(guild_id).map(|entry| entry.clone()))
    }

    async fn set(&self, guild_id: &str, snapshot: QueueSnapshot) -> Result<()> {
        self.data.insert(guild_id.to_string(), snapshot);
        Ok(())
    }

    async fn delete(&self, guild_id: &str) -> Result<()> {
        self.data.remove(guild_id);
        Ok(())
    }

    async fn has(&self, guild_id: &str) -> Result<bool> {
        Ok(self.data.contains_key(guild_id))
    }
}

/// String-based backend for remote key-value stores (Redis and friends).
///
/// Kept deliberately tiny so host applications can adapt whatever client they
/// already have.
#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn del(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// [`QueueStore`] adapter over any [`KeyValueBackend`], serializing snapshots
/// as JSON under a prefixed key.
pub struct KvStoreAdapter<B> {
    backend: B,
    key_prefix: String,
}

impl<B: KeyValueBackend> KvStoreAdapter<B> {
    pub fn new(backend: B) -> Self {
        Self::with_prefix(backend, "wavelink:queue:")
    }

    pub fn with_prefix(backend: B, key_prefix: impl Into<String>) -> Self {
        Self {
            backend,
            key_prefix: key_prefix.into(),
        }
    }

    fn key(&self, guild_id: &str) -> String {
        format!("{}{}", self.key_prefix, guild_id)
    }
}

#[async_trait]
impl<B: KeyValueBackend> QueueStore for KvStoreAdapter<B> {
    async fn get(&self, guild_id: &str) -> Result<Option<QueueSnapshot>> {
        match self.backend.get(&self.key(guild_id)).await? {
            Some(raw) => {
                let snapshot = serde_json::from_str(&raw)
                    .map_err(|e| Error::Store(format!("corrupt snapshot: {e}")))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, guild_id: &str, snapshot: QueueSnapshot) -> Result<()> {
        let raw = serde_json::to_string(&snapshot)
            .map_err(|e| Error::Store(format!("serialize snapshot: {e}")))?;
        self.backend.set(&self.key(guild_id), raw).await
    }

    async fn delete(&self, guild_id: &str) -> Result<()> {
        self.backend.del(&self.key(guild_id)).await
    }

    async fn has(&self, guild_id: &str) -> Result<bool> {
        self.backend.exists(&self.key(guild_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::test_support::track;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("1").await.unwrap().is_none());

        let snapshot = QueueSnapshot {
            current: Some(track("a", "A", "Artist")),
            tracks: vec![track("b", "B", "Artist")],
            previous: Vec::new(),
        };
        store.set("1", snapshot).await.unwrap();

        assert!(store.has("1").await.unwrap());
        let loaded = store.get("1").await.unwrap().unwrap();
        assert_eq!(loaded.tracks.len(), 1);
        assert_eq!(loaded.current.unwrap().identifier(), "a");

        store.delete("1").await.unwrap();
        assert!(!store.has("1").await.unwrap());
    }

    #[derive(Default)]
    struct MapBackend {
        data: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl KeyValueBackend for MapBackend {
        async fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.data.lock().get(key).cloned())
        }

        async fn set(&self, key: &str, value: String) -> Result<()> {
            self.data.lock().insert(key.to_string(), value);
            Ok(())
        }

        async fn del(&self, key: &str) -> Result<()> {
            self.data.lock().remove(key);
            Ok(())
        }

        async fn exists(&self, key: &str) -> Result<bool> {
            Ok(self.data.lock().contains_key(key))
        }
    }

    #[tokio::test]
    async fn test_kv_adapter_prefixes_keys() {
        let adapter = KvStoreAdapter::new(MapBackend::default());
        adapter
            .set("42", QueueSnapshot::default())
            .await
            .unwrap();

        assert!(adapter
            .backend
            .data
            .lock()
            .contains_key("wavelink:queue:42"));
        assert!(adapter.has("42").await.unwrap());
        assert!(adapter.get("42").await.unwrap().is_some());

        adapter.delete("42").await.unwrap();
        assert!(!adapter.has("42").await.unwrap());
    }

    #[tokio::test]
    async fn test_kv_adapter_reports_corrupt_snapshots() {
        let backend = MapBackend::default();
        backend
            .data
            .lock()
            .insert("wavelink:queue:9".to_string(), "not json".to_string());
        let adapter = KvStoreAdapter::new(backend);

        assert!(matches!(
            adapter.get("9").await,
            Err(Error::Store(_))
        ));
    }
}
