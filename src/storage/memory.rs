//! In-process object store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{validate_key, ObjectStore, StorageError};

/// An object held by `MemoryStore`
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Object store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, StoredObject>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Object stored under `key`
    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Insert an object with an explicit creation time
    pub fn insert(&self, key: impl Into<String>, body: Vec<u8>, created_at: DateTime<Utc>) {
        self.objects.write().insert(
            key.into(),
            StoredObject {
                body,
                content_type: None,
                created_at,
            },
        );
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(str::to_string),
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn creation_time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.objects.read().get(key).map(|o| o.created_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.put("1/a.css", b".a{}".to_vec(), Some("text/css")).await.unwrap();

        let obj = store.get("1/a.css").unwrap();
        assert_eq!(obj.body, b".a{}");
        assert_eq!(obj.content_type.as_deref(), Some("text/css"));
        assert_eq!(store.keys(), vec!["1/a.css".to_string()]);
        assert_eq!(store.creation_time("1/a.css").await, Some(obj.created_at));
    }

    #[tokio::test]
    async fn test_insert_with_explicit_time() {
        let store = MemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(3);
        store.insert("1/old", b"x".to_vec(), old);

        assert_eq!(store.creation_time("1/old").await, Some(old));
        assert!(store.creation_time("1/missing").await.is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_and_refreshes_time() {
        let store = MemoryStore::new();
        let old = Utc::now() - chrono::Duration::days(3);
        store.insert("1/a", b"old".to_vec(), old);

        store.put("1/a", b"new".to_vec(), None).await.unwrap();

        let obj = store.get("1/a").unwrap();
        assert_eq!(obj.body, b"new");
        assert!(obj.created_at > old);
        assert_eq!(store.len(), 1);
    }
}
