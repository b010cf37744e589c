//! Filesystem-backed object store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use super::{validate_key, ObjectStore, StorageError};

/// Stores each object as a file below a root directory.
///
/// Media types are not persisted; whatever serves the directory is expected to
/// infer them from the extension kept in the key.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename so readers never see a partial file
        let mut tmp = path.clone().into_os_string();
        tmp.push(".partial");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn creation_time(&self, key: &str) -> Option<DateTime<Utc>> {
        let path = self.path_for(key).ok()?;
        let metadata = tokio::fs::metadata(&path).await.ok()?;
        metadata.modified().ok().map(DateTime::<Utc>::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_creation_time() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path()).unwrap();

        assert!(store.creation_time("42/a.css").await.is_none());

        let before = Utc::now() - chrono::Duration::seconds(5);
        store
            .put("42/a.css", b".a{}".to_vec(), Some("text/css"))
            .await
            .unwrap();

        let created = store.creation_time("42/a.css").await.unwrap();
        assert!(created >= before);
        assert_eq!(std::fs::read(dir.path().join("42/a.css")).unwrap(), b".a{}");
        assert!(!dir.path().join("42/a.css.partial").exists());
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path()).unwrap();

        store.put("js/x.js", b"one".to_vec(), None).await.unwrap();
        store.put("js/x.js", b"two".to_vec(), None).await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("js/x.js")).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = FsStore::new(dir.path().join("root")).unwrap();

        let err = store.put("../outside", b"x".to_vec(), None).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
        assert!(store.creation_time("../outside").await.is_none());
        assert!(!dir.path().join("outside").exists());
    }
}
