//! Filesystem-backed blob store.
//!
//! Each blob is a single file named after its key. Writes go through a
//! temporary file and a rename so a crashed upload never leaves a readable
//! partial blob behind.

use super::{valid_key, BlobStore};
use crate::error::{Result, SkrivError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// Blob store backed by a local directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local blob store rooted at the given directory.
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root)
            .map_err(|e| SkrivError::StorageUnavailable(format!("{}: {}", root.display(), e)))?;

        info!("Initialized local blob store at {:?}", root);

        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn blob_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.bin", key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        let final_path = self.blob_path(&key);
        let tmp_path = self.root.join(format!("{}.tmp", key));

        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| SkrivError::StorageUnavailable(format!("blob write failed: {}", e)))?;

        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(SkrivError::StorageUnavailable(format!(
                "blob rename failed: {}",
                e
            )));
        }

        debug!("Stored blob {} ({} bytes)", key, bytes.len());
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        if !valid_key(key) {
            return Err(SkrivError::NotFound(format!("blob {}", key)));
        }

        match tokio::fs::read(self.blob_path(key)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SkrivError::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(SkrivError::StorageUnavailable(format!(
                "blob read failed: {}",
                e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if !valid_key(key) {
            return Err(SkrivError::NotFound(format!("blob {}", key)));
        }

        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => {
                debug!("Deleted blob {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SkrivError::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(SkrivError::StorageUnavailable(format!(
                "blob delete failed: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        let key = store.put(b"some media bytes").await.unwrap();
        let bytes = store.get(&key).await.unwrap();
        assert_eq!(bytes, b"some media bytes");

        store.delete(&key).await.unwrap();
        assert!(matches!(
            store.get(&key).await,
            Err(SkrivError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_unknown_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        let result = store.get(&Uuid::new_v4().to_string()).await;
        assert!(matches!(result, Err(SkrivError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.get("../outside").await,
            Err(SkrivError::NotFound(_))
        ));
        assert!(matches!(
            store.delete("a/b").await,
            Err(SkrivError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_no_tmp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();

        store.put(b"payload").await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
