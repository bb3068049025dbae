//! In-memory blob store implementation.
//!
//! Useful for testing and throwaway deployments.

use super::{valid_key, BlobStore};
use crate::error::{Result, SkrivError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// In-memory blob store.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Create a new in-memory blob store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<String> {
        let key = Uuid::new_v4().to_string();
        let mut blobs = self.blobs.write().unwrap();
        blobs.insert(key.clone(), bytes.to_vec());
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        if !valid_key(key) {
            return Err(SkrivError::NotFound(format!("blob {}", key)));
        }
        let blobs = self.blobs.read().unwrap();
        blobs
            .get(key)
            .cloned()
            .ok_or_else(|| SkrivError::NotFound(format!("blob {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.write().unwrap();
        blobs
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| SkrivError::NotFound(format!("blob {}", key)))
    }
}
