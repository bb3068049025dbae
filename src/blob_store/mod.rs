//! Blob storage abstraction for uploaded media.
//!
//! Provides a trait-based interface for different storage backends. Blobs are
//! immutable byte payloads addressed by an opaque key; jobs reference them by
//! key and never own them.

mod local;
mod memory;

pub use local::LocalBlobStore;
pub use memory::MemoryBlobStore;

use crate::error::Result;
use async_trait::async_trait;

/// Trait for blob store implementations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a payload and return its key.
    async fn put(&self, bytes: &[u8]) -> Result<String>;

    /// Fetch a payload by key.
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    /// Delete a payload by key.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Check that a key looks like one we issued (a UUID string).
///
/// Keys come back from clients indirectly via job records; rejecting anything
/// with path characters keeps the filesystem backend contained.
pub(crate) fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
}
