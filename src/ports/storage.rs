use crate::error::StorageResult;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Metadata returned by a HEAD request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMeta {
    pub size: u64,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Download an object to a local path
    async fn download(&self, bucket: &str, key: &str, local_path: &Path) -> StorageResult<()>;

    /// Upload a file from a local path to storage
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> StorageResult<()>;

    /// Object metadata, or `None` when the key does not exist
    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>>;

    /// Keys below `prefix`, in lexicographic order
    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;

    /// Read a small object fully into memory
    async fn read_bytes(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// A time-limited URL other tools can read the object through
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;
}
