use crate::error::{StorageError, StorageResult};
use crate::ports::storage::{ObjectMeta, StoragePort};
use async_trait::async_trait;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Object store over a local directory: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsAdapter {
    root: PathBuf,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_path(&self, bucket: &str) -> StorageResult<PathBuf> {
        if !key_is_valid(bucket) || bucket.contains('/') {
            return Err(StorageError::InvalidKey(bucket.to_string()));
        }
        Ok(self.root.join(bucket))
    }

    /// Filesystem path of `bucket/key`, refusing keys that escape the bucket.
    pub fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        if !key_is_valid(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.bucket_path(bucket)?.join(key))
    }
}

const STAGING_SUFFIX: &str = ".partial";

/// Hidden sibling of `target` an upload is written to before it is renamed.
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}{}", name, Uuid::new_v4(), STAGING_SUFFIX))
}

fn is_staging(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map_or(false, |name| name.starts_with('.') && name.ends_with(STAGING_SUFFIX))
}

fn key_is_valid(key: &str) -> bool {
    !key.is_empty()
        && Path::new(key)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

#[async_trait]
impl StoragePort for FsAdapter {
    async fn download(&self, bucket: &str, key: &str, local_path: &Path) -> StorageResult<()> {
        let source = self.object_path(bucket, key)?;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&source, local_path)
            .await
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => StorageError::not_found(bucket, key),
                _ => StorageError::DownloadFailed(format!("{}/{}: {}", bucket, key, e)),
            })?;
        Ok(())
    }

    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> StorageResult<()> {
        let target = self.object_path(bucket, key)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Readers only ever see the complete object: copy beside the target,
        // then rename over it.
        let staging = staging_path(&target);
        let published = match tokio::fs::copy(local_path, &staging).await {
            Ok(_) => tokio::fs::rename(&staging, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = published {
            if let Err(cleanup) = tokio::fs::remove_file(&staging).await {
                debug!(path = %staging.display(), error = %cleanup, "No staging file to remove");
            }
            return Err(StorageError::UploadFailed(format!("{}/{}: {}", bucket, key, e)));
        }
        debug!(bucket, key, "Stored object");
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(ObjectMeta { size: meta.len() })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_by_prefix(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let bucket_dir = self.bucket_path(bucket)?;
        let mut keys = Vec::new();
        let mut pending = vec![bucket_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::ListFailed(e.to_string())),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if is_staging(&path) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&bucket_dir) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|component| component.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn read_bytes(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => StorageError::not_found(bucket, key),
            _ => StorageError::DownloadFailed(format!("{}/{}: {}", bucket, key, e)),
        })
    }

    /// Local tools read the file in place, so the path is the URL.
    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        _expires_in: Duration,
    ) -> StorageResult<String> {
        let path = self.object_path(bucket, key)?;
        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, FsAdapter) {
        let dir = tempdir().unwrap();
        let adapter = FsAdapter::new(dir.path());
        (dir, adapter)
    }

    #[tokio::test]
    async fn test_upload_then_head_and_download() {
        let (dir, fs_store) = store();
        let local = dir.path().join("local.bin");
        fs::write(&local, b"hello").unwrap();

        fs_store.upload(&local, "media", "input/a.mp4").await.unwrap();
        assert!(dir.path().join("media/input/a.mp4").exists());

        let meta = fs_store.head_object("media", "input/a.mp4").await.unwrap();
        assert_eq!(meta, Some(ObjectMeta { size: 5 }));

        let copy = dir.path().join("out/copy.bin");
        fs_store.download("media", "input/a.mp4", &copy).await.unwrap();
        assert_eq!(fs::read(copy).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_missing_object() {
        let (dir, fs_store) = store();
        assert_eq!(fs_store.head_object("media", "nope.mp4").await.unwrap(), None);

        let err = fs_store
            .download("media", "nope.mp4", &dir.path().join("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_is_recursive_and_sorted() {
        let (dir, fs_store) = store();
        for key in ["jobs/b.json", "jobs/a.json", "jobs/nested/c.json", "input/x.mp4"] {
            let path = dir.path().join("media").join(key);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, b"{}").unwrap();
        }

        let keys = fs_store.list_by_prefix("media", "jobs/").await.unwrap();
        assert_eq!(keys, vec!["jobs/a.json", "jobs/b.json", "jobs/nested/c.json"]);
        assert!(fs_store.list_by_prefix("other", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, fs_store) = store();
        assert!(matches!(
            fs_store.head_object("media", "../secret").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            fs_store.read_bytes("media", "/etc/passwd").await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_object_is_invisible_until_fully_written() {
        let (dir, fs_store) = store();
        let local = dir.path().join("big.bin");
        let size: u64 = 64 << 20;
        fs::write(&local, vec![7u8; size as usize]).unwrap();

        let writer = fs_store.clone();
        let source = local.clone();
        let upload = tokio::spawn(async move {
            writer
                .upload(&source, "media", "encoded/movie/part000_movie.mp4")
                .await
        });

        let first_seen = loop {
            let meta = fs_store
                .head_object("media", "encoded/movie/part000_movie.mp4")
                .await
                .unwrap();
            if let Some(meta) = meta {
                break meta;
            }
            assert!(
                fs_store
                    .list_by_prefix("media", "encoded/")
                    .await
                    .unwrap()
                    .is_empty(),
                "in-flight upload must not be listed"
            );
            tokio::task::yield_now().await;
        };
        assert_eq!(first_seen.size, size);

        upload.await.unwrap().unwrap();
        let listed = fs_store.list_by_prefix("media", "encoded/").await.unwrap();
        assert_eq!(listed, vec!["encoded/movie/part000_movie.mp4"]);
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_nothing_behind() {
        let (dir, fs_store) = store();
        let err = fs_store
            .upload(&dir.path().join("missing.bin"), "media", "encoded/a.mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::UploadFailed(_)));
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("media/encoded"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_staging_names_are_hidden_siblings() {
        let target = Path::new("/store/media/encoded/a.mp4");
        let staging = staging_path(target);
        assert_eq!(staging.parent(), target.parent());
        assert!(is_staging(&staging));
        assert!(!is_staging(target));
    }

    #[test]
    fn test_valid_key() {
        assert!(key_is_valid("input/movie.mp4"));
        assert!(!key_is_valid("../movie.mp4"));
        assert!(!key_is_valid("/root/movie.mp4"));
        assert!(!key_is_valid(""));
    }
}
