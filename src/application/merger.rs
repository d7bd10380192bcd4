//! Merge stage: wait for every encoded part, then join them losslessly in ordinal order.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::completion::CompletionGate;
use crate::config::PipelineConfig;
use crate::domain::asset::{file_name, merged_key, object_uri, EncodedPart};
use crate::domain::stages::{MergeInput, MergeOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::remux::RemuxPort;
use crate::ports::storage::StoragePort;
use crate::workspace::Workspace;

pub struct MergeService<S, R> {
    storage: S,
    remux: R,
    config: Arc<PipelineConfig>,
    cancel: CancellationToken,
}

impl<S, R> MergeService<S, R>
where
    S: StoragePort,
    R: RemuxPort,
{
    pub fn new(storage: S, remux: R, config: Arc<PipelineConfig>) -> Self {
        Self {
            storage,
            remux,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the completion wait when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn merge(&self, input: &MergeInput) -> PipelineResult<MergeOutput> {
        let keys = ordered_keys(&input.encoded_parts)?;

        CompletionGate::new(&self.storage, self.config.poll)
            .await_all(&input.bucket, &keys, &self.cancel)
            .await?;

        let output_key = merged_key(&self.config.merged_destination, &input.original_file_name);
        let output_file = self.concat(&input.bucket, &keys, &output_key).await?;
        Ok(MergeOutput {
            bucket: input.bucket.clone(),
            output_file,
        })
    }

    /// Join the objects at `ordered_keys`, in that order, into `output_key`.
    ///
    /// Returns the `s3://` location of the result.
    pub async fn concat(
        &self,
        bucket: &str,
        ordered_keys: &[String],
        output_key: &str,
    ) -> PipelineResult<String> {
        if ordered_keys.is_empty() {
            return Err(PipelineError::NoData);
        }

        let workspace = Workspace::new(self.config.work_dir.as_deref())?;
        self.concat_in(&workspace, bucket, ordered_keys, output_key)
            .await?;
        workspace.close()?;

        let location = object_uri(bucket, output_key);
        info!(parts = ordered_keys.len(), output = %location, "Merged parts");
        Ok(location)
    }

    async fn concat_in(
        &self,
        workspace: &Workspace,
        bucket: &str,
        ordered_keys: &[String],
        output_key: &str,
    ) -> PipelineResult<()> {
        let mut local_parts: Vec<PathBuf> = Vec::with_capacity(ordered_keys.len());
        for (index, key) in ordered_keys.iter().enumerate() {
            let local = workspace.path(&format!("{:03}_{}", index, file_name(key)));
            self.storage.download(bucket, key, &local).await?;
            debug!(bucket, key, index, "Downloaded part");
            local_parts.push(local);
        }

        let manifest = workspace.path("manifest.txt");
        tokio::fs::write(&manifest, concat_manifest(&local_parts)).await?;

        let output = workspace.path(file_name(output_key));
        self.remux.concat(&manifest, &output).await?;
        self.storage.upload(&output, bucket, output_key).await?;
        Ok(())
    }
}

/// Keys of `parts` ordered by ordinal. Duplicate ordinals are rejected.
fn ordered_keys(parts: &[EncodedPart]) -> PipelineResult<Vec<String>> {
    if parts.is_empty() {
        return Err(PipelineError::NoData);
    }
    let mut by_ordinal = BTreeMap::new();
    for part in parts {
        if by_ordinal.insert(part.ordinal, part.key.clone()).is_some() {
            return Err(PipelineError::DuplicateOrdinal(part.ordinal));
        }
    }
    Ok(by_ordinal.into_values().collect())
}

/// Concat demuxer manifest: one `file '<path>'` line per part.
fn concat_manifest(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| {
            let escaped = path.display().to_string().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::domain::stages::StageResult;
    use crate::ports::remux::MockRemuxPort;
    use crate::ports::storage::{MockStoragePort, ObjectMeta};
    use std::path::Path;
    use std::sync::Mutex;

    fn part(ordinal: u32) -> EncodedPart {
        EncodedPart {
            key: format!("encoded/movie/part{:03}_movie.mp4", ordinal),
            ordinal,
        }
    }

    fn merge_input(parts: Vec<EncodedPart>) -> MergeInput {
        MergeInput {
            bucket: "media".into(),
            original_file_name: "movie".into(),
            encoded_parts: parts,
        }
    }

    /// Storage where every part exists and holds its own key as content.
    fn storage_capturing(uploaded: Arc<Mutex<Option<(String, Vec<u8>)>>>) -> MockStoragePort {
        let mut storage = MockStoragePort::new();
        storage
            .expect_head_object()
            .returning(|_, _| Ok(Some(ObjectMeta { size: 1 })));
        storage.expect_download().returning(|_, key, path| {
            std::fs::write(path, key.as_bytes())?;
            Ok(())
        });
        storage.expect_upload().returning(move |path, _, key| {
            let bytes = std::fs::read(path)?;
            *uploaded.lock().unwrap() = Some((key.to_string(), bytes));
            Ok(())
        });
        storage
    }

    /// Concatenates the manifest's files byte for byte.
    fn remux_joining() -> MockRemuxPort {
        let mut remux = MockRemuxPort::new();
        remux.expect_concat().returning(|manifest: &Path, output: &Path| {
            let listing = std::fs::read_to_string(manifest)?;
            let mut joined = Vec::new();
            for line in listing.lines() {
                let path = line
                    .strip_prefix("file '")
                    .and_then(|rest| rest.strip_suffix('\''))
                    .unwrap();
                joined.extend(std::fs::read(path)?);
            }
            std::fs::write(output, joined)?;
            Ok(())
        });
        remux
    }

    #[tokio::test]
    async fn test_parts_joined_in_ordinal_order() {
        let uploaded = Arc::new(Mutex::new(None));
        let service = MergeService::new(
            storage_capturing(uploaded.clone()),
            remux_joining(),
            Arc::new(test_config()),
        );

        let out = service
            .merge(&merge_input(vec![part(2), part(0), part(1)]))
            .await
            .unwrap();

        assert_eq!(out.bucket, "media");
        assert_eq!(
            out.output_file,
            "s3://media/output/movie/Default/MP4/movie.mp4"
        );
        let (key, bytes) = uploaded.lock().unwrap().clone().unwrap();
        assert_eq!(key, "output/movie/Default/MP4/movie.mp4");
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "encoded/movie/part000_movie.mp4encoded/movie/part001_movie.mp4encoded/movie/part002_movie.mp4"
        );
    }

    #[tokio::test]
    async fn test_empty_parts_is_no_data_without_download() {
        let mut storage = MockStoragePort::new();
        storage.expect_head_object().never();
        storage.expect_download().never();
        let mut remux = MockRemuxPort::new();
        remux.expect_concat().never();

        let service = MergeService::new(storage, remux, Arc::new(test_config()));
        let result: StageResult<MergeOutput> = service.merge(&merge_input(vec![])).await.into();
        assert_eq!(result.failure().unwrap().reason, "no data");
    }

    #[tokio::test]
    async fn test_duplicate_ordinal_rejected() {
        let mut storage = MockStoragePort::new();
        storage.expect_download().never();
        let service = MergeService::new(storage, MockRemuxPort::new(), Arc::new(test_config()));

        let err = service
            .merge(&merge_input(vec![part(0), part(1), part(1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateOrdinal(1)));
    }

    #[tokio::test]
    async fn test_concat_failure_carries_diagnostic() {
        let mut storage = MockStoragePort::new();
        storage
            .expect_head_object()
            .returning(|_, _| Ok(Some(ObjectMeta { size: 1 })));
        storage.expect_download().returning(|_, _, path| {
            std::fs::write(path, b"x")?;
            Ok(())
        });
        storage.expect_upload().never();

        let mut remux = MockRemuxPort::new();
        remux
            .expect_concat()
            .returning(|_, _| Err(PipelineError::tool("ffmpeg", "Impossible to open 'x'")));

        let service = MergeService::new(storage, remux, Arc::new(test_config()));
        let result: StageResult<MergeOutput> =
            service.merge(&merge_input(vec![part(0)])).await.into();

        let failure = result.failure().unwrap();
        assert_eq!(failure.reason, "tool failed");
        assert!(failure.message.contains("Impossible to open"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_part_times_out_before_download() {
        let mut storage = MockStoragePort::new();
        storage.expect_head_object().returning(|_, key| {
            if key.contains("part001") {
                Ok(None)
            } else {
                Ok(Some(ObjectMeta { size: 1 }))
            }
        });
        storage.expect_download().never();

        let service = MergeService::new(storage, MockRemuxPort::new(), Arc::new(test_config()));
        let err = service
            .merge(&merge_input(vec![part(0), part(1)]))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "incomplete parts");
    }

    #[tokio::test]
    async fn test_cancelled_merge_stops_waiting() {
        let mut storage = MockStoragePort::new();
        storage.expect_head_object().returning(|_, _| Ok(None));
        storage.expect_download().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let service = MergeService::new(storage, MockRemuxPort::new(), Arc::new(test_config()))
            .with_cancellation(cancel);

        let err = service
            .merge(&merge_input(vec![part(0)]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }

    #[test]
    fn test_manifest_quotes_paths() {
        let manifest = concat_manifest(&[
            PathBuf::from("/tmp/w/000_a.mp4"),
            PathBuf::from("/tmp/w/001_it's.mp4"),
        ]);
        assert_eq!(
            manifest,
            "file '/tmp/w/000_a.mp4'\nfile '/tmp/w/001_it'\\''s.mp4'\n"
        );
    }
}
