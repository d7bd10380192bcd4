//! Segment stage: decide whether a source is split and cut it when needed.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::domain::asset::{
    file_name, segment_file_ordinal, segment_file_pattern, split_prefix, Segment, SourceAsset,
};
use crate::domain::stages::{SplitInput, SplitOutput};
use crate::error::{PipelineError, PipelineResult, StorageError};
use crate::ports::probe::ProbePort;
use crate::ports::remux::RemuxPort;
use crate::ports::storage::StoragePort;
use crate::workspace::Workspace;

pub struct SegmenterService<S, P, R> {
    storage: S,
    probe: P,
    remux: R,
    config: Arc<PipelineConfig>,
}

impl<S, P, R> SegmenterService<S, P, R>
where
    S: StoragePort,
    P: ProbePort,
    R: RemuxPort,
{
    pub fn new(storage: S, probe: P, remux: R, config: Arc<PipelineConfig>) -> Self {
        Self {
            storage,
            probe,
            remux,
            config,
        }
    }

    /// Returns the ordered segments of the source at `input`.
    pub async fn split(&self, input: &SplitInput) -> PipelineResult<SplitOutput> {
        let meta = self
            .storage
            .head_object(&input.bucket, &input.key)
            .await?
            .ok_or_else(|| StorageError::not_found(&input.bucket, &input.key))?;
        let asset = SourceAsset::new(&input.bucket, &input.key, meta.size);

        if asset.size > self.config.file_size_limit {
            return Err(PipelineError::SizeExceedsLimit {
                size: asset.size,
                limit: self.config.file_size_limit,
            });
        }

        let url = self
            .storage
            .presign_get(&asset.bucket, &asset.key, self.config.presign_expiry)
            .await?;
        let duration = self.probe.duration(&url).await?;
        let asset = asset.with_duration(duration);

        info!(
            bucket = %asset.bucket,
            key = %asset.key,
            size = asset.size,
            duration,
            "Probed source"
        );

        let parts = if asset.needs_split(self.config.split_size_limit, self.config.segment_duration) {
            let workspace = Workspace::new(self.config.work_dir.as_deref())?;
            let parts = self.split_into(&asset, &workspace).await?;
            workspace.close()?;
            parts
        } else {
            info!(key = %asset.key, "Source kept as a single segment");
            vec![asset.as_single_segment()]
        };

        Ok(SplitOutput {
            bucket: asset.bucket,
            parts,
        })
    }

    async fn split_into(
        &self,
        asset: &SourceAsset,
        workspace: &Workspace,
    ) -> PipelineResult<Vec<Segment>> {
        let source_name = file_name(&asset.key);
        let local_source = workspace.path(source_name);
        self.storage
            .download(&asset.bucket, &asset.key, &local_source)
            .await?;

        let chunks_dir = workspace.path("chunks");
        tokio::fs::create_dir_all(&chunks_dir).await?;
        let pattern = chunks_dir.join(segment_file_pattern(source_name));
        self.remux
            .split(&local_source, self.config.segment_duration, &pattern)
            .await?;

        let chunks = collect_chunks(&chunks_dir).await?;
        if chunks.is_empty() {
            return Err(PipelineError::tool("ffmpeg", "split produced no segments"));
        }

        let prefix = split_prefix(&asset.key, &self.config.input_contents_path);
        let mut parts = Vec::with_capacity(chunks.len());
        for (ordinal, path) in chunks {
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .ok_or_else(|| PipelineError::InvalidLocation(path.display().to_string()))?;
            let key = format!("{}{}", prefix, name);
            self.storage.upload(&path, &asset.bucket, &key).await?;
            debug!(bucket = %asset.bucket, key = %key, ordinal, "Uploaded segment");
            parts.push(Segment {
                key,
                ordinal,
                source: asset.key.clone(),
            });
        }

        info!(key = %asset.key, segments = parts.len(), prefix = %prefix, "Split source");
        Ok(parts)
    }
}

/// Segment files in `dir`, ordered by ordinal.
async fn collect_chunks(dir: &Path) -> PipelineResult<Vec<(u32, PathBuf)>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut chunks = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if let Some(ordinal) = name.to_str().and_then(segment_file_ordinal) {
            chunks.push((ordinal, entry.path()));
        }
    }
    chunks.sort_by_key(|(ordinal, _)| *ordinal);
    Ok(chunks)
}
