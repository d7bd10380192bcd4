//! Per-segment stage: build one transcode job per settings template and submit it.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::domain::asset::{file_stem, EncodedPart};
use crate::domain::jobs::{JobBuilder, JobTemplate};
use crate::domain::metadata::ProbedMetadata;
use crate::domain::stages::{EncodeInput, EncodeOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::probe::ProbePort;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::TranscoderPort;

pub struct EncodeService<S, P, T> {
    storage: S,
    probe: P,
    transcoder: T,
    config: Arc<PipelineConfig>,
}

impl<S, P, T> EncodeService<S, P, T>
where
    S: StoragePort,
    P: ProbePort,
    T: TranscoderPort,
{
    pub fn new(storage: S, probe: P, transcoder: T, config: Arc<PipelineConfig>) -> Self {
        Self {
            storage,
            probe,
            transcoder,
            config,
        }
    }

    pub async fn encode(&self, input: &EncodeInput) -> PipelineResult<EncodeOutput> {
        let part = &input.part;
        let probed = self.probe_part(&input.bucket, &part.key).await?;
        let templates = self.templates(&input.bucket).await?;

        let builder = JobBuilder::new(
            &self.config.rendition_destination,
            &self.config.thumbnail_destination,
            self.config.scaling,
            &self.config.application,
        );
        // Build everything first so a bad template submits nothing.
        let specs = templates
            .iter()
            .map(|template| builder.build(&input.bucket, part, template, &probed))
            .collect::<PipelineResult<Vec<_>>>()?;

        let mut job_ids = Vec::with_capacity(specs.len());
        for spec in &specs {
            let handle = self.transcoder.submit(spec).await?;
            info!(
                key = %part.key,
                ordinal = part.ordinal,
                job_id = %handle.id,
                settings = spec.user_metadata.get("settings").map(String::as_str).unwrap_or(""),
                "Submitted transcode job"
            );
            job_ids.push(handle.id);
        }

        let first = specs.into_iter().next().ok_or(PipelineError::NoData)?;
        Ok(EncodeOutput {
            bucket: first.destination_bucket,
            encoded_part: EncodedPart {
                key: first.encoded_key,
                ordinal: part.ordinal,
            },
            original_file_name: first.original_name,
            job_ids,
        })
    }

    /// Track metadata through a presigned URL. Failure degrades to
    /// [`ProbedMetadata::Unavailable`].
    async fn probe_part(&self, bucket: &str, key: &str) -> PipelineResult<ProbedMetadata> {
        let url = self
            .storage
            .presign_get(bucket, key, self.config.presign_expiry)
            .await?;
        Ok(match self.probe.tracks(&url).await {
            Ok(meta) => {
                debug!(key, width = meta.width, height = meta.height, "Probed segment");
                ProbedMetadata::Available(meta)
            }
            Err(e) => {
                warn!(key, error = %e, "Metadata unavailable, using fallback frame");
                ProbedMetadata::unavailable(e.to_string())
            }
        })
    }

    /// Settings templates stored below the templates prefix, or the builtin one.
    async fn templates(&self, bucket: &str) -> PipelineResult<Vec<JobTemplate>> {
        let prefix = &self.config.templates_prefix;
        let keys = self.storage.list_by_prefix(bucket, prefix).await?;

        let mut templates = Vec::new();
        for key in keys.iter().filter(|key| *key != prefix && !key.ends_with('/')) {
            let bytes = self.storage.read_bytes(bucket, key).await?;
            templates.push(JobTemplate::from_slice(file_stem(key), &bytes)?);
        }

        if templates.is_empty() {
            debug!(bucket, prefix = %prefix, "No stored templates, using builtin");
            templates.push(JobTemplate::builtin()?);
        }
        Ok(templates)
    }
}
