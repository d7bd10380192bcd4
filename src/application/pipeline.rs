//! In-process workflow: split, encode every segment concurrently, then merge.
//!
//! This plays the orchestrator's role in local mode. Stage records flow
//! between the services exactly as they would between remote stage runs.

use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::encoder::EncodeService;
use super::merger::MergeService;
use super::splitter::SegmenterService;
use crate::config::PipelineConfig;
use crate::domain::stages::{EncodeInput, EncodeOutput, MergeInput, MergeOutput, SplitInput};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::probe::ProbePort;
use crate::ports::remux::RemuxPort;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::TranscoderPort;

pub struct Pipeline<S, P, R, T> {
    segmenter: SegmenterService<S, P, R>,
    encoder: EncodeService<S, P, T>,
    merger: MergeService<S, R>,
}

impl<S, P, R, T> Pipeline<S, P, R, T>
where
    S: StoragePort + Clone,
    P: ProbePort + Clone,
    R: RemuxPort + Clone,
    T: TranscoderPort,
{
    pub fn new(storage: S, probe: P, remux: R, transcoder: T, config: Arc<PipelineConfig>) -> Self {
        Self {
            segmenter: SegmenterService::new(
                storage.clone(),
                probe.clone(),
                remux.clone(),
                config.clone(),
            ),
            encoder: EncodeService::new(storage.clone(), probe, transcoder, config.clone()),
            merger: MergeService::new(storage, remux, config),
        }
    }

    /// Abort a run that is waiting on encoded parts.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.merger = self.merger.with_cancellation(cancel);
        self
    }

    pub fn segmenter(&self) -> &SegmenterService<S, P, R> {
        &self.segmenter
    }

    pub fn encoder(&self) -> &EncodeService<S, P, T> {
        &self.encoder
    }

    pub fn merger(&self) -> &MergeService<S, R> {
        &self.merger
    }

    /// Run every stage for one source.
    pub async fn run(&self, input: &SplitInput) -> PipelineResult<MergeOutput> {
        let split = self.segmenter.split(input).await?;
        info!(key = %input.key, segments = split.parts.len(), "Fanning out encode stage");

        let encode_inputs: Vec<EncodeInput> = split
            .parts
            .iter()
            .map(|part| EncodeInput {
                bucket: split.bucket.clone(),
                part: part.clone(),
            })
            .collect();
        let encoded = join_all(
            encode_inputs
                .iter()
                .map(|encode_input| self.encoder.encode(encode_input)),
        )
        .await
        .into_iter()
        .collect::<PipelineResult<Vec<EncodeOutput>>>()?;

        let merge_input = merge_input_from(encoded)?;
        self.merger.merge(&merge_input).await
    }
}

/// Collect per-segment results into the merge record.
pub fn merge_input_from(encoded: Vec<EncodeOutput>) -> PipelineResult<MergeInput> {
    let first = encoded.first().ok_or(PipelineError::NoData)?;
    let bucket = first.bucket.clone();
    let original_file_name = first.original_file_name.clone();
    Ok(MergeInput {
        bucket,
        original_file_name,
        encoded_parts: encoded
            .into_iter()
            .map(|output| output.encoded_part)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::asset::EncodedPart;

    fn output(ordinal: u32) -> EncodeOutput {
        EncodeOutput {
            bucket: "media".into(),
            encoded_part: EncodedPart {
                key: format!("encoded/movie/part{:03}_movie.mp4", ordinal),
                ordinal,
            },
            original_file_name: "movie".into(),
            job_ids: vec![format!("job-{}", ordinal)],
        }
    }

    #[test]
    fn test_merge_input_keeps_every_part() {
        let input = merge_input_from(vec![output(1), output(0)]).unwrap();
        assert_eq!(input.bucket, "media");
        assert_eq!(input.original_file_name, "movie");
        let ordinals: Vec<u32> = input.encoded_parts.iter().map(|part| part.ordinal).collect();
        assert_eq!(ordinals, vec![1, 0]);
    }

    #[test]
    fn test_merge_input_needs_results() {
        assert!(matches!(
            merge_input_from(vec![]),
            Err(PipelineError::NoData)
        ));
    }
}
