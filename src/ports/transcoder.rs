use crate::domain::jobs::TranscodeJobSpec;
use crate::error::PipelineResult;
use async_trait::async_trait;

/// Opaque handle returned by the transcoding engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

/// The external transcoding engine.
///
/// Submission returns as soon as the engine accepted the job; outputs show up
/// in storage later and there is no completion callback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TranscoderPort: Send + Sync {
    async fn submit(&self, job: &TranscodeJobSpec) -> PipelineResult<JobHandle>;
}
