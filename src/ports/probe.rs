use crate::domain::metadata::MediaMetadata;
use crate::error::PipelineResult;
use async_trait::async_trait;

/// Reads container and track metadata without downloading the source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProbePort: Send + Sync {
    /// Container duration in seconds
    async fn duration(&self, url: &str) -> PipelineResult<f64>;

    /// Video and audio track facts. Fails when the source has no video track.
    async fn tracks(&self, url: &str) -> PipelineResult<MediaMetadata>;
}
