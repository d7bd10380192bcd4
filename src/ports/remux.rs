use crate::error::PipelineResult;
use async_trait::async_trait;
use std::path::Path;

/// Lossless stream-copy operations on local files.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemuxPort: Send + Sync {
    /// Cut `input` into chunks of `segment_seconds`, written with the printf
    /// style `output_pattern` (`%03d` is the chunk ordinal)
    async fn split(
        &self,
        input: &Path,
        segment_seconds: u64,
        output_pattern: &Path,
    ) -> PipelineResult<()>;

    /// Join the files listed in a concat manifest, in listed order
    async fn concat(&self, manifest: &Path, output: &Path) -> PipelineResult<()>;
}
