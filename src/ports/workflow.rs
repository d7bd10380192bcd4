use crate::domain::stages::SplitInput;
use crate::error::PipelineResult;
use async_trait::async_trait;

/// Starts a run of the whole split / encode / merge workflow.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowPort: Send + Sync {
    /// Returns an identifier for the started execution
    async fn start_execution(&self, input: &SplitInput) -> PipelineResult<String>;
}
