use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{error, info};
use uuid::Uuid;

use crate::application::pipeline::Pipeline;
use crate::domain::stages::SplitInput;
use crate::error::PipelineResult;
use crate::ports::probe::ProbePort;
use crate::ports::remux::RemuxPort;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::TranscoderPort;
use crate::ports::workflow::WorkflowPort;

/// Runs every started execution as a background task in this process.
pub struct InProcessWorkflow<S, P, R, T> {
    pipeline: Arc<Pipeline<S, P, R, T>>,
    runs: TaskTracker,
}

impl<S, P, R, T> Clone for InProcessWorkflow<S, P, R, T> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            runs: self.runs.clone(),
        }
    }
}

impl<S, P, R, T> InProcessWorkflow<S, P, R, T> {
    pub fn new(pipeline: Arc<Pipeline<S, P, R, T>>) -> Self {
        Self {
            pipeline,
            runs: TaskTracker::new(),
        }
    }

    /// Wait for every started execution to finish.
    pub async fn drain(&self) {
        self.runs.close();
        self.runs.wait().await;
    }
}

#[async_trait]
impl<S, P, R, T> WorkflowPort for InProcessWorkflow<S, P, R, T>
where
    S: StoragePort + Clone + 'static,
    P: ProbePort + Clone + 'static,
    R: RemuxPort + Clone + 'static,
    T: TranscoderPort + 'static,
{
    async fn start_execution(&self, input: &SplitInput) -> PipelineResult<String> {
        let execution = Uuid::new_v4().to_string();
        let pipeline = self.pipeline.clone();
        let input = input.clone();
        let id = execution.clone();

        self.runs.spawn(async move {
            match pipeline.run(&input).await {
                Ok(output) => info!(
                    execution = %id,
                    output = %output.output_file,
                    "Execution succeeded"
                ),
                Err(e) => error!(
                    execution = %id,
                    key = %input.key,
                    reason = e.reason(),
                    error = %e,
                    "Execution failed"
                ),
            }
        });

        Ok(execution)
    }
}
