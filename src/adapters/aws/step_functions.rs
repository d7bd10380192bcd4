use async_trait::async_trait;
use aws_sdk_sfn::Client;
use tracing::info;

use crate::domain::stages::SplitInput;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::workflow::WorkflowPort;

/// Starts executions of the deployed state machine.
#[derive(Clone)]
pub struct StepFunctionsWorkflow {
    client: Client,
    state_machine_arn: String,
}

impl StepFunctionsWorkflow {
    pub fn new(client: Client, state_machine_arn: String) -> Self {
        Self {
            client,
            state_machine_arn,
        }
    }
}

#[async_trait]
impl WorkflowPort for StepFunctionsWorkflow {
    async fn start_execution(&self, input: &SplitInput) -> PipelineResult<String> {
        let payload = serde_json::to_string(input)?;
        let resp = self
            .client
            .start_execution()
            .state_machine_arn(&self.state_machine_arn)
            .input(payload)
            .send()
            .await
            .map_err(|e| PipelineError::tool("stepfunctions", e.to_string()))?;

        let arn = resp.execution_arn().to_string();
        info!(execution = %arn, bucket = %input.bucket, key = %input.key, "Started execution");
        Ok(arn)
    }
}
