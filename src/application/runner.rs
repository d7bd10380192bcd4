//! Stage dispatch shared by the binaries: a JSON record in, a
//! [`StageResult`] JSON record out.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use super::pipeline::Pipeline;
use super::trigger::TriggerService;
use crate::domain::stages::{EncodeInput, MergeInput, SplitInput, StageResult, UploadEvent};
use crate::error::PipelineResult;
use crate::ports::probe::ProbePort;
use crate::ports::remux::RemuxPort;
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::TranscoderPort;
use crate::ports::workflow::WorkflowPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Stage {
    Trigger,
    Split,
    Encode,
    Merge,
}

pub struct StageRunner<S, P, R, T, W> {
    pipeline: Arc<Pipeline<S, P, R, T>>,
    trigger: TriggerService<W>,
}

impl<S, P, R, T, W> StageRunner<S, P, R, T, W>
where
    S: StoragePort + Clone,
    P: ProbePort + Clone,
    R: RemuxPort + Clone,
    T: TranscoderPort,
    W: WorkflowPort,
{
    pub fn new(pipeline: Arc<Pipeline<S, P, R, T>>, workflow: W) -> Self {
        Self {
            pipeline,
            trigger: TriggerService::new(workflow),
        }
    }

    /// Run `stage` on the JSON `input`. Stage failures, including an
    /// unreadable input record, come back as a failed result.
    pub async fn dispatch(&self, stage: Stage, input: &[u8]) -> PipelineResult<String> {
        info!(stage = ?stage, "Running stage");
        match stage {
            Stage::Trigger => {
                let result = match parse::<UploadEvent>(input) {
                    Ok(event) => self.trigger.handle(&event).await,
                    Err(e) => Err(e),
                };
                render(result)
            }
            Stage::Split => {
                let result = match parse::<SplitInput>(input) {
                    Ok(input) => self.pipeline.segmenter().split(&input).await,
                    Err(e) => Err(e),
                };
                render(result)
            }
            Stage::Encode => {
                let result = match parse::<EncodeInput>(input) {
                    Ok(input) => self.pipeline.encoder().encode(&input).await,
                    Err(e) => Err(e),
                };
                render(result)
            }
            Stage::Merge => {
                let result = match parse::<MergeInput>(input) {
                    Ok(input) => self.pipeline.merger().merge(&input).await,
                    Err(e) => Err(e),
                };
                render(result)
            }
        }
    }
}

fn parse<I: DeserializeOwned>(input: &[u8]) -> PipelineResult<I> {
    Ok(serde_json::from_slice(input)?)
}

fn render<O: Serialize>(result: PipelineResult<O>) -> PipelineResult<String> {
    Ok(serde_json::to_string(&StageResult::from(result))?)
}

#[cfg(all(test, feature = "local"))]
mod tests {
    use super::*;
    use crate::adapters::local::{FfmpegTools, FfmpegTranscoder, FsAdapter};
    use crate::config::tests::test_config;
    use crate::ports::workflow::MockWorkflowPort;
    use serde_json::Value;
    use tempfile::TempDir;

    type TestRunner = StageRunner<
        FsAdapter,
        FfmpegTools,
        FfmpegTools,
        FfmpegTranscoder<FsAdapter>,
        MockWorkflowPort,
    >;

    fn runner(root: &TempDir, workflow: MockWorkflowPort) -> TestRunner {
        let storage = FsAdapter::new(root.path());
        let tools = FfmpegTools::default();
        let transcoder = FfmpegTranscoder::new(storage.clone(), tools.clone(), None);
        let pipeline = Pipeline::new(
            storage,
            tools.clone(),
            tools,
            transcoder,
            Arc::new(test_config()),
        );
        StageRunner::new(Arc::new(pipeline), workflow)
    }

    fn json(output: &str) -> Value {
        serde_json::from_str(output).unwrap()
    }

    #[tokio::test]
    async fn test_unreadable_input_is_a_failed_stage() {
        let root = TempDir::new().unwrap();
        let runner = runner(&root, MockWorkflowPort::new());
        let output = runner.dispatch(Stage::Split, b"{not json").await.unwrap();
        let value = json(&output);
        assert_eq!(value["status"], "failed");
        assert_eq!(value["reason"], "invalid json");
    }

    #[tokio::test]
    async fn test_trigger_reports_executions() {
        let mut workflow = MockWorkflowPort::new();
        workflow
            .expect_start_execution()
            .times(1)
            .returning(|input| Ok(format!("exec-{}", input.key)));
        let root = TempDir::new().unwrap();
        let runner = runner(&root, workflow);

        let event = br#"{"Records":[{"s3":{"bucket":{"name":"media"},"object":{"key":"input/movie.mp4"}}}]}"#;
        let value = json(&runner.dispatch(Stage::Trigger, event).await.unwrap());
        assert_eq!(value["status"], "success");
        assert_eq!(value["executions"][0], "exec-input/movie.mp4");
    }

    #[tokio::test]
    async fn test_merge_without_parts_fails_with_no_data() {
        let root = TempDir::new().unwrap();
        let runner = runner(&root, MockWorkflowPort::new());
        let input = br#"{"bucket":"media","originalFileName":"movie","encodedParts":[]}"#;
        let value = json(&runner.dispatch(Stage::Merge, input).await.unwrap());
        assert_eq!(value["status"], "failed");
        assert_eq!(value["reason"], "no data");
    }
}
