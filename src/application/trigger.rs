//! Upload-event entry point: start one workflow run per uploaded object.

use tracing::info;

use crate::domain::stages::{SplitInput, TriggerOutput, UploadEvent};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::workflow::WorkflowPort;

pub struct TriggerService<W> {
    workflow: W,
}

impl<W> TriggerService<W>
where
    W: WorkflowPort,
{
    pub fn new(workflow: W) -> Self {
        Self { workflow }
    }

    pub async fn handle(&self, event: &UploadEvent) -> PipelineResult<TriggerOutput> {
        if event.records.is_empty() {
            return Err(PipelineError::NoData);
        }

        let mut executions = Vec::with_capacity(event.records.len());
        for record in &event.records {
            let input = SplitInput {
                bucket: record.s3.bucket.name.clone(),
                key: decode_key(&record.s3.object.key)?,
            };
            let execution = self.workflow.start_execution(&input).await?;
            info!(bucket = %input.bucket, key = %input.key, execution = %execution, "Started workflow");
            executions.push(execution);
        }
        Ok(TriggerOutput { executions })
    }
}

/// Object keys arrive form-encoded: `+` for spaces, `%XX` for the rest.
fn decode_key(raw: &str) -> PipelineResult<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .map(|key| key.into_owned())
        .map_err(|_| PipelineError::InvalidLocation(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stages::{UploadBucket, UploadEntity, UploadObject, UploadRecord};
    use crate::ports::workflow::MockWorkflowPort;
    use mockall::predicate::eq;

    fn record(key: &str) -> UploadRecord {
        UploadRecord {
            s3: UploadEntity {
                bucket: UploadBucket {
                    name: "media".into(),
                },
                object: UploadObject {
                    key: key.into(),
                    size: None,
                },
            },
        }
    }

    #[test]
    fn test_decode_key() {
        assert_eq!(decode_key("input/my+movie.mp4").unwrap(), "input/my movie.mp4");
        assert_eq!(decode_key("input/a%2Bb%20c.mp4").unwrap(), "input/a+b c.mp4");
        assert!(decode_key("input/%FF.mp4").is_err());
    }

    #[tokio::test]
    async fn test_one_execution_per_record() {
        let mut workflow = MockWorkflowPort::new();
        workflow
            .expect_start_execution()
            .with(eq(SplitInput {
                bucket: "media".into(),
                key: "input/my movie.mp4".into(),
            }))
            .times(1)
            .returning(|_| Ok("exec-1".into()));
        workflow
            .expect_start_execution()
            .with(eq(SplitInput {
                bucket: "media".into(),
                key: "input/other.mp4".into(),
            }))
            .times(1)
            .returning(|_| Ok("exec-2".into()));

        let service = TriggerService::new(workflow);
        let event = UploadEvent {
            records: vec![record("input/my+movie.mp4"), record("input/other.mp4")],
        };
        let out = service.handle(&event).await.unwrap();
        assert_eq!(out.executions, vec!["exec-1".to_string(), "exec-2".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_event_is_no_data() {
        let mut workflow = MockWorkflowPort::new();
        workflow.expect_start_execution().never();

        let service = TriggerService::new(workflow);
        let err = service
            .handle(&UploadEvent { records: vec![] })
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NoData));
    }
}
