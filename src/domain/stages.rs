//! Records exchanged with the workflow orchestrator.
//!
//! Every stage answers with a [`StageResult`], serialized as the stage's
//! success fields plus `"status": "success"`, or as
//! `{"status": "failed", "reason": ..., "message": ...}`.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use super::asset::{EncodedPart, Segment};
use crate::error::{ErrorKind, PipelineError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StageResult<T> {
    Success(T),
    Failed(StageFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub reason: String,
    pub message: String,
}

impl<T> StageResult<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }
}

impl<T> From<PipelineError> for StageResult<T> {
    fn from(err: PipelineError) -> Self {
        Self::Failed(StageFailure {
            reason: err.reason().to_string(),
            message: err.to_string(),
        })
    }
}

impl<T> From<Result<T, PipelineError>> for StageResult<T> {
    fn from(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => Self::Success(value),
            Err(err) => {
                let kind = err.kind();
                match kind {
                    ErrorKind::Precondition | ErrorKind::Cancelled => {
                        warn!(kind = ?kind, reason = err.reason(), error = %err, "Stage rejected")
                    }
                    _ => error!(kind = ?kind, reason = err.reason(), error = %err, "Stage failed"),
                }
                err.into()
            }
        }
    }
}

/// Input of the segment stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitInput {
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitOutput {
    pub bucket: String,
    /// Ordered by ordinal.
    pub parts: Vec<Segment>,
}

/// Input of the per-segment encode stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeInput {
    pub bucket: String,
    pub part: Segment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeOutput {
    /// Bucket the encoded part will appear in.
    pub bucket: String,
    pub encoded_part: EncodedPart,
    pub original_file_name: String,
    /// Engine handles, one per settings template.
    pub job_ids: Vec<String>,
}

/// Input of the merge stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeInput {
    pub bucket: String,
    pub original_file_name: String,
    #[serde(default)]
    pub encoded_parts: Vec<EncodedPart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutput {
    pub bucket: String,
    pub output_file: String,
}

/// Upload notification delivered by the object store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<UploadRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub s3: UploadEntity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadEntity {
    pub bucket: UploadBucket,
    pub object: UploadObject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadBucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadObject {
    /// URL-encoded, with `+` for spaces.
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerOutput {
    pub executions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_flattens_stage_fields() {
        let result: StageResult<SplitOutput> = StageResult::Success(SplitOutput {
            bucket: "media".into(),
            parts: vec![Segment {
                key: "input/movie.mp4".into(),
                ordinal: 0,
                source: "input/movie.mp4".into(),
            }],
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["bucket"], "media");
        assert_eq!(json["parts"][0]["ordinal"], 0);
    }

    #[test]
    fn test_failure_carries_reason() {
        let result: StageResult<MergeOutput> = Err(PipelineError::NoData).into();
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({"status": "failed", "reason": "no data", "message": "no data"}));
    }

    #[test]
    fn test_merge_input_uses_orchestrator_names() {
        let input: MergeInput = serde_json::from_value(json!({
            "bucket": "media",
            "originalFileName": "movie",
            "encodedParts": [{"key": "encoded/movie/part001_movie.mp4", "ordinal": 1}]
        }))
        .unwrap();
        assert_eq!(input.original_file_name, "movie");
        assert_eq!(input.encoded_parts[0].ordinal, 1);

        let empty: MergeInput =
            serde_json::from_value(json!({"bucket": "media", "originalFileName": "movie"}))
                .unwrap();
        assert!(empty.encoded_parts.is_empty());
    }

    #[test]
    fn test_stage_result_round_trips_from_json() {
        let parsed: StageResult<EncodeOutput> = serde_json::from_value(json!({
            "status": "success",
            "bucket": "media",
            "encodedPart": {"key": "k", "ordinal": 0},
            "originalFileName": "movie",
            "jobIds": ["job-1"]
        }))
        .unwrap();
        assert!(parsed.is_success());

        let failed: StageResult<EncodeOutput> = serde_json::from_value(json!({
            "status": "failed", "reason": "tool failed", "message": "ffprobe failed: x"
        }))
        .unwrap();
        assert_eq!(failed.failure().unwrap().reason, "tool failed");
    }

    #[test]
    fn test_upload_event_parses_notification() {
        let event: UploadEvent = serde_json::from_value(json!({
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "media", "arn": "arn:aws:s3:::media"},
                    "object": {"key": "input/my+movie.mp4", "size": 1024}
                }
            }]
        }))
        .unwrap();
        assert_eq!(event.records[0].s3.bucket.name, "media");
        assert_eq!(event.records[0].s3.object.key, "input/my+movie.mp4");
    }
}
