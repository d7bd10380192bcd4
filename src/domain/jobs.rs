//! Transcode job descriptions.
//!
//! Settings templates use the engine's JSON layout (PascalCase keys). Only the
//! fields this crate reads or rewrites are typed; everything else is carried
//! through untouched in the `extra` maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

use super::asset::{object_uri, Destination, Segment};
use super::metadata::ProbedMetadata;
use super::scaling::ScalingCaps;
use super::thumbnails::thumbnail_group;
use crate::error::{PipelineError, PipelineResult};

pub const FILE_GROUP_SETTINGS: &str = "FILE_GROUP_SETTINGS";
pub const FRAME_CAPTURE: &str = "FRAME_CAPTURE";

const DEFAULT_TEMPLATE: &str = include_str!("default_job.json");
pub const DEFAULT_TEMPLATE_NAME: &str = "Default";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobSettings {
    #[serde(default)]
    pub inputs: Vec<JobInput>,
    #[serde(default)]
    pub output_groups: Vec<OutputGroup>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JobInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_input: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub outputs: Vec<Output>,
    pub output_group_settings: OutputGroupSettings,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputGroupSettings {
    #[serde(rename = "Type")]
    pub group_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_group_settings: Option<FileGroupSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileGroupSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_modifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_settings: Option<ContainerSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_description: Option<VideoDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audio_descriptions: Vec<AudioDescription>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Output {
    pub fn video_codec(&self) -> Option<&str> {
        self.video_description
            .as_ref()
            .and_then(|video| video.codec_settings.as_ref())
            .map(|codec| codec.codec.as_str())
    }

    pub fn container(&self) -> Option<&str> {
        self.container_settings
            .as_ref()
            .map(|settings| settings.container.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerSettings {
    pub container: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_settings: Option<VideoCodecSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VideoCodecSettings {
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_capture_settings: Option<FrameCaptureSettings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h264_settings: Option<H264Settings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FrameCaptureSettings {
    pub framerate_numerator: u32,
    pub framerate_denominator: u32,
    pub max_captures: u32,
    pub quality: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct H264Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_control_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qvbr_settings: Option<QvbrSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QvbrSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qvbr_quality_level: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioDescription {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_settings: Option<AudioCodecSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioCodecSettings {
    pub codec: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aac_settings: Option<AacSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AacSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coding_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputGroupKind {
    /// Encoded video files.
    Rendition,
    /// Still frames only.
    Thumbnail,
}

impl OutputGroup {
    /// Classify the group. Any type other than a file group is a
    /// configuration error.
    pub fn kind(&self) -> PipelineResult<OutputGroupKind> {
        if self.output_group_settings.group_type != FILE_GROUP_SETTINGS {
            return Err(PipelineError::UnknownOutputGroupType(
                self.output_group_settings.group_type.clone(),
            ));
        }
        let stills_only = !self.outputs.is_empty()
            && self
                .outputs
                .iter()
                .all(|output| output.video_codec() == Some(FRAME_CAPTURE));
        Ok(if stills_only {
            OutputGroupKind::Thumbnail
        } else {
            OutputGroupKind::Rendition
        })
    }

    pub fn destination(&self) -> Option<&str> {
        self.output_group_settings
            .file_group_settings
            .as_ref()
            .and_then(|settings| settings.destination.as_deref())
    }

    pub fn set_destination(&mut self, destination: String) {
        match self.output_group_settings.file_group_settings.as_mut() {
            Some(settings) => settings.destination = Some(destination),
            None => {
                self.output_group_settings.file_group_settings = Some(FileGroupSettings {
                    destination: Some(destination),
                    extra: Map::new(),
                })
            }
        }
    }
}

/// A named settings template.
#[derive(Debug, Clone, PartialEq)]
pub struct JobTemplate {
    pub name: String,
    pub settings: JobSettings,
}

impl JobTemplate {
    pub fn from_slice(name: impl Into<String>, bytes: &[u8]) -> PipelineResult<Self> {
        Ok(Self {
            name: name.into(),
            settings: serde_json::from_slice(bytes)?,
        })
    }

    /// The template compiled into the crate, used when storage holds none.
    pub fn builtin() -> PipelineResult<Self> {
        Self::from_slice(DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE.as_bytes())
    }
}

/// A job ready for submission to the transcoding engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscodeJobSpec {
    pub settings: JobSettings,
    pub user_metadata: BTreeMap<String, String>,
    /// Bucket the rendition outputs land in.
    pub destination_bucket: String,
    /// Key of the main rendition this job produces.
    pub encoded_key: String,
    pub original_name: String,
    pub ordinal: u32,
}

impl TranscodeJobSpec {
    pub fn input(&self) -> Option<&str> {
        self.settings
            .inputs
            .first()
            .and_then(|input| input.file_input.as_deref())
    }
}

/// Builds one job per segment and template.
#[derive(Debug, Clone)]
pub struct JobBuilder<'a> {
    renditions: &'a Destination,
    thumbnails: &'a Destination,
    caps: ScalingCaps,
    application: &'a str,
}

impl<'a> JobBuilder<'a> {
    pub fn new(
        renditions: &'a Destination,
        thumbnails: &'a Destination,
        caps: ScalingCaps,
        application: &'a str,
    ) -> Self {
        Self {
            renditions,
            thumbnails,
            caps,
            application,
        }
    }

    /// Build the job for `segment` stored in `bucket`.
    ///
    /// The template is cloned, never modified. Thumbnails are attached to
    /// the first segment only, and failing to plan them is not fatal.
    pub fn build(
        &self,
        bucket: &str,
        segment: &Segment,
        template: &JobTemplate,
        probed: &ProbedMetadata,
    ) -> PipelineResult<TranscodeJobSpec> {
        let original_name = segment.original_name().to_string();
        let frame = probed.frame(self.caps);
        let input_uri = object_uri(bucket, &segment.key);
        let mut settings = template.settings.clone();

        match settings.inputs.first_mut() {
            Some(input) => input.file_input = Some(input_uri.clone()),
            None => settings.inputs.push(JobInput {
                file_input: Some(input_uri.clone()),
                extra: Map::new(),
            }),
        }
        settings.inputs.truncate(1);

        let rendition_uri = self.renditions.uri(&format!("{}/", original_name));
        let mut name_modifier: Option<String> = None;
        for group in settings.output_groups.iter_mut() {
            let kind = group.kind()?;
            for output in group.outputs.iter_mut() {
                if let Some(video) = output.video_description.as_mut() {
                    video.width = Some(frame.width);
                    video.height = Some(frame.height);
                }
            }
            if kind == OutputGroupKind::Rendition {
                group.set_destination(rendition_uri.clone());
                if name_modifier.is_none() {
                    name_modifier = group
                        .outputs
                        .first()
                        .map(|output| output.name_modifier.clone().unwrap_or_default());
                }
            }
        }

        if segment.is_first() {
            match thumbnail_group(frame, self.thumbnails, &original_name) {
                Ok(group) => {
                    info!(source = %segment.source, "Attaching thumbnail capture to first segment");
                    settings.output_groups.push(group);
                }
                Err(e) => warn!(
                    source = %segment.source,
                    error = %e,
                    "Skipping thumbnails for this source"
                ),
            }
        }

        let mut user_metadata = BTreeMap::new();
        user_metadata.insert("assetID".to_string(), Uuid::new_v4().to_string());
        user_metadata.insert("application".to_string(), self.application.to_string());
        user_metadata.insert("input".to_string(), input_uri);
        user_metadata.insert("settings".to_string(), template.name.clone());

        let encoded_key = self.renditions.key(&format!(
            "{}/{}{}.mp4",
            original_name,
            segment.stem(),
            name_modifier.unwrap_or_default()
        ));

        Ok(TranscodeJobSpec {
            settings,
            user_metadata,
            destination_bucket: self.renditions.bucket.clone(),
            encoded_key,
            original_name,
            ordinal: segment.ordinal,
        })
    }
}
