//! Thumbnail output group planning.
//!
//! The first segment of every source carries one extra output group that
//! captures a couple of frames as still images.

use serde_json::Map;
use thiserror::Error;

use super::asset::Destination;
use super::jobs::{
    ContainerSettings, FileGroupSettings, FrameCaptureSettings, Output, OutputGroup,
    OutputGroupSettings, VideoCodecSettings, VideoDescription, FILE_GROUP_SETTINGS,
    FRAME_CAPTURE,
};
use super::scaling::Dimensions;

pub const THUMBNAIL_GROUP_NAME: &str = "Thumbnails";

/// Frames per second captured for thumbnails.
const CAPTURE_RATE: (u32, u32) = (1, 1);
const MAX_CAPTURES: u32 = 2;
const CAPTURE_QUALITY: u32 = 80;

#[derive(Debug, Error, PartialEq)]
pub enum ThumbnailError {
    #[error("thumbnail dimensions must be non-zero, got {0}x{1}")]
    EmptyFrame(u32, u32),

    #[error("thumbnail destination needs an original asset name")]
    MissingName,
}

/// Build the frame-capture output group for `original_name`.
pub fn thumbnail_group(
    frame: Dimensions,
    destination: &Destination,
    original_name: &str,
) -> Result<OutputGroup, ThumbnailError> {
    if frame.width == 0 || frame.height == 0 {
        return Err(ThumbnailError::EmptyFrame(frame.width, frame.height));
    }
    if original_name.is_empty() {
        return Err(ThumbnailError::MissingName);
    }

    let mut description_extra = Map::new();
    description_extra.insert("ScalingBehavior".into(), "DEFAULT".into());
    description_extra.insert("TimecodeInsertion".into(), "DISABLED".into());
    description_extra.insert("AntiAlias".into(), "ENABLED".into());
    description_extra.insert("Sharpness".into(), 50.into());
    description_extra.insert("AfdSignaling".into(), "NONE".into());
    description_extra.insert("DropFrameTimecode".into(), "ENABLED".into());
    description_extra.insert("RespondToAfd".into(), "NONE".into());
    description_extra.insert("ColorMetadata".into(), "INSERT".into());

    let output = Output {
        name_modifier: None,
        extension: None,
        container_settings: Some(ContainerSettings {
            container: "RAW".into(),
            extra: Map::new(),
        }),
        video_description: Some(VideoDescription {
            width: Some(frame.width),
            height: Some(frame.height),
            codec_settings: Some(VideoCodecSettings {
                codec: FRAME_CAPTURE.into(),
                frame_capture_settings: Some(FrameCaptureSettings {
                    framerate_numerator: CAPTURE_RATE.0,
                    framerate_denominator: CAPTURE_RATE.1,
                    max_captures: MAX_CAPTURES,
                    quality: CAPTURE_QUALITY,
                }),
                h264_settings: None,
                extra: Map::new(),
            }),
            extra: description_extra,
        }),
        audio_descriptions: Vec::new(),
        extra: Map::new(),
    };

    let mut destination_settings = Map::new();
    destination_settings.insert(
        "DestinationSettings".into(),
        serde_json::json!({
            "S3Settings": { "AccessControl": { "CannedAcl": "BUCKET_OWNER_FULL_CONTROL" } }
        }),
    );

    Ok(OutputGroup {
        custom_name: Some(THUMBNAIL_GROUP_NAME.into()),
        name: Some("File Group".into()),
        outputs: vec![output],
        output_group_settings: OutputGroupSettings {
            group_type: FILE_GROUP_SETTINGS.into(),
            file_group_settings: Some(FileGroupSettings {
                destination: Some(thumbnail_destination(destination, original_name)),
                extra: destination_settings,
            }),
            extra: Map::new(),
        },
        extra: Map::new(),
    })
}

pub fn thumbnail_destination(destination: &Destination, original_name: &str) -> String {
    destination.uri(&format!("{}/Default/Thumbnails/", original_name))
}
