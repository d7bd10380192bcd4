//! MediaConvert as the transcoding engine.
//!
//! Job settings are translated field by field into the SDK's typed model,
//! including the template keys kept in the `extra` maps. A key with no
//! mapping fails the job instead of being dropped.

use async_trait::async_trait;
use aws_sdk_mediaconvert::types as mc;
use aws_sdk_mediaconvert::Client;
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::debug;

use crate::domain::jobs::{self, TranscodeJobSpec};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::transcoder::{JobHandle, TranscoderPort};

#[derive(Clone)]
pub struct MediaConvertAdapter {
    client: Client,
    role: String,
}

impl MediaConvertAdapter {
    pub fn new(client: Client, role: String) -> Self {
        Self { client, role }
    }

    /// Client bound to the account-specific endpoint.
    pub fn from_sdk_config(sdk_config: &aws_config::SdkConfig, endpoint: &str, role: String) -> Self {
        let config = aws_sdk_mediaconvert::config::Builder::from(sdk_config)
            .endpoint_url(endpoint)
            .build();
        Self::new(Client::from_conf(config), role)
    }
}

#[async_trait]
impl TranscoderPort for MediaConvertAdapter {
    async fn submit(&self, job: &TranscodeJobSpec) -> PipelineResult<JobHandle> {
        let settings = job_settings(&job.settings)?;
        let metadata: HashMap<String, String> = job
            .user_metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let resp = self
            .client
            .create_job()
            .role(&self.role)
            .settings(settings)
            .set_user_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| PipelineError::tool("mediaconvert", e.to_string()))?;

        let id = resp
            .job()
            .and_then(|job| job.id())
            .ok_or_else(|| PipelineError::tool("mediaconvert", "job accepted without an id"))?
            .to_string();
        debug!(job_id = %id, key = %job.encoded_key, "MediaConvert job created");
        Ok(JobHandle { id })
    }
}

fn int(value: Option<u32>) -> Option<i32> {
    value.and_then(|v| i32::try_from(v).ok())
}

/// Untyped template keys at `path`. Each key must be taken exactly once;
/// [`Fields::finish`] rejects whatever is left over.
struct Fields {
    path: String,
    map: Map<String, Value>,
}

impl Fields {
    fn new(path: impl Into<String>, map: &Map<String, Value>) -> Self {
        Self {
            path: path.into(),
            map: map.clone(),
        }
    }

    fn at(&self, key: &str) -> String {
        format!("{}.{}", self.path, key)
    }

    fn invalid(&self, key: &str, expected: &str) -> PipelineError {
        PipelineError::UnsupportedSetting(format!("{} must be {}", self.at(key), expected))
    }

    fn string(&mut self, key: &str) -> PipelineResult<Option<String>> {
        match self.map.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(value)) => Ok(Some(value)),
            Some(_) => Err(self.invalid(key, "a string")),
        }
    }

    fn enumeration<E: for<'s> From<&'s str>>(&mut self, key: &str) -> PipelineResult<Option<E>> {
        Ok(self.string(key)?.as_deref().map(E::from))
    }

    fn integer(&mut self, key: &str) -> PipelineResult<Option<i32>> {
        match self.map.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_i64()
                .and_then(|v| i32::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a 32-bit integer")),
        }
    }

    fn float(&mut self, key: &str) -> PipelineResult<Option<f64>> {
        match self.map.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a number")),
        }
    }

    fn object(&mut self, key: &str) -> PipelineResult<Option<Fields>> {
        match self.map.remove(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Fields {
                path: self.at(key),
                map,
            })),
            Some(_) => Err(self.invalid(key, "an object")),
        }
    }

    fn finish(self) -> PipelineResult<()> {
        match self.map.keys().next() {
            None => Ok(()),
            Some(key) => Err(PipelineError::UnsupportedSetting(self.at(key))),
        }
    }
}

fn job_settings(settings: &jobs::JobSettings) -> PipelineResult<mc::JobSettings> {
    let mut extra = Fields::new("Settings", &settings.extra);
    let timecode = extra.object("TimecodeConfig")?.map(timecode_config).transpose()?;
    extra.finish()?;

    let inputs = settings
        .inputs
        .iter()
        .enumerate()
        .map(|(i, job_input)| input(i, job_input))
        .collect::<PipelineResult<Vec<_>>>()?;
    let groups = settings
        .output_groups
        .iter()
        .enumerate()
        .map(|(i, group)| output_group(i, group))
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(mc::JobSettings::builder()
        .set_timecode_config(timecode)
        .set_inputs(Some(inputs))
        .set_output_groups(Some(groups))
        .build())
}

fn timecode_config(mut fields: Fields) -> PipelineResult<mc::TimecodeConfig> {
    let config = mc::TimecodeConfig::builder()
        .set_source(fields.enumeration("Source")?)
        .set_start(fields.string("Start")?)
        .set_anchor(fields.string("Anchor")?)
        .set_timestamp_offset(fields.string("TimestampOffset")?)
        .build();
    fields.finish()?;
    Ok(config)
}

fn input(index: usize, input: &jobs::JobInput) -> PipelineResult<mc::Input> {
    let mut extra = Fields::new(format!("Inputs[{}]", index), &input.extra);
    let audio = extra
        .object("AudioSelectors")?
        .map(audio_selectors)
        .transpose()?;
    let video = extra.object("VideoSelector")?.map(video_selector).transpose()?;

    let built = mc::Input::builder()
        .set_file_input(input.file_input.clone())
        .set_audio_selectors(audio)
        .set_video_selector(video)
        .set_timecode_source(extra.enumeration("TimecodeSource")?)
        .set_timecode_start(extra.string("TimecodeStart")?)
        .set_filter_enable(extra.enumeration("FilterEnable")?)
        .set_filter_strength(extra.integer("FilterStrength")?)
        .set_psi_control(extra.enumeration("PsiControl")?)
        .set_deblock_filter(extra.enumeration("DeblockFilter")?)
        .set_denoise_filter(extra.enumeration("DenoiseFilter")?)
        .build();
    extra.finish()?;
    Ok(built)
}

fn audio_selectors(mut fields: Fields) -> PipelineResult<HashMap<String, mc::AudioSelector>> {
    let names: Vec<String> = fields.map.keys().cloned().collect();
    let mut selectors = HashMap::with_capacity(names.len());
    for name in names {
        let Some(mut selector) = fields.object(&name)? else {
            continue;
        };
        let tracks = match selector.map.remove("Tracks") {
            None | Some(Value::Null) => None,
            Some(Value::Array(tracks)) => Some(
                tracks
                    .iter()
                    .map(|track| track.as_i64().and_then(|t| i32::try_from(t).ok()))
                    .collect::<Option<Vec<i32>>>()
                    .ok_or_else(|| selector.invalid("Tracks", "a list of track numbers"))?,
            ),
            Some(_) => return Err(selector.invalid("Tracks", "a list of track numbers")),
        };
        let built = mc::AudioSelector::builder()
            .set_default_selection(selector.enumeration("DefaultSelection")?)
            .set_selector_type(selector.enumeration("SelectorType")?)
            .set_offset(selector.integer("Offset")?)
            .set_program_selection(selector.integer("ProgramSelection")?)
            .set_tracks(tracks)
            .build();
        selector.finish()?;
        selectors.insert(name, built);
    }
    fields.finish()?;
    Ok(selectors)
}

fn video_selector(mut fields: Fields) -> PipelineResult<mc::VideoSelector> {
    let selector = mc::VideoSelector::builder()
        .set_color_space(fields.enumeration("ColorSpace")?)
        .set_rotate(fields.enumeration("Rotate")?)
        .set_pid(fields.integer("Pid")?)
        .build();
    fields.finish()?;
    Ok(selector)
}

fn output_group(index: usize, group: &jobs::OutputGroup) -> PipelineResult<mc::OutputGroup> {
    let path = format!("OutputGroups[{}]", index);
    Fields::new(path.clone(), &group.extra).finish()?;
    let settings = &group.output_group_settings;
    Fields::new(format!("{}.OutputGroupSettings", path), &settings.extra).finish()?;

    let file_group = settings
        .file_group_settings
        .as_ref()
        .map(|file_group| {
            let mut extra = Fields::new(
                format!("{}.OutputGroupSettings.FileGroupSettings", path),
                &file_group.extra,
            );
            let destination_settings = extra
                .object("DestinationSettings")?
                .map(destination_settings)
                .transpose()?;
            extra.finish()?;
            Ok::<_, PipelineError>(
                mc::FileGroupSettings::builder()
                    .set_destination(file_group.destination.clone())
                    .set_destination_settings(destination_settings)
                    .build(),
            )
        })
        .transpose()?;

    let outputs = group
        .outputs
        .iter()
        .enumerate()
        .map(|(i, out)| output(&format!("{}.Outputs[{}]", path, i), out))
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(mc::OutputGroup::builder()
        .set_custom_name(group.custom_name.clone())
        .set_name(group.name.clone())
        .set_outputs(Some(outputs))
        .output_group_settings(
            mc::OutputGroupSettings::builder()
                .r#type(mc::OutputGroupType::from(settings.group_type.as_str()))
                .set_file_group_settings(file_group)
                .build(),
        )
        .build())
}

fn destination_settings(mut fields: Fields) -> PipelineResult<mc::DestinationSettings> {
    let s3 = match fields.object("S3Settings")? {
        Some(mut s3) => {
            let access_control = match s3.object("AccessControl")? {
                Some(mut acl) => {
                    let built = mc::S3DestinationAccessControl::builder()
                        .set_canned_acl(acl.enumeration("CannedAcl")?)
                        .build();
                    acl.finish()?;
                    Some(built)
                }
                None => None,
            };
            let built = mc::S3DestinationSettings::builder()
                .set_access_control(access_control)
                .build();
            s3.finish()?;
            Some(built)
        }
        None => None,
    };
    fields.finish()?;
    Ok(mc::DestinationSettings::builder().set_s3_settings(s3).build())
}

fn output(path: &str, output: &jobs::Output) -> PipelineResult<mc::Output> {
    Fields::new(path, &output.extra).finish()?;

    let container = output
        .container_settings
        .as_ref()
        .map(|container| {
            let mut extra = Fields::new(format!("{}.ContainerSettings", path), &container.extra);
            let mp4 = extra.object("Mp4Settings")?.map(mp4_settings).transpose()?;
            extra.finish()?;
            Ok::<_, PipelineError>(
                mc::ContainerSettings::builder()
                    .container(mc::ContainerType::from(container.container.as_str()))
                    .set_mp4_settings(mp4)
                    .build(),
            )
        })
        .transpose()?;
    let video = output
        .video_description
        .as_ref()
        .map(|video| video_description(&format!("{}.VideoDescription", path), video))
        .transpose()?;
    let audio = output
        .audio_descriptions
        .iter()
        .enumerate()
        .map(|(i, audio)| audio_description(&format!("{}.AudioDescriptions[{}]", path, i), audio))
        .collect::<PipelineResult<Vec<_>>>()?;

    Ok(mc::Output::builder()
        .set_name_modifier(output.name_modifier.clone())
        .set_extension(output.extension.clone())
        .set_container_settings(container)
        .set_video_description(video)
        .set_audio_descriptions(Some(audio))
        .build())
}

fn mp4_settings(mut fields: Fields) -> PipelineResult<mc::Mp4Settings> {
    let settings = mc::Mp4Settings::builder()
        .set_cslg_atom(fields.enumeration("CslgAtom")?)
        .set_ctts_version(fields.integer("CttsVersion")?)
        .set_free_space_box(fields.enumeration("FreeSpaceBox")?)
        .set_moov_placement(fields.enumeration("MoovPlacement")?)
        .set_mp4_major_brand(fields.string("Mp4MajorBrand")?)
        .set_audio_duration(fields.enumeration("AudioDuration")?)
        .build();
    fields.finish()?;
    Ok(settings)
}

fn video_description(path: &str, video: &jobs::VideoDescription) -> PipelineResult<mc::VideoDescription> {
    let codec = video
        .codec_settings
        .as_ref()
        .map(|codec| video_codec(&format!("{}.CodecSettings", path), codec))
        .transpose()?;

    let mut extra = Fields::new(path, &video.extra);
    let built = mc::VideoDescription::builder()
        .set_width(int(video.width))
        .set_height(int(video.height))
        .set_codec_settings(codec)
        .set_scaling_behavior(extra.enumeration("ScalingBehavior")?)
        .set_timecode_insertion(extra.enumeration("TimecodeInsertion")?)
        .set_anti_alias(extra.enumeration("AntiAlias")?)
        .set_sharpness(extra.integer("Sharpness")?)
        .set_afd_signaling(extra.enumeration("AfdSignaling")?)
        .set_drop_frame_timecode(extra.enumeration("DropFrameTimecode")?)
        .set_respond_to_afd(extra.enumeration("RespondToAfd")?)
        .set_color_metadata(extra.enumeration("ColorMetadata")?)
        .build();
    extra.finish()?;
    Ok(built)
}

fn video_codec(path: &str, codec: &jobs::VideoCodecSettings) -> PipelineResult<mc::VideoCodecSettings> {
    let stray = match codec.codec.as_str() {
        jobs::FRAME_CAPTURE => codec.h264_settings.is_some().then_some("H264Settings"),
        "H_264" => codec
            .frame_capture_settings
            .is_some()
            .then_some("FrameCaptureSettings"),
        other => {
            return Err(PipelineError::UnsupportedSetting(format!(
                "{}.Codec {}",
                path, other
            )))
        }
    };
    if let Some(name) = stray {
        return Err(PipelineError::UnsupportedSetting(format!(
            "{}.{} with codec {}",
            path, name, codec.codec
        )));
    }
    Fields::new(path, &codec.extra).finish()?;

    let frame_capture = codec.frame_capture_settings.map(|capture| {
        mc::FrameCaptureSettings::builder()
            .set_framerate_numerator(int(Some(capture.framerate_numerator)))
            .set_framerate_denominator(int(Some(capture.framerate_denominator)))
            .set_max_captures(int(Some(capture.max_captures)))
            .set_quality(int(Some(capture.quality)))
            .build()
    });
    let h264 = codec
        .h264_settings
        .as_ref()
        .map(|h264| h264_settings(&format!("{}.H264Settings", path), h264))
        .transpose()?;

    Ok(mc::VideoCodecSettings::builder()
        .codec(mc::VideoCodec::from(codec.codec.as_str()))
        .set_frame_capture_settings(frame_capture)
        .set_h264_settings(h264)
        .build())
}

fn h264_settings(path: &str, h264: &jobs::H264Settings) -> PipelineResult<mc::H264Settings> {
    let qvbr = h264
        .qvbr_settings
        .as_ref()
        .map(|qvbr| {
            let mut extra = Fields::new(format!("{}.QvbrSettings", path), &qvbr.extra);
            let built = mc::H264QvbrSettings::builder()
                .set_qvbr_quality_level(int(qvbr.qvbr_quality_level))
                .set_qvbr_quality_level_fine_tune(extra.float("QvbrQualityLevelFineTune")?)
                .set_max_average_bitrate(extra.integer("MaxAverageBitrate")?)
                .build();
            extra.finish()?;
            Ok::<_, PipelineError>(built)
        })
        .transpose()?;

    let mut extra = Fields::new(path, &h264.extra);
    let built = mc::H264Settings::builder()
        .set_rate_control_mode(
            h264.rate_control_mode
                .as_deref()
                .map(mc::H264RateControlMode::from),
        )
        .set_max_bitrate(int(h264.max_bitrate))
        .set_bitrate(int(h264.bitrate))
        .set_qvbr_settings(qvbr)
        .set_scene_change_detect(extra.enumeration("SceneChangeDetect")?)
        .set_codec_profile(extra.enumeration("CodecProfile")?)
        .set_codec_level(extra.enumeration("CodecLevel")?)
        .set_gop_size(extra.float("GopSize")?)
        .set_gop_size_units(extra.enumeration("GopSizeUnits")?)
        .set_number_b_frames_between_reference_frames(
            extra.integer("NumberBFramesBetweenReferenceFrames")?,
        )
        .set_quality_tuning_level(extra.enumeration("QualityTuningLevel")?)
        .set_interlace_mode(extra.enumeration("InterlaceMode")?)
        .set_framerate_control(extra.enumeration("FramerateControl")?)
        .set_framerate_numerator(extra.integer("FramerateNumerator")?)
        .set_framerate_denominator(extra.integer("FramerateDenominator")?)
        .set_par_control(extra.enumeration("ParControl")?)
        .build();
    extra.finish()?;
    Ok(built)
}

fn audio_description(path: &str, audio: &jobs::AudioDescription) -> PipelineResult<mc::AudioDescription> {
    let codec = audio
        .codec_settings
        .as_ref()
        .map(|codec| {
            let codec_path = format!("{}.CodecSettings", path);
            if codec.codec != "AAC" {
                return Err(PipelineError::UnsupportedSetting(format!(
                    "{}.Codec {}",
                    codec_path, codec.codec
                )));
            }
            Fields::new(codec_path.clone(), &codec.extra).finish()?;
            let aac = codec
                .aac_settings
                .as_ref()
                .map(|aac| {
                    let mut extra = Fields::new(format!("{}.AacSettings", codec_path), &aac.extra);
                    let built = mc::AacSettings::builder()
                        .set_bitrate(int(aac.bitrate))
                        .set_coding_mode(aac.coding_mode.as_deref().map(mc::AacCodingMode::from))
                        .set_sample_rate(int(aac.sample_rate))
                        .set_codec_profile(extra.enumeration("CodecProfile")?)
                        .set_rate_control_mode(extra.enumeration("RateControlMode")?)
                        .set_raw_format(extra.enumeration("RawFormat")?)
                        .set_specification(extra.enumeration("Specification")?)
                        .build();
                    extra.finish()?;
                    Ok::<_, PipelineError>(built)
                })
                .transpose()?;
            Ok::<_, PipelineError>(
                mc::AudioCodecSettings::builder()
                    .codec(mc::AudioCodec::from(codec.codec.as_str()))
                    .set_aac_settings(aac)
                    .build(),
            )
        })
        .transpose()?;

    let mut extra = Fields::new(path, &audio.extra);
    let built = mc::AudioDescription::builder()
        .set_codec_settings(codec)
        .set_audio_source_name(extra.string("AudioSourceName")?)
        .set_audio_type_control(extra.enumeration("AudioTypeControl")?)
        .set_language_code_control(extra.enumeration("LanguageCodeControl")?)
        .build();
    extra.finish()?;
    Ok(built)
}
