//! Transcoding engine for local mode.
//!
//! Jobs are rendered by `ffmpeg` on a background task after `submit`
//! returns, and outputs appear in storage under the destinations named in
//! the job, the same way a remote engine behaves.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::command::path_arg;
use super::ffmpeg::FfmpegTools;
use crate::domain::asset::{file_name, file_stem, parse_object_uri};
use crate::domain::jobs::{Output, TranscodeJobSpec, FRAME_CAPTURE};
use crate::error::{PipelineError, PipelineResult};
use crate::ports::storage::StoragePort;
use crate::ports::transcoder::{JobHandle, TranscoderPort};
use crate::workspace::Workspace;

#[derive(Clone)]
pub struct FfmpegTranscoder<S> {
    storage: S,
    tools: FfmpegTools,
    work_dir: Option<PathBuf>,
    jobs: TaskTracker,
}

impl<S> FfmpegTranscoder<S>
where
    S: StoragePort + Clone + 'static,
{
    pub fn new(storage: S, tools: FfmpegTools, work_dir: Option<PathBuf>) -> Self {
        Self {
            storage,
            tools,
            work_dir,
            jobs: TaskTracker::new(),
        }
    }

    /// Wait for every submitted job to finish.
    pub async fn drain(&self) {
        self.jobs.close();
        self.jobs.wait().await;
    }

    async fn render(&self, job_id: &str, plan: &RenderPlan) -> PipelineResult<()> {
        let workspace = Workspace::new(self.work_dir.as_deref())?;
        let input = workspace.path(file_name(&plan.input_key));
        self.storage
            .download(&plan.input_bucket, &plan.input_key, &input)
            .await?;

        for (index, output) in plan.outputs.iter().enumerate() {
            match &output.kind {
                OutputKind::Video { .. } => {
                    let local = workspace.path(&format!("out{}_{}", index, file_name(&output.key)));
                    self.tools
                        .ffmpeg()
                        .args(output.video_args(&input, &local))
                        .execute()
                        .await?;
                    self.storage
                        .upload(&local, &output.bucket, &output.key)
                        .await?;
                    info!(job_id, bucket = %output.bucket, key = %output.key, "Rendition written");
                }
                OutputKind::Frames { .. } => {
                    let frames_dir = workspace.path(&format!("frames{}", index));
                    tokio::fs::create_dir_all(&frames_dir).await?;
                    self.tools
                        .ffmpeg()
                        .args(output.frame_args(&input, &frames_dir.join("%07d.jpg")))
                        .execute()
                        .await?;
                    let mut written = Vec::new();
                    let mut entries = tokio::fs::read_dir(&frames_dir).await?;
                    while let Some(entry) = entries.next_entry().await? {
                        written.push(entry.path());
                    }
                    written.sort();
                    // ffmpeg numbers from 1, capture names start at 0
                    for (n, path) in written.iter().enumerate() {
                        let key = format!("{}.{:07}.jpg", output.key, n);
                        self.storage.upload(path, &output.bucket, &key).await?;
                    }
                    info!(job_id, bucket = %output.bucket, frames = written.len(), "Frames written");
                }
            }
        }

        workspace.close()?;
        Ok(())
    }
}

#[async_trait]
impl<S> TranscoderPort for FfmpegTranscoder<S>
where
    S: StoragePort + Clone + 'static,
{
    async fn submit(&self, job: &TranscodeJobSpec) -> PipelineResult<JobHandle> {
        let plan = RenderPlan::from_spec(job)?;
        let id = Uuid::new_v4().to_string();

        let engine = self.clone();
        let job_id = id.clone();
        self.jobs.spawn(async move {
            match engine.render(&job_id, &plan).await {
                Ok(()) => info!(job_id = %job_id, "Job complete"),
                Err(e) => error!(job_id = %job_id, error = %e, "Job failed"),
            }
        });

        Ok(JobHandle { id })
    }
}

/// What one job writes, resolved from its settings.
#[derive(Debug, Clone, PartialEq)]
struct RenderPlan {
    input_bucket: String,
    input_key: String,
    outputs: Vec<PlannedOutput>,
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedOutput {
    bucket: String,
    /// Object key for videos, key stem for frame captures.
    key: String,
    width: Option<u32>,
    height: Option<u32>,
    kind: OutputKind,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputKind {
    Video {
        video_bitrate: Option<u32>,
        audio_bitrate: Option<u32>,
        sample_rate: Option<u32>,
    },
    Frames {
        rate: (u32, u32),
        max_captures: u32,
        quality: u32,
    },
}

impl RenderPlan {
    fn from_spec(job: &TranscodeJobSpec) -> PipelineResult<Self> {
        let input = job
            .input()
            .ok_or_else(|| PipelineError::InvalidLocation("job has no input".into()))?;
        let (input_bucket, input_key) = parse_object_uri(input)?;
        let stem = file_stem(&input_key).to_string();

        let mut outputs = Vec::new();
        for group in &job.settings.output_groups {
            let destination = group.destination().ok_or_else(|| {
                PipelineError::InvalidLocation(format!(
                    "output group {} has no destination",
                    group.custom_name.as_deref().unwrap_or("?")
                ))
            })?;
            let (bucket, prefix) = parse_object_uri(destination)?;
            for output in &group.outputs {
                match planned_output(output, &bucket, &prefix, &stem) {
                    Some(planned) => outputs.push(planned),
                    None => warn!(
                        container = output.container().unwrap_or("none"),
                        "Output not supported locally, skipped"
                    ),
                }
            }
        }

        Ok(Self {
            input_bucket,
            input_key,
            outputs,
        })
    }
}

fn planned_output(output: &Output, bucket: &str, prefix: &str, stem: &str) -> Option<PlannedOutput> {
    let video = output.video_description.as_ref();
    let codec = video.and_then(|video| video.codec_settings.as_ref());
    let width = video.and_then(|video| video.width);
    let height = video.and_then(|video| video.height);
    let modifier = output.name_modifier.as_deref().unwrap_or("");

    if output.video_codec() == Some(FRAME_CAPTURE) {
        let capture = codec.and_then(|codec| codec.frame_capture_settings.as_ref())?;
        return Some(PlannedOutput {
            bucket: bucket.to_string(),
            key: format!("{}{}{}", prefix, stem, modifier),
            width,
            height,
            kind: OutputKind::Frames {
                rate: (capture.framerate_numerator, capture.framerate_denominator.max(1)),
                max_captures: capture.max_captures.max(1),
                quality: capture.quality,
            },
        });
    }

    if output.container().map(|c| c.eq_ignore_ascii_case("MP4")) != Some(true) {
        return None;
    }
    let h264 = codec.and_then(|codec| codec.h264_settings.as_ref());
    let aac = output
        .audio_descriptions
        .first()
        .and_then(|audio| audio.codec_settings.as_ref())
        .and_then(|codec| codec.aac_settings.as_ref());
    let extension = output.extension.as_deref().unwrap_or("mp4");

    Some(PlannedOutput {
        bucket: bucket.to_string(),
        key: format!("{}{}{}.{}", prefix, stem, modifier, extension),
        width,
        height,
        kind: OutputKind::Video {
            video_bitrate: h264.and_then(|h264| h264.max_bitrate.or(h264.bitrate)),
            audio_bitrate: aac.and_then(|aac| aac.bitrate),
            sample_rate: aac.and_then(|aac| aac.sample_rate),
        },
    })
}

impl PlannedOutput {
    fn scale_filter(&self) -> Option<String> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(format!("scale={}:{}", width, height)),
            _ => None,
        }
    }

    fn video_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            path_arg(input),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "0:a?".into(),
        ];
        if let Some(filter) = self.scale_filter() {
            args.extend(["-vf".into(), filter.into()]);
        }
        args.extend(["-c:v".into(), "libx264".into()]);
        if let OutputKind::Video {
            video_bitrate,
            audio_bitrate,
            sample_rate,
        } = &self.kind
        {
            if let Some(rate) = video_bitrate {
                args.extend([
                    "-maxrate".into(),
                    rate.to_string().into(),
                    "-bufsize".into(),
                    (u64::from(*rate) * 2).to_string().into(),
                ]);
            }
            args.extend(["-c:a".into(), "aac".into()]);
            if let Some(rate) = audio_bitrate {
                args.extend(["-b:a".into(), rate.to_string().into()]);
            }
            if let Some(rate) = sample_rate {
                args.extend(["-ar".into(), rate.to_string().into()]);
            }
        }
        args.extend(["-movflags".into(), "+faststart".into(), path_arg(output)]);
        args
    }

    fn frame_args(&self, input: &Path, pattern: &Path) -> Vec<OsString> {
        let (rate, max_captures, quality) = match &self.kind {
            OutputKind::Frames {
                rate,
                max_captures,
                quality,
            } => (*rate, *max_captures, *quality),
            OutputKind::Video { .. } => ((1, 1), 1, 80),
        };
        let mut filter = format!("fps={}/{}", rate.0, rate.1);
        if let Some(scale) = self.scale_filter() {
            filter = format!("{},{}", filter, scale);
        }
        vec![
            "-i".into(),
            path_arg(input),
            "-vf".into(),
            filter.into(),
            "-frames:v".into(),
            max_captures.to_string().into(),
            "-q:v".into(),
            jpeg_qscale(quality).to_string().into(),
            path_arg(pattern),
        ]
    }
}

/// Map a 1..=100 quality onto ffmpeg's 2..=31 JPEG scale (lower is better).
fn jpeg_qscale(quality: u32) -> u32 {
    let quality = quality.clamp(1, 100);
    2 + (100 - quality) * 29 / 99
}
