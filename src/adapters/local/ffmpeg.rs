//! Probing and stream-copy remuxing through the `ffprobe` and `ffmpeg` CLIs.

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::command::{path_arg, ToolCommand};
use crate::domain::metadata::MediaMetadata;
use crate::error::{PipelineError, PipelineResult};
use crate::ports::probe::ProbePort;
use crate::ports::remux::RemuxPort;

#[derive(Debug, Clone)]
pub struct FfmpegTools {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for FfmpegTools {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl FfmpegTools {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// A bare `ffmpeg` invocation that overwrites outputs and only reports errors.
    pub fn ffmpeg(&self) -> ToolCommand {
        let mut cmd = ToolCommand::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]);
        cmd
    }

    async fn probe_json(&self, url: &str) -> PipelineResult<FfprobeOutput> {
        let output = ToolCommand::new(&self.ffprobe)
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(url)
            .execute()
            .await?;
        serde_json::from_str(&output.stdout)
            .map_err(|e| PipelineError::tool("ffprobe", format!("unreadable output: {}", e)))
    }
}

#[async_trait]
impl ProbePort for FfmpegTools {
    async fn duration(&self, url: &str) -> PipelineResult<f64> {
        duration_of(&self.probe_json(url).await?)
    }

    async fn tracks(&self, url: &str) -> PipelineResult<MediaMetadata> {
        tracks_of(&self.probe_json(url).await?)
    }
}

#[async_trait]
impl RemuxPort for FfmpegTools {
    async fn split(
        &self,
        input: &Path,
        segment_seconds: u64,
        output_pattern: &Path,
    ) -> PipelineResult<()> {
        self.ffmpeg()
            .args(split_args(input, segment_seconds, output_pattern))
            .execute()
            .await?;
        Ok(())
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> PipelineResult<()> {
        self.ffmpeg()
            .args(concat_args(manifest, output))
            .execute()
            .await?;
        Ok(())
    }
}

/// Fixed-length chunks, stream copied, each restarting at timestamp zero.
fn split_args(input: &Path, segment_seconds: u64, output_pattern: &Path) -> Vec<OsString> {
    vec![
        "-i".into(),
        path_arg(input),
        "-map".into(),
        "0".into(),
        "-c".into(),
        "copy".into(),
        "-f".into(),
        "segment".into(),
        "-segment_time".into(),
        segment_seconds.to_string().into(),
        "-reset_timestamps".into(),
        "1".into(),
        path_arg(output_pattern),
    ]
}

/// Concat demuxer over a manifest of absolute paths, stream copied.
fn concat_args(manifest: &Path, output: &Path) -> Vec<OsString> {
    vec![
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        path_arg(manifest),
        "-c".into(),
        "copy".into(),
        path_arg(output),
    ]
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    bit_rate: Option<String>,
}

fn duration_of(probe: &FfprobeOutput) -> PipelineResult<f64> {
    probe
        .format
        .as_ref()
        .and_then(|format| format.duration.as_deref())
        .and_then(|duration| duration.trim().parse::<f64>().ok())
        .filter(|duration| duration.is_finite() && *duration >= 0.0)
        .ok_or_else(|| PipelineError::tool("ffprobe", "container reports no duration"))
}

fn tracks_of(probe: &FfprobeOutput) -> PipelineResult<MediaMetadata> {
    let stream_of = |kind: &str| {
        probe
            .streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some(kind))
    };
    let bitrate = |stream: Option<&FfprobeStream>| {
        stream
            .and_then(|stream| stream.bit_rate.as_deref())
            .and_then(|rate| rate.parse().ok())
            .unwrap_or(0)
    };

    let video = stream_of("video")
        .ok_or_else(|| PipelineError::tool("ffprobe", "no video track"))?;
    let (width, height) = match (video.width, video.height) {
        (Some(width), Some(height)) if width > 0 && height > 0 => (width, height),
        _ => return Err(PipelineError::tool("ffprobe", "video track has no dimensions")),
    };

    Ok(MediaMetadata {
        width,
        height,
        video_bitrate: bitrate(Some(video)),
        audio_bitrate: bitrate(stream_of("audio")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> FfprobeOutput {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_tracks_from_probe_output() {
        let probe = parse(
            r#"{
                "streams": [
                    {"index": 0, "codec_type": "audio", "codec_name": "aac", "bit_rate": "128000"},
                    {"index": 1, "codec_type": "video", "codec_name": "h264",
                     "width": 1920, "height": 1080, "bit_rate": "4996000"}
                ],
                "format": {"duration": "634.533333", "format_name": "mov,mp4,m4a,3gp,3g2,mj2"}
            }"#,
        );
        let meta = tracks_of(&probe).unwrap();
        assert_eq!(
            meta,
            MediaMetadata {
                width: 1920,
                height: 1080,
                video_bitrate: 4_996_000,
                audio_bitrate: 128_000,
            }
        );
        assert!((duration_of(&probe).unwrap() - 634.533333).abs() < 1e-9);
    }

    #[test]
    fn test_audio_only_has_no_tracks() {
        let probe = parse(
            r#"{"streams": [{"codec_type": "audio", "bit_rate": "96000"}],
                "format": {"duration": "12.0"}}"#,
        );
        let err = tracks_of(&probe).unwrap_err();
        assert!(err.to_string().contains("no video track"));
    }

    #[test]
    fn test_missing_bitrates_default_to_zero() {
        let probe = parse(r#"{"streams": [{"codec_type": "video", "width": 640, "height": 360}]}"#);
        let meta = tracks_of(&probe).unwrap();
        assert_eq!(meta.video_bitrate, 0);
        assert_eq!(meta.audio_bitrate, 0);
    }

    #[test]
    fn test_duration_needs_format() {
        assert!(duration_of(&parse(r#"{"streams": []}"#)).is_err());
        assert!(duration_of(&parse(r#"{"format": {"duration": "N/A"}}"#)).is_err());
    }

    #[test]
    fn test_split_args() {
        let args = split_args(
            Path::new("/w/movie.mp4"),
            60,
            Path::new("/w/chunks/part%03d_movie.mp4"),
        );
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args.join(" "),
            "-i /w/movie.mp4 -map 0 -c copy -f segment -segment_time 60 \
             -reset_timestamps 1 /w/chunks/part%03d_movie.mp4"
        );
    }

    #[test]
    fn test_concat_args() {
        let args = concat_args(Path::new("/w/manifest.txt"), Path::new("/w/movie.mp4"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args.join(" "),
            "-f concat -safe 0 -i /w/manifest.txt -c copy /w/movie.mp4"
        );
    }
}
