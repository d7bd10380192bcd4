//! Splitting a real media file with the ffmpeg tools. Skipped when ffmpeg or
//! ffprobe is not installed.
#![cfg(feature = "local")]

use cadenza::adapters::local::{FfmpegTools, FsAdapter};
use cadenza::application::SegmenterService;
use cadenza::domain::stages::SplitInput;
use cadenza::ports::probe::ProbePort;
use cadenza::ports::storage::StoragePort;
use cadenza::PipelineConfig;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::process::Command;

const CLIP_SECONDS: u64 = 12;
const SEGMENT_SECONDS: u64 = 3;

async fn tool_available(tool: &str) -> bool {
    Command::new(tool)
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Test pattern video with a tone, one keyframe per second.
async fn render_clip(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let duration = CLIP_SECONDS.to_string();
    let status = Command::new("ffmpeg")
        .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"])
        .args(["-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={duration}:size=320x240:rate=25"))
        .args(["-f", "lavfi", "-i"])
        .arg(format!("sine=frequency=440:duration={duration}"))
        .args(["-c:v", "mpeg4", "-g", "25", "-c:a", "aac", "-shortest"])
        .arg(path)
        .status()
        .await
        .unwrap();
    assert!(status.success(), "could not render test clip");
}

fn config(root: &Path) -> Arc<PipelineConfig> {
    let vars: HashMap<&str, String> = HashMap::from([
        ("FILE_SIZE_LIMIT", (1u64 << 30).to_string()),
        ("FILE_SPLIT_SIZE_LIMIT", "1".to_string()),
        ("SEGMENT_DURATION", SEGMENT_SECONDS.to_string()),
        ("INPUT_CONTENTS_PATH", "input".to_string()),
        ("ENCODED_FILE_DESTINATION", "media/encoded".to_string()),
        ("THUMBNAIL_DESTINATION", "media/thumbnails".to_string()),
        ("MERGED_DESTINATION", "output".to_string()),
        ("WORK_DIR", root.join("work").display().to_string()),
    ]);
    Arc::new(PipelineConfig::from_lookup(|key| vars.get(key).cloned()).unwrap())
}

#[tokio::test]
async fn test_split_cuts_real_clip_into_ordered_segments() {
    if !tool_available("ffmpeg").await || !tool_available("ffprobe").await {
        eprintln!("ffmpeg not installed, skipping");
        return;
    }

    let root = TempDir::new().unwrap();
    let store = FsAdapter::new(root.path().join("store"));
    render_clip(&root.path().join("store/media/input/clip.mp4")).await;

    let tools = FfmpegTools::default();
    let segmenter =
        SegmenterService::new(store.clone(), tools.clone(), tools.clone(), config(root.path()));
    let output = segmenter
        .split(&SplitInput {
            bucket: "media".into(),
            key: "input/clip.mp4".into(),
        })
        .await
        .unwrap();

    let expected = CLIP_SECONDS.div_ceil(SEGMENT_SECONDS) as usize;
    let count = output.parts.len();
    assert!(
        (expected - 1..=expected + 1).contains(&count),
        "expected about {expected} segments, got {count}"
    );

    let ordinals: Vec<u32> = output.parts.iter().map(|part| part.ordinal).collect();
    assert_eq!(ordinals, (0..count as u32).collect::<Vec<_>>());

    let mut total = 0.0;
    for part in &output.parts {
        assert!(part.key.starts_with("input_parts/clip/"), "{}", part.key);
        assert_eq!(part.source, "input/clip.mp4");
        assert!(store.head_object("media", &part.key).await.unwrap().is_some());
        let path = store.object_path("media", &part.key).unwrap();
        total += tools.duration(&path.display().to_string()).await.unwrap();
    }
    assert!(
        (total - CLIP_SECONDS as f64).abs() < 1.0,
        "segments last {total}s in total"
    );

    // The work directory is cleaned up after the split.
    let leftovers = std::fs::read_dir(root.path().join("work"))
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(leftovers, 0);
}
