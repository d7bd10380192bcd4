//! Source assets, segments, and the object key layout shared by the stages.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::error::PipelineError;

/// A source video as seen by the segment stage.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceAsset {
    pub bucket: String,
    pub key: String,
    /// Byte size reported by storage.
    pub size: u64,
    /// Container duration in seconds, filled in once probed.
    pub duration: Option<f64>,
}

impl SourceAsset {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// A source is cut only when it is larger than `split_size_limit` and
    /// lasts at least one segment. An unprobed source is never cut.
    pub fn needs_split(&self, split_size_limit: u64, segment_seconds: u64) -> bool {
        match self.duration {
            Some(duration) => self.size > split_size_limit && duration >= segment_seconds as f64,
            None => false,
        }
    }

    /// The whole source, unsplit, as the only segment.
    pub fn as_single_segment(&self) -> Segment {
        Segment {
            key: self.key.clone(),
            ordinal: 0,
            source: self.key.clone(),
        }
    }
}

/// One ordered chunk of a source, or the whole source when no split occurs.
///
/// The ordinal is assigned when the segment is created and is the only
/// field that defines merge order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub key: String,
    pub ordinal: u32,
    /// Key of the source asset this segment was cut from.
    pub source: String,
}

impl Segment {
    pub fn is_first(&self) -> bool {
        self.ordinal == 0
    }

    /// Name of the source asset without directory or extension.
    pub fn original_name(&self) -> &str {
        file_stem(&self.source)
    }

    pub fn stem(&self) -> &str {
        file_stem(&self.key)
    }
}

/// A finished segment output, as reported by the encode stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPart {
    pub key: String,
    pub ordinal: u32,
}

/// A bucket plus key prefix, parsed from `bucket[/prefix]` or `s3://bucket[/prefix]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub bucket: String,
    /// Either empty or ending with `/`.
    pub prefix: String,
}

impl Destination {
    pub fn parse(raw: &str) -> Result<Self, PipelineError> {
        let trimmed = raw.trim().trim_start_matches("s3://").trim_matches('/');
        let (bucket, prefix) = match trimmed.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix.trim_matches('/')),
            None => (trimmed, ""),
        };
        if bucket.is_empty() {
            return Err(PipelineError::InvalidLocation(raw.to_string()));
        }
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };
        Ok(Self {
            bucket: bucket.to_string(),
            prefix,
        })
    }

    /// Object key below this destination.
    pub fn key(&self, rest: &str) -> String {
        format!("{}{}", self.prefix, rest)
    }

    /// `s3://` URI below this destination.
    pub fn uri(&self, rest: &str) -> String {
        format!("s3://{}/{}", self.bucket, self.key(rest))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.prefix)
    }
}

/// Build an `s3://bucket/key` URI.
pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("s3://{}/{}", bucket, key)
}

/// Split an `s3://bucket/key` URI into bucket and key.
pub fn parse_object_uri(uri: &str) -> Result<(String, String), PipelineError> {
    let rest = uri
        .strip_prefix("s3://")
        .ok_or_else(|| PipelineError::InvalidLocation(uri.to_string()))?;
    match rest.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() => Ok((bucket.to_string(), key.to_string())),
        _ => Err(PipelineError::InvalidLocation(uri.to_string())),
    }
}

pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

pub fn file_stem(key: &str) -> &str {
    let name = file_name(key);
    match name.rfind('.') {
        Some(0) | None => name,
        Some(idx) => &name[..idx],
    }
}

pub fn parent_dir(key: &str) -> &str {
    match key.rfind('/') {
        Some(idx) => &key[..idx],
        None => "",
    }
}

/// Key prefix under which the segments of `source_key` are uploaded.
///
/// Every directory component equal to `input_prefix` becomes
/// `<input_prefix>_parts`, and the source stem is appended.
pub fn split_prefix(source_key: &str, input_prefix: &str) -> String {
    let input_prefix = input_prefix.trim_matches('/');
    let dir = parent_dir(source_key)
        .split('/')
        .filter(|component| !component.is_empty())
        .map(|component| {
            if component == input_prefix {
                format!("{}_parts", component)
            } else {
                component.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/");
    let stem = file_stem(source_key);
    if dir.is_empty() {
        format!("{}/", stem)
    } else {
        format!("{}/{}/", dir, stem)
    }
}

/// Key of the merged output for `original_name` below `merged_prefix`.
pub fn merged_key(merged_prefix: &str, original_name: &str) -> String {
    format!(
        "{}/{}/Default/MP4/{}.mp4",
        merged_prefix.trim_matches('/'),
        original_name,
        original_name
    )
}

/// ffmpeg output pattern for the segments of a source file.
pub fn segment_file_pattern(source_file_name: &str) -> String {
    format!("part%03d_{}", source_file_name)
}

/// File name ffmpeg writes for segment `ordinal` of `source_file_name`.
pub fn segment_file_name(ordinal: u32, source_file_name: &str) -> String {
    format!("part{:03}_{}", ordinal, source_file_name)
}

/// Recover the ordinal of a segment file written with [`segment_file_pattern`].
///
/// Padding widens past three digits, so files must be ordered by this value
/// rather than by name.
pub fn segment_file_ordinal(file_name: &str) -> Option<u32> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^part(\d{3,})_").expect("valid regex"));
    pattern
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_split_requires_size_and_duration() {
        let large = SourceAsset::new("media", "input/movie.mp4", 100);
        assert!(!large.needs_split(10, 60));
        assert!(large.clone().with_duration(60.0).needs_split(10, 60));
        assert!(!large.clone().with_duration(59.9).needs_split(10, 60));
        assert!(!large.with_duration(600.0).needs_split(100, 60));
    }

    #[test]
    fn test_split_prefix_swaps_input_component() {
        assert_eq!(
            split_prefix("input/2024/movie.mp4", "input"),
            "input_parts/2024/movie/"
        );
        assert_eq!(split_prefix("movie.mp4", "input"), "movie/");
        assert_eq!(
            split_prefix("uploads/inputs/movie.mov", "input"),
            "uploads/inputs/movie/"
        );
    }

    #[test]
    fn test_segment_names_round_trip_their_ordinal() {
        assert_eq!(segment_file_name(7, "movie.mp4"), "part007_movie.mp4");
        assert_eq!(segment_file_ordinal("part007_movie.mp4"), Some(7));
        assert_eq!(segment_file_ordinal("part1002_movie.mp4"), Some(1002));
        assert_eq!(segment_file_ordinal("movie.mp4"), None);
        assert_eq!(segment_file_ordinal("part7_movie.mp4"), None);
    }

    #[test]
    fn test_destination_parse() {
        let dest = Destination::parse("s3://encoded/renditions/").unwrap();
        assert_eq!(dest.bucket, "encoded");
        assert_eq!(dest.prefix, "renditions/");
        assert_eq!(dest.uri("movie/"), "s3://encoded/renditions/movie/");

        let bare = Destination::parse("encoded").unwrap();
        assert_eq!(bare.prefix, "");
        assert_eq!(bare.key("movie/a.mp4"), "movie/a.mp4");

        assert!(Destination::parse("s3:///").is_err());
    }

    #[test]
    fn test_object_uri_round_trip() {
        let uri = object_uri("bucket", "a/b.mp4");
        assert_eq!(
            parse_object_uri(&uri).unwrap(),
            ("bucket".to_string(), "a/b.mp4".to_string())
        );
        assert!(parse_object_uri("http://bucket/a").is_err());
        assert!(parse_object_uri("s3://bucket").is_err());
    }

    #[test]
    fn test_segment_names() {
        let segment = Segment {
            key: "input_parts/movie/part001_movie.mp4".into(),
            ordinal: 1,
            source: "input/movie.mp4".into(),
        };
        assert_eq!(segment.original_name(), "movie");
        assert_eq!(segment.stem(), "part001_movie");
        assert!(!segment.is_first());

        let whole = SourceAsset::new("b", "input/movie.mp4", 10).as_single_segment();
        assert!(whole.is_first());
        assert_eq!(whole.original_name(), "movie");
    }

    #[test]
    fn test_merged_key_layout() {
        assert_eq!(
            merged_key("output/", "movie"),
            "output/movie/Default/MP4/movie.mp4"
        );
    }
}
