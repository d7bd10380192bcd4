//! Local adapters for single-host deployment.

pub mod command;
pub mod ffmpeg;
pub mod fs;
pub mod transcoder;
pub mod workflow;

pub use ffmpeg::FfmpegTools;
pub use fs::FsAdapter;
pub use transcoder::FfmpegTranscoder;
pub use workflow::InProcessWorkflow;
