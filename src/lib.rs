//! Cadenza - Segmented Video Transcoding
//!
//! Splits a large source into segments, fans the segments out to a
//! transcoding engine, waits for every encoded part and merges them back.
//!
//! Hexagonal Architecture:
//! - domain/: Pure business logic (asset keys, scaling, job templates, stage records)
//! - ports/: Trait definitions
//! - adapters/: Concrete implementations
//! - application/: Generic services (segment, encode, completion, merge, trigger)
//! - config: Environment configuration
//! - workspace: Scoped temporary storage
//!
//! # Features
//! - `local`: Single-host deployment (filesystem store, ffmpeg, in-process workflow)
//! - `aws`: S3, MediaConvert and Step Functions adapters

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod workspace;

// Re-exports for convenience
pub use config::{ConfigError, PipelineConfig, PollPolicy};
pub use domain::stages::StageResult;
pub use error::{PipelineError, PipelineResult, StorageError};

#[cfg(feature = "local")]
pub use config::LocalConfig;

#[cfg(feature = "aws")]
pub use config::AwsConfig;
