//! Error types shared by every stage.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised by object storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Presign failed: {0}")]
    PresignFailed(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

/// Coarse classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or configuration. Never retried.
    Precondition,
    /// Probing, splitting or concatenation tool failed.
    ExternalTool,
    /// The completion deadline passed.
    Timeout,
    /// The caller aborted the wait.
    Cancelled,
    /// Storage, filesystem or serialization failure.
    Infrastructure,
}

/// Errors surfaced by the controller stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("size exceeds limit: {size} bytes > {limit} bytes")]
    SizeExceedsLimit { size: u64, limit: u64 },

    #[error("no data")]
    NoData,

    #[error("unknown output group type: {0}")]
    UnknownOutputGroupType(String),

    #[error("duplicate segment ordinal: {0}")]
    DuplicateOrdinal(u32),

    #[error("invalid object location: {0}")]
    InvalidLocation(String),

    #[error("unsupported job setting: {0}")]
    UnsupportedSetting(String),

    #[error("{tool} failed: {diagnostic}")]
    Tool { tool: String, diagnostic: String },

    #[error("incomplete parts: {missing} of {expected} outputs still missing")]
    IncompleteParts { missing: usize, expected: usize },

    #[error("cancelled while waiting for parts")]
    Cancelled,

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Create an external tool failure carrying the tool's diagnostic text.
    pub fn tool(tool: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.into(),
            diagnostic: diagnostic.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SizeExceedsLimit { .. }
            | Self::NoData
            | Self::UnknownOutputGroupType(_)
            | Self::DuplicateOrdinal(_)
            | Self::InvalidLocation(_)
            | Self::UnsupportedSetting(_) => ErrorKind::Precondition,
            Self::Tool { .. } => ErrorKind::ExternalTool,
            Self::IncompleteParts { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Storage(_) | Self::Io(_) | Self::Json(_) => ErrorKind::Infrastructure,
        }
    }

    /// Stable reason string reported in failed stage results.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::SizeExceedsLimit { .. } => "size exceeds limit",
            Self::NoData => "no data",
            Self::UnknownOutputGroupType(_) => "unknown output group type",
            Self::DuplicateOrdinal(_) => "duplicate segment ordinal",
            Self::InvalidLocation(_) => "invalid object location",
            Self::UnsupportedSetting(_) => "unsupported job setting",
            Self::Tool { .. } => "tool failed",
            Self::IncompleteParts { .. } => "incomplete parts",
            Self::Cancelled => "cancelled",
            Self::Storage(_) => "storage error",
            Self::Io(_) => "io error",
            Self::Json(_) => "invalid json",
        }
    }
}
