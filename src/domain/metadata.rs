//! Probed track metadata.

use serde::{Deserialize, Serialize};

use super::scaling::{scale_to_fit, Dimensions, ScalingCaps};

/// Track-level facts read from a source by the probing tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub width: u32,
    pub height: u32,
    /// Bits per second, 0 when the container does not report it.
    pub video_bitrate: u64,
    pub audio_bitrate: u64,
}

impl MediaMetadata {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions::new(self.width, self.height)
    }
}

/// Outcome of probing a segment before building its jobs.
///
/// Probing failures degrade to `Unavailable` instead of failing the stage.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbedMetadata {
    Available(MediaMetadata),
    Unavailable { reason: String },
}

impl ProbedMetadata {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    /// Output frame for this source: scaled when known, the fallback otherwise.
    pub fn frame(&self, caps: ScalingCaps) -> Dimensions {
        match self {
            Self::Available(meta) => scale_to_fit(meta.dimensions(), caps),
            Self::Unavailable { .. } => caps.fallback(),
        }
    }
}
