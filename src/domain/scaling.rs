//! Aspect-preserving output scaling with even dimensions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

/// Output size limits.
///
/// `long_edge` caps the longer side of the source, whichever orientation it
/// has. `short_edge` together with `long_edge` is the landscape frame used
/// when the source could not be probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingCaps {
    pub long_edge: u32,
    pub short_edge: u32,
}

impl Default for ScalingCaps {
    fn default() -> Self {
        Self {
            long_edge: 960,
            short_edge: 540,
        }
    }
}

impl ScalingCaps {
    /// Dimensions used when source metadata is unavailable.
    pub fn fallback(&self) -> Dimensions {
        Dimensions::new(self.long_edge, self.short_edge)
    }
}

/// Scale `native` so its long edge fits `caps.long_edge`.
///
/// The scaled short edge is rounded to the nearest integer; both output
/// edges are then rounded up to the next even value.
pub fn scale_to_fit(native: Dimensions, caps: ScalingCaps) -> Dimensions {
    let (long, short) = if native.is_portrait() {
        (native.height, native.width)
    } else {
        (native.width, native.height)
    };

    let (long, short) = if long > caps.long_edge {
        (caps.long_edge, rounded_ratio(short, caps.long_edge, long))
    } else {
        (long, short)
    };

    let (long, short) = (even_up(long), even_up(short));
    if native.is_portrait() {
        Dimensions::new(short, long)
    } else {
        Dimensions::new(long, short)
    }
}

/// `value * numerator / denominator`, rounded half up.
fn rounded_ratio(value: u32, numerator: u32, denominator: u32) -> u32 {
    let denominator = u64::from(denominator.max(1));
    let scaled = (u64::from(value) * u64::from(numerator) + denominator / 2) / denominator;
    scaled as u32
}

fn even_up(value: u32) -> u32 {
    value + (value % 2)
}
