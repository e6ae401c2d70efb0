//! Core types with newtype pattern for type safety, plus time-base math.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Microseconds per second; the common time base of every Frame and Chunk.
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Position of a sample in the source track (decode order).
///
/// Assigned when a `Sample` is created and carried unchanged through the
/// `Frame` and `Chunk` derived from it. Doubles as the completion ticket
/// inside the codec stages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceIndex(pub u64);

impl SequenceIndex {
    pub const ZERO: Self = Self(0);

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SequenceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Video/image resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD: Self = Self {
        width: 1920,
        height: 1080,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Byte size for NV12 pixel data (Y plane + interleaved UV at half res).
    ///
    /// Odd dimensions round the chroma plane up.
    pub fn nv12_byte_size(self) -> usize {
        let w = self.width as usize;
        let h = self.height as usize;
        let y_size = w * h;
        let uv_size = w.div_ceil(2) * 2 * h.div_ceil(2);
        y_size + uv_size
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Lifecycle of a codec stage.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageState {
    Unconfigured,
    Configured,
    /// At least one input submitted. The encode stage uses it too.
    Decoding,
    Draining,
    Closed,
}

impl StageState {
    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }

    /// Whether `submit` is legal in this state.
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Configured | Self::Decoding)
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unconfigured => "unconfigured",
            Self::Configured => "configured",
            Self::Decoding => "decoding",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ─── Time-base conversion ───────────────────────────────────────────

/// Integer division rounding half away from zero.
fn div_round(num: i128, den: i128) -> i128 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

/// Convert a value in track ticks to microseconds:
/// `round(1e6 * value / time_scale)`.
///
/// A zero time scale yields 0; callers reject such tracks earlier.
pub fn ticks_to_micros(value: i64, time_scale: u32) -> i64 {
    if time_scale == 0 {
        return 0;
    }
    let us = div_round(value as i128 * MICROS_PER_SEC as i128, time_scale as i128);
    us.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Convert microseconds back to track ticks:
/// `round(value * time_scale / 1e6)`.
pub fn micros_to_ticks(value: i64, time_scale: u32) -> i64 {
    let ticks = div_round(value as i128 * time_scale as i128, MICROS_PER_SEC as i128);
    ticks.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Duration flavour of [`ticks_to_micros`].
pub fn duration_to_micros(ticks: u64, time_scale: u32) -> u64 {
    ticks_to_micros(ticks.min(i64::MAX as u64) as i64, time_scale).max(0) as u64
}

/// Duration flavour of [`micros_to_ticks`].
pub fn duration_to_ticks(micros: u64, time_scale: u32) -> u64 {
    micros_to_ticks(micros.min(i64::MAX as u64) as i64, time_scale).max(0) as u64
}
