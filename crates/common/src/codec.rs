//! Video codec identifiers and sample-entry fourcc mapping.

use serde::{Deserialize, Serialize};

/// Video codec identifier.
///
/// Only the parameter-set formats carried by `avcC` / `hvcC` boxes are
/// supported; anything else is rejected at extraction time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoCodec {
    H264,
    H265,
}

impl VideoCodec {
    /// Human readable name (for display/logging).
    pub fn display_name(self) -> &'static str {
        match self {
            Self::H264 => "H.264/AVC",
            Self::H265 => "H.265/HEVC",
        }
    }

    /// Default sample-entry fourcc written by the muxer.
    pub fn sample_entry(self) -> [u8; 4] {
        match self {
            Self::H264 => *b"avc1",
            Self::H265 => *b"hvc1",
        }
    }

    /// Fourcc of the decoder configuration box for this codec.
    pub fn config_box(self) -> [u8; 4] {
        match self {
            Self::H264 => *b"avcC",
            Self::H265 => *b"hvcC",
        }
    }

    /// Map a visual sample-entry fourcc to a codec.
    pub fn from_sample_entry(fourcc: [u8; 4]) -> Option<Self> {
        match &fourcc {
            b"avc1" | b"avc3" => Some(Self::H264),
            b"hvc1" | b"hev1" => Some(Self::H265),
            _ => None,
        }
    }
}
