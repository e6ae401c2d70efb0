//! Data flowing through the pipeline: Sample → Frame → Chunk, plus the
//! track metadata and parameter set that configure the codec stages.

use std::fmt;
use std::sync::Arc;

use crate::buffer::PooledBuffer;
use crate::codec::VideoCodec;
use crate::types::{duration_to_micros, ticks_to_micros, Resolution, SequenceIndex};

/// Metadata for one video track of the source container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub track_id: u32,
    pub codec: VideoCodec,
    /// Sample-entry fourcc as found in `stsd` (avc1, avc3, hvc1, hev1).
    pub sample_entry: [u8; 4],
    /// Coded width/height from the visual sample entry.
    pub resolution: Resolution,
    /// Media time scale (ticks per second) from `mdhd`.
    pub time_scale: u32,
    /// Media duration in ticks.
    pub duration: u64,
    pub sample_count: u32,
}

impl TrackDescriptor {
    pub fn duration_us(&self) -> u64 {
        duration_to_micros(self.duration, self.time_scale)
    }
}

/// Decoder configuration bytes shared by both codec stages.
///
/// `description` is the codec configuration box (`avcC` / `hvcC`) with
/// its 8-byte box header stripped.
#[derive(Clone, PartialEq, Eq)]
pub struct ParameterSet {
    pub codec: VideoCodec,
    pub sample_entry: [u8; 4],
    pub description: Arc<[u8]>,
}

impl ParameterSet {
    pub fn new(codec: VideoCodec, sample_entry: [u8; 4], description: impl Into<Arc<[u8]>>) -> Self {
        Self {
            codec,
            sample_entry,
            description: description.into(),
        }
    }

    /// Codec identifier string as used at the codec configuration boundary
    /// (RFC 6381 style), e.g. `avc1.64001f` or `hvc1.1.6.L93.B0`.
    pub fn codec_string(&self) -> String {
        let entry = String::from_utf8_lossy(&self.sample_entry).into_owned();
        let d = &self.description;
        match self.codec {
            VideoCodec::H264 => {
                if d.len() < 4 {
                    return entry;
                }
                format!("{entry}.{:02x}{:02x}{:02x}", d[1], d[2], d[3])
            }
            VideoCodec::H265 => {
                if d.len() < 13 {
                    return entry;
                }
                let profile_space = match d[1] >> 6 {
                    1 => "A",
                    2 => "B",
                    3 => "C",
                    _ => "",
                };
                let tier = if d[1] & 0x20 != 0 { 'H' } else { 'L' };
                let profile_idc = d[1] & 0x1F;
                let compat = u32::from_be_bytes([d[2], d[3], d[4], d[5]]).reverse_bits();
                let level = d[12];

                let mut s = format!("{entry}.{profile_space}{profile_idc}.{compat:X}.{tier}{level}");
                let constraints = &d[6..12];
                let used = constraints
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |last| last + 1);
                for byte in &constraints[..used] {
                    s.push_str(&format!(".{byte:X}"));
                }
                s
            }
        }
    }

    /// NAL length-prefix size declared by the configuration record.
    pub fn nal_length_size(&self) -> usize {
        nal_length_size(self.codec, &self.description)
    }
}

/// NAL length-prefix size encoded in an avcC/hvcC payload; 4 when the
/// record is too short to say.
pub fn nal_length_size(codec: VideoCodec, description: &[u8]) -> usize {
    let byte = match codec {
        VideoCodec::H264 => description.get(4),
        VideoCodec::H265 => description.get(21),
    };
    byte.map_or(4, |b| (b & 0x03) as usize + 1)
}

impl fmt::Debug for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterSet")
            .field("codec", &self.codec)
            .field("codec_string", &self.codec_string())
            .field("description_len", &self.description.len())
            .finish()
    }
}

/// One compressed access unit from the source track.
#[derive(Clone, Debug)]
pub struct Sample {
    pub sequence: SequenceIndex,
    pub data: Vec<u8>,
    /// Decode timestamp in track ticks.
    pub dts: u64,
    /// Composition timestamp in track ticks.
    pub cts: i64,
    /// Duration in track ticks.
    pub duration: u32,
    pub is_sync: bool,
    pub time_scale: u32,
}

impl Sample {
    /// Composition timestamp in microseconds.
    pub fn timestamp_us(&self) -> i64 {
        ticks_to_micros(self.cts, self.time_scale)
    }

    pub fn duration_us(&self) -> u64 {
        duration_to_micros(self.duration as u64, self.time_scale)
    }
}

/// One decoded NV12 image.
///
/// The pixel buffer belongs to the decoder's frame pool and goes back to
/// it when the frame is released (or dropped).
pub struct Frame {
    buffer: PooledBuffer,
    resolution: Resolution,
    timestamp_us: i64,
    duration_us: u64,
    sequence: SequenceIndex,
    source_sync: bool,
}

impl Frame {
    pub fn new(
        buffer: PooledBuffer,
        resolution: Resolution,
        timestamp_us: i64,
        duration_us: u64,
        sequence: SequenceIndex,
        source_sync: bool,
    ) -> Self {
        Self {
            buffer,
            resolution,
            timestamp_us,
            duration_us,
            sequence,
            source_sync,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    pub fn sequence(&self) -> SequenceIndex {
        self.sequence
    }

    /// Whether the sample this frame was decoded from was a sync sample.
    pub fn source_sync(&self) -> bool {
        self.source_sync
    }

    /// Return the pixel buffer to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("resolution", &self.resolution)
            .field("timestamp_us", &self.timestamp_us)
            .field("duration_us", &self.duration_us)
            .finish()
    }
}

/// One re-encoded access unit ready for muxing.
pub struct Chunk {
    data: PooledBuffer,
    is_keyframe: bool,
    timestamp_us: i64,
    duration_us: u64,
    sequence: SequenceIndex,
}

impl Chunk {
    pub fn new(
        data: PooledBuffer,
        is_keyframe: bool,
        timestamp_us: i64,
        duration_us: u64,
        sequence: SequenceIndex,
    ) -> Self {
        Self {
            data,
            is_keyframe,
            timestamp_us,
            duration_us,
            sequence,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_keyframe(&self) -> bool {
        self.is_keyframe
    }

    pub fn timestamp_us(&self) -> i64 {
        self.timestamp_us
    }

    pub fn duration_us(&self) -> u64 {
        self.duration_us
    }

    pub fn sequence(&self) -> SequenceIndex {
        self.sequence
    }

    /// Return the compressed buffer to its pool.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chunk")
            .field("sequence", &self.sequence)
            .field("len", &self.data.len())
            .field("keyframe", &self.is_keyframe)
            .field("timestamp_us", &self.timestamp_us)
            .finish()
    }
}
