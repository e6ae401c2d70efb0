//! The container writer contract shared by both output layouts.
//!
//! The pipeline only ever sees a `Box<dyn ContainerWriter>` built by
//! [`create_writer`]; which layout ends up in the output is decided by
//! the [`WriterKind`] alone.

use std::fmt;
use std::sync::Arc;

use rc_common::{
    micros_to_ticks, Chunk, FragmentConfig, ParameterSet, Resolution, VideoCodec, WriterKind,
};

use crate::error::{MuxError, MuxResult};
use crate::fragmented::FragmentedWriter;
use crate::progressive::ProgressiveWriter;

/// Identifies a track inside one writer (the MP4 track id).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrackHandle(pub u32);

impl fmt::Display for TrackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track {}", self.0)
    }
}

/// Everything the writer needs to describe the output video track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackConfig {
    pub codec: VideoCodec,
    /// Sample-entry fourcc written into `stsd` (avc1, avc3, hvc1, hev1).
    pub sample_entry: [u8; 4],
    pub resolution: Resolution,
    /// Media time scale (ticks per second).
    pub time_scale: u32,
    /// Configuration box payload (avcC / hvcC without its header).
    pub description: Arc<[u8]>,
}

impl TrackConfig {
    pub fn new(params: &ParameterSet, resolution: Resolution, time_scale: u32) -> Self {
        Self {
            codec: params.codec,
            sample_entry: params.sample_entry,
            resolution,
            time_scale,
            description: Arc::clone(&params.description),
        }
    }

    /// Reject configurations that cannot be written.
    pub fn validate(&self) -> MuxResult<()> {
        match VideoCodec::from_sample_entry(self.sample_entry) {
            Some(codec) if codec == self.codec => {}
            _ => {
                return Err(MuxError::UnsupportedCodec(format!(
                    "sample entry '{}' for {}",
                    String::from_utf8_lossy(&self.sample_entry),
                    self.codec.display_name()
                )))
            }
        }
        if self.time_scale == 0 {
            return Err(MuxError::InvalidConfig("time scale must be > 0".into()));
        }
        if self.resolution.is_empty()
            || self.resolution.width > u16::MAX as u32
            || self.resolution.height > u16::MAX as u32
        {
            return Err(MuxError::InvalidConfig(format!(
                "unsupported track size {}",
                self.resolution
            )));
        }
        if self.description.is_empty() {
            return Err(MuxError::InvalidConfig(
                "empty codec configuration record".into(),
            ));
        }
        Ok(())
    }
}

/// Per-sample bookkeeping kept by the writers, in track ticks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleInfo {
    /// Absolute byte offset in the output (progressive layout only).
    pub offset: u64,
    pub size: u32,
    pub duration: u32,
    /// Composition time minus decode time.
    pub composition_offset: i32,
    pub is_sync: bool,
}

/// Decode-time clock for one track: turns chunk µs timing into ticks.
///
/// Decode times are the running sum of durations; the composition
/// offset is whatever separates the chunk's timestamp from that.
#[derive(Clone, Debug)]
pub(crate) struct TrackClock {
    time_scale: u32,
    next_dts: u64,
}

impl TrackClock {
    pub(crate) fn new(time_scale: u32) -> Self {
        Self {
            time_scale,
            next_dts: 0,
        }
    }

    /// Decode time the next sample will get.
    pub(crate) fn next_dts(&self) -> u64 {
        self.next_dts
    }

    /// Advance past `chunk`, returning its (duration, composition offset).
    pub(crate) fn advance(&mut self, chunk: &Chunk) -> MuxResult<(u32, i32)> {
        let duration = micros_to_ticks(chunk.duration_us().min(i64::MAX as u64) as i64, self.time_scale);
        let duration = u32::try_from(duration).map_err(|_| {
            MuxError::BufferFull(format!(
                "sample {} lasts {duration} ticks",
                chunk.sequence()
            ))
        })?;
        let cts = micros_to_ticks(chunk.timestamp_us(), self.time_scale);
        let offset = cts as i128 - self.next_dts as i128;
        let offset = i32::try_from(offset).map_err(|_| {
            MuxError::BufferFull(format!(
                "sample {} composition offset {offset} does not fit",
                chunk.sequence()
            ))
        })?;
        self.next_dts += duration as u64;
        Ok((duration, offset))
    }
}

/// A container writer backend.
pub trait ContainerWriter: Send {
    /// Layout this writer produces.
    fn kind(&self) -> WriterKind;

    /// Declare the (single) video track.
    fn add_track(&mut self, config: TrackConfig) -> MuxResult<TrackHandle>;

    /// Append one chunk. The payload is copied and the chunk released,
    /// on success and on error alike.
    fn add_chunk(&mut self, track: TrackHandle, chunk: Chunk) -> MuxResult<()>;

    /// Complete the container and hand back its bytes.
    fn finalize(&mut self) -> MuxResult<Vec<u8>>;

    /// Drop everything written so far. The writer is finished afterwards.
    fn discard(&mut self);

    /// Chunks accepted so far.
    fn chunk_count(&self) -> u64;
}

/// Build the writer backend selected by `kind`.
pub fn create_writer(kind: WriterKind, fragment: FragmentConfig) -> Box<dyn ContainerWriter> {
    match kind {
        WriterKind::Fragmented => Box::new(FragmentedWriter::new(fragment)),
        WriterKind::Progressive => Box::new(ProgressiveWriter::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_common::{BufferPool, SequenceIndex};

    fn config() -> TrackConfig {
        let params = ParameterSet::new(VideoCodec::H264, *b"avc1", vec![1, 0x64, 0, 0x1F, 0xFF]);
        TrackConfig::new(&params, Resolution::new(64, 48), 30_000)
    }

    #[test]
    fn validates_sample_entry_against_codec() {
        config().validate().unwrap();

        let mut bad = config();
        bad.sample_entry = *b"hvc1";
        assert!(matches!(bad.validate(), Err(MuxError::UnsupportedCodec(_))));

        let mut bad = config();
        bad.sample_entry = *b"mp4v";
        assert!(matches!(bad.validate(), Err(MuxError::UnsupportedCodec(_))));

        let mut bad = config();
        bad.time_scale = 0;
        assert!(matches!(bad.validate(), Err(MuxError::InvalidConfig(_))));
    }

    #[test]
    fn clock_tracks_decode_time_and_offsets() {
        let pool = BufferPool::new("chunks", 2);
        let mut clock = TrackClock::new(30_000);
        // I P B order: B is shown before P
        let timing = [(0i64, true), (66_733, false), (33_367, false)];
        let mut out = Vec::new();
        for (i, (ts, key)) in timing.iter().enumerate() {
            let chunk = Chunk::new(pool.acquire(1), *key, *ts, 33_367, SequenceIndex(i as u64));
            out.push(clock.advance(&chunk).unwrap());
        }
        assert_eq!(out, vec![(1001, 0), (1001, 1001), (1001, -1001)]);
        assert_eq!(clock.next_dts(), 3003);
    }

    #[test]
    fn factory_selects_backend() {
        let writer = create_writer(WriterKind::Fragmented, FragmentConfig::default());
        assert_eq!(writer.kind(), WriterKind::Fragmented);
        let writer = create_writer(WriterKind::Progressive, FragmentConfig::default());
        assert_eq!(writer.kind(), WriterKind::Progressive);
    }
}
