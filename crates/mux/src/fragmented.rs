//! Fragmented MP4 writer: an init segment (ftyp + moov with mvex)
//! followed by moof/mdat pairs.
//!
//! Fragments are cut at keyframes once the buffered duration reaches
//! the configured target, or unconditionally when the buffered chunk
//! count reaches its limit.

use std::io::Cursor;

use rc_common::{Chunk, FragmentConfig, WriterKind};
use tracing::{debug, info};

use crate::error::{MuxError, MuxResult};
use crate::fragment::write_fragment;
use crate::mp4::{write_ftyp, write_moov, FileBrand, TrackLayout};
use crate::writer::{ContainerWriter, SampleInfo, TrackClock, TrackConfig, TrackHandle};

const TRACK_ID: u32 = 1;

/// Writes an fMP4 stream into memory, one fragment at a time.
pub struct FragmentedWriter {
    config: FragmentConfig,
    clock: Option<TrackClock>,
    out: Cursor<Vec<u8>>,
    pending: Vec<SampleInfo>,
    pending_payload: Vec<u8>,
    pending_duration_us: u64,
    fragment_base_dts: u64,
    next_sequence: u32,
    chunks: u64,
    finished: bool,
}

impl FragmentedWriter {
    pub fn new(config: FragmentConfig) -> Self {
        Self {
            config,
            clock: None,
            out: Cursor::new(Vec::new()),
            pending: Vec::new(),
            pending_payload: Vec::new(),
            pending_duration_us: 0,
            fragment_base_dts: 0,
            next_sequence: 1,
            chunks: 0,
            finished: false,
        }
    }

    /// Fragments written so far.
    pub fn fragment_count(&self) -> u32 {
        self.next_sequence - 1
    }

    /// Chunks waiting for the current fragment to be cut.
    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    fn flush_fragment(&mut self) -> MuxResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let sequence = self.next_sequence;
        write_fragment(
            &mut self.out,
            sequence,
            TRACK_ID,
            self.fragment_base_dts,
            &self.pending,
            &self.pending_payload,
        )?;
        debug!(
            sequence,
            samples = self.pending.len(),
            bytes = self.pending_payload.len(),
            duration_us = self.pending_duration_us,
            base_dts = self.fragment_base_dts,
            "Fragment written"
        );

        self.next_sequence += 1;
        self.pending.clear();
        self.pending_payload.clear();
        self.pending_duration_us = 0;
        if let Some(clock) = &self.clock {
            self.fragment_base_dts = clock.next_dts();
        }
        Ok(())
    }
}

impl ContainerWriter for FragmentedWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Fragmented
    }

    fn add_track(&mut self, config: TrackConfig) -> MuxResult<TrackHandle> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        if self.clock.is_some() {
            return Err(MuxError::TrackError(
                "only one video track is supported".into(),
            ));
        }
        config.validate()?;

        write_ftyp(&mut self.out, FileBrand::Fragmented, &config.sample_entry)?;
        let layout = TrackLayout {
            track_id: TRACK_ID,
            config: &config,
            duration: 0,
            samples: &[],
        };
        write_moov(&mut self.out, &layout, true)?;
        debug!(
            codec = config.codec.display_name(),
            resolution = %config.resolution,
            init_bytes = self.out.get_ref().len(),
            "Init segment written"
        );

        self.clock = Some(TrackClock::new(config.time_scale));
        Ok(TrackHandle(TRACK_ID))
    }

    fn add_chunk(&mut self, track: TrackHandle, chunk: Chunk) -> MuxResult<()> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        if self.clock.is_none() || track.0 != TRACK_ID {
            return Err(MuxError::UnknownTrack(track.0));
        }

        if chunk.is_keyframe()
            && !self.pending.is_empty()
            && self.pending_duration_us >= self.config.target_duration_us
        {
            self.flush_fragment()?;
        }

        let size = u32::try_from(chunk.len())
            .map_err(|_| MuxError::BufferFull(format!("chunk {} too large", chunk.sequence())))?;
        let clock = self
            .clock
            .as_mut()
            .ok_or(MuxError::UnknownTrack(track.0))?;
        let (duration, composition_offset) = clock.advance(&chunk)?;
        self.pending.push(SampleInfo {
            offset: 0,
            size,
            duration,
            composition_offset,
            is_sync: chunk.is_keyframe(),
        });
        self.pending_payload.extend_from_slice(chunk.data());
        self.pending_duration_us += chunk.duration_us();
        self.chunks += 1;
        chunk.release();

        if self.pending.len() >= self.config.max_chunks.max(1) {
            self.flush_fragment()?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> MuxResult<Vec<u8>> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        if self.clock.is_none() {
            return Err(MuxError::TrackError("no track was added".into()));
        }
        self.flush_fragment()?;
        self.finished = true;

        let bytes = std::mem::take(self.out.get_mut());
        info!(
            fragments = self.fragment_count(),
            chunks = self.chunks,
            bytes = bytes.len(),
            "Fragmented MP4 finalized"
        );
        Ok(bytes)
    }

    fn discard(&mut self) {
        debug!(
            fragments = self.fragment_count(),
            pending = self.pending.len(),
            "Fragmented writer discarded"
        );
        self.out = Cursor::new(Vec::new());
        self.pending.clear();
        self.pending_payload = Vec::new();
        self.chunks = 0;
        self.finished = true;
    }

    fn chunk_count(&self) -> u64 {
        self.chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rc_common::{BufferPool, ParameterSet, Resolution, SequenceIndex, VideoCodec};

    fn config() -> TrackConfig {
        let params = ParameterSet::new(
            VideoCodec::H265,
            *b"hvc1",
            vec![1u8; 23],
        );
        TrackConfig::new(&params, Resolution::new(64, 48), 90_000)
    }

    /// Top-level boxes as (type, size).
    fn top_level(buf: &[u8]) -> Vec<(String, usize)> {
        let mut boxes = Vec::new();
        let mut pos = 0;
        while pos + 8 <= buf.len() {
            let size = u32::from_be_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            boxes.push((String::from_utf8_lossy(&buf[pos + 4..pos + 8]).into_owned(), size));
            pos += size;
        }
        assert_eq!(pos, buf.len());
        boxes
    }

    fn feed(writer: &mut FragmentedWriter, pool: &BufferPool, keys: &[bool]) {
        let track = TrackHandle(TRACK_ID);
        for (i, &key) in keys.iter().enumerate() {
            let data = pool.acquire_copy(&[i as u8; 4]);
            let chunk = Chunk::new(data, key, i as i64 * 500_000, 500_000, SequenceIndex(i as u64));
            writer.add_chunk(track, chunk).unwrap();
        }
    }

    #[test]
    fn cuts_fragments_at_keyframes_after_target() {
        let pool = BufferPool::new("chunks", 4);
        let mut writer = FragmentedWriter::new(FragmentConfig {
            target_duration_us: 1_000_000,
            max_chunks: 100,
        });
        writer.add_track(config()).unwrap();
        // keyframe every 3 chunks of 0.5 s: cut before chunks 3 and 6
        feed(&mut writer, &pool, &[true, false, false, true, false, false, true, false]);
        assert_eq!(writer.fragment_count(), 2);
        assert_eq!(writer.pending_chunks(), 2);

        let bytes = writer.finalize().unwrap();
        let names: Vec<String> = top_level(&bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            vec!["ftyp", "moov", "moof", "mdat", "moof", "mdat", "moof", "mdat"]
        );
        assert_eq!(writer.chunk_count(), 8);
        assert!(pool.stats().is_balanced());
    }

    #[test]
    fn max_chunks_forces_a_cut() {
        let pool = BufferPool::new("chunks", 4);
        let mut writer = FragmentedWriter::new(FragmentConfig {
            target_duration_us: 60_000_000,
            max_chunks: 2,
        });
        writer.add_track(config()).unwrap();
        feed(&mut writer, &pool, &[true, false, false, false, false]);
        assert_eq!(writer.fragment_count(), 2);

        let bytes = writer.finalize().unwrap();
        let mdats: Vec<usize> = top_level(&bytes)
            .into_iter()
            .filter(|(n, _)| n == "mdat")
            .map(|(_, size)| size)
            .collect();
        assert_eq!(mdats, vec![16, 16, 12]);
    }

    #[test]
    fn second_fragment_starts_at_running_decode_time() {
        let pool = BufferPool::new("chunks", 4);
        let mut writer = FragmentedWriter::new(FragmentConfig {
            target_duration_us: 500_000,
            max_chunks: 10,
        });
        writer.add_track(config()).unwrap();
        feed(&mut writer, &pool, &[true, true]);
        let bytes = writer.finalize().unwrap();

        let tfdts: Vec<u64> = bytes
            .windows(4)
            .enumerate()
            .filter(|(_, w)| *w == b"tfdt")
            .map(|(i, _)| u64::from_be_bytes(bytes[i + 8..i + 16].try_into().unwrap()))
            .collect();
        // 0.5 s at 90 kHz
        assert_eq!(tfdts, vec![0, 45_000]);
    }

    #[test]
    fn init_segment_only_when_no_chunks() {
        let mut writer = FragmentedWriter::new(FragmentConfig::default());
        writer.add_track(config()).unwrap();
        let bytes = writer.finalize().unwrap();
        let names: Vec<String> = top_level(&bytes).into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["ftyp", "moov"]);
        assert!(matches!(writer.finalize(), Err(MuxError::Finished)));
    }

    #[test]
    fn chunk_before_track_is_rejected_and_released() {
        let pool = BufferPool::new("chunks", 4);
        let mut writer = FragmentedWriter::new(FragmentConfig::default());
        let chunk = Chunk::new(pool.acquire(3), true, 0, 1, SequenceIndex::ZERO);
        assert!(matches!(
            writer.add_chunk(TrackHandle(TRACK_ID), chunk),
            Err(MuxError::UnknownTrack(1))
        ));
        assert!(pool.stats().is_balanced());
    }

    #[test]
    fn discard_finishes_the_writer() {
        let pool = BufferPool::new("chunks", 4);
        let mut writer = FragmentedWriter::new(FragmentConfig::default());
        writer.add_track(config()).unwrap();
        feed(&mut writer, &pool, &[true, false]);
        writer.discard();
        assert_eq!(writer.chunk_count(), 0);
        assert!(matches!(writer.finalize(), Err(MuxError::Finished)));
        assert!(pool.stats().is_balanced());
    }
}
