//! Single-finalize MP4 writer: ftyp, one mdat, then moov.
//!
//! Chunk payloads are buffered in memory; the sample tables are built
//! and the whole file is laid out only when `finalize` is called.

use std::io::Cursor;

use rc_common::{Chunk, WriterKind};
use tracing::{debug, info};

use crate::atoms::{large_box_size_placeholder, fill_large_box_size, write_box_header};
use crate::error::{MuxError, MuxResult};
use crate::mp4::{write_ftyp, write_moov, FileBrand, TrackLayout};
use crate::writer::{ContainerWriter, SampleInfo, TrackClock, TrackConfig, TrackHandle};

/// Track id of the only track this writer produces.
const TRACK_ID: u32 = 1;

struct OpenTrack {
    config: TrackConfig,
    clock: TrackClock,
}

/// Buffers every chunk and writes a classic moov-at-end MP4.
pub struct ProgressiveWriter {
    track: Option<OpenTrack>,
    samples: Vec<SampleInfo>,
    /// Concatenated sample data; offsets in `samples` are relative to it
    /// until finalize.
    payload: Vec<u8>,
    finished: bool,
}

impl ProgressiveWriter {
    pub fn new() -> Self {
        Self {
            track: None,
            samples: Vec::new(),
            payload: Vec::new(),
            finished: false,
        }
    }

    /// Bytes of sample data buffered so far.
    pub fn buffered_bytes(&self) -> usize {
        self.payload.len()
    }

    fn check_open(&self) -> MuxResult<()> {
        if self.finished {
            return Err(MuxError::Finished);
        }
        Ok(())
    }
}

impl Default for ProgressiveWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerWriter for ProgressiveWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::Progressive
    }

    fn add_track(&mut self, config: TrackConfig) -> MuxResult<TrackHandle> {
        self.check_open()?;
        if self.track.is_some() {
            return Err(MuxError::TrackError(
                "only one video track is supported".into(),
            ));
        }
        config.validate()?;
        debug!(
            codec = config.codec.display_name(),
            resolution = %config.resolution,
            time_scale = config.time_scale,
            "Progressive track added"
        );
        self.track = Some(OpenTrack {
            clock: TrackClock::new(config.time_scale),
            config,
        });
        Ok(TrackHandle(TRACK_ID))
    }

    fn add_chunk(&mut self, track: TrackHandle, chunk: Chunk) -> MuxResult<()> {
        self.check_open()?;
        let open = match self.track.as_mut() {
            Some(open) if track.0 == TRACK_ID => open,
            _ => return Err(MuxError::UnknownTrack(track.0)),
        };

        let size = u32::try_from(chunk.len())
            .map_err(|_| MuxError::BufferFull(format!("chunk {} too large", chunk.sequence())))?;
        let (duration, composition_offset) = open.clock.advance(&chunk)?;
        self.samples.push(SampleInfo {
            offset: self.payload.len() as u64,
            size,
            duration,
            composition_offset,
            is_sync: chunk.is_keyframe(),
        });
        self.payload.extend_from_slice(chunk.data());
        chunk.release();
        Ok(())
    }

    fn finalize(&mut self) -> MuxResult<Vec<u8>> {
        self.check_open()?;
        let open = self
            .track
            .as_ref()
            .ok_or_else(|| MuxError::TrackError("no track was added".into()))?;
        self.finished = true;

        let mut out = Cursor::new(Vec::with_capacity(self.payload.len() + 4096));
        write_ftyp(&mut out, FileBrand::Progressive, &open.config.sample_entry)?;

        let payload_len = self.payload.len() as u64;
        let data_start = if payload_len + 8 > u32::MAX as u64 {
            let size_pos = large_box_size_placeholder(&mut out, b"mdat")?;
            let start = out.position();
            out.get_mut().extend_from_slice(&self.payload);
            out.set_position(start + payload_len);
            fill_large_box_size(&mut out, size_pos)?;
            start
        } else {
            write_box_header(&mut out, b"mdat", payload_len as u32 + 8)?;
            let start = out.position();
            out.get_mut().extend_from_slice(&self.payload);
            out.set_position(start + payload_len);
            start
        };
        self.payload = Vec::new();

        for sample in &mut self.samples {
            sample.offset += data_start;
        }
        let duration = open.clock.next_dts();
        let layout = TrackLayout {
            track_id: TRACK_ID,
            config: &open.config,
            duration,
            samples: &self.samples,
        };
        write_moov(&mut out, &layout, false)?;

        let bytes = out.into_inner();
        info!(
            samples = self.samples.len(),
            duration_ticks = duration,
            bytes = bytes.len(),
            "Progressive MP4 finalized"
        );
        self.samples.clear();
        Ok(bytes)
    }

    fn discard(&mut self) {
        debug!(samples = self.samples.len(), "Progressive writer discarded");
        self.samples.clear();
        self.payload = Vec::new();
        self.track = None;
        self.finished = true;
    }

    fn chunk_count(&self) -> u64 {
        self.samples.len() as u64
    }
}
