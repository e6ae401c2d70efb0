//! CPU software decoder backend.
//!
//! [`SoftwareDecoder`] implements [`VideoDecoder`] without a real
//! H.264/H.265 reconstruction path. It does everything around the
//! reconstruction that a hardware session does:
//!
//! - validates AVCC length-prefixed NAL framing against the configured
//!   NAL length size,
//! - requires the stream to start at a keyframe (IDR / IRAP),
//! - produces one NV12 frame of the coded size per sample, with a luma
//!   level derived from the payload so distinct samples give distinct
//!   frames,
//! - optionally holds `delay` frames before emitting them, the way a
//!   decoder with a reorder window does.
//!
//! It is what the pipeline runs against when no hardware backend is
//! plugged in, and what the tests use.

use std::collections::VecDeque;

use rc_common::{
    DecodeError, DecodedImage, DecoderConfig, FrameSink, Resolution, Sample, SequenceIndex,
    VideoCodec, VideoDecoder,
};
use tracing::{debug, trace};

// ---------------------------------------------------------------------------
// NAL helpers
// ---------------------------------------------------------------------------

/// Iterate the NAL unit payloads of an AVCC length-prefixed access unit.
///
/// Fails with a description of the first framing error.
pub fn split_length_prefixed(data: &[u8], length_size: usize) -> Result<Vec<&[u8]>, String> {
    if !(1..=4).contains(&length_size) {
        return Err(format!("unsupported NAL length size {length_size}"));
    }

    let mut units = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < length_size {
            return Err(format!(
                "truncated NAL length prefix at byte {pos} ({} bytes left)",
                data.len() - pos
            ));
        }
        let len = data[pos..pos + length_size]
            .iter()
            .fold(0usize, |acc, &b| (acc << 8) | b as usize);
        pos += length_size;
        if len == 0 {
            return Err(format!("zero-length NAL unit at byte {pos}"));
        }
        if len > data.len() - pos {
            return Err(format!(
                "NAL length {len} exceeds the {} remaining bytes",
                data.len() - pos
            ));
        }
        units.push(&data[pos..pos + len]);
        pos += len;
    }
    Ok(units)
}

/// Whether a NAL unit starts a random access point (H.264 IDR, H.265 IRAP).
pub fn is_random_access_nal(codec: VideoCodec, nal: &[u8]) -> bool {
    let Some(&header) = nal.first() else {
        return false;
    };
    match codec {
        VideoCodec::H264 => header & 0x1F == 5,
        VideoCodec::H265 => (16..=23).contains(&((header >> 1) & 0x3F)),
    }
}

// ---------------------------------------------------------------------------
// SoftwareDecoder
// ---------------------------------------------------------------------------

pub struct SoftwareDecoder {
    delay: usize,
    codec: VideoCodec,
    resolution: Resolution,
    nal_length_size: usize,
    sink: Option<FrameSink>,
    held: VecDeque<(SequenceIndex, DecodedImage)>,
    seen_keyframe: bool,
    frames_decoded: u64,
}

impl SoftwareDecoder {
    /// Emits each frame as soon as its sample is decoded.
    pub fn new() -> Self {
        Self::with_delay(0)
    }

    /// Holds `delay` frames before emitting the oldest one.
    pub fn with_delay(delay: usize) -> Self {
        Self {
            delay,
            codec: VideoCodec::H264,
            resolution: Resolution::new(0, 0),
            nal_length_size: 4,
            sink: None,
            held: VecDeque::new(),
            seen_keyframe: false,
            frames_decoded: 0,
        }
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    fn sink(&self) -> Result<&FrameSink, DecodeError> {
        self.sink.as_ref().ok_or(DecodeError::NotConfigured)
    }

    /// Fill an NV12 image: flat luma from the payload, neutral chroma.
    fn render(&self, sample: &Sample) -> Result<DecodedImage, DecodeError> {
        let sink = self.sink()?;
        let luma_len = self.resolution.pixel_count() as usize;
        let mut buffer = sink.acquire(self.resolution.nv12_byte_size());

        let luma = sample
            .data
            .iter()
            .fold(16u8, |acc, &b| acc.wrapping_mul(31).wrapping_add(b));
        let (y_plane, uv_plane) = buffer.split_at_mut(luma_len);
        y_plane.fill(luma);
        uv_plane.fill(128);

        Ok(DecodedImage {
            buffer,
            resolution: self.resolution,
        })
    }

    fn emit(&self, ticket: SequenceIndex, image: DecodedImage) {
        if let Some(sink) = &self.sink {
            // A closed stage drops the image, returning it to the pool.
            sink.complete(ticket, image);
        }
    }
}

impl Default for SoftwareDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for SoftwareDecoder {
    fn name(&self) -> &str {
        "software"
    }

    fn configure(&mut self, config: &DecoderConfig, sink: FrameSink) -> Result<(), DecodeError> {
        if config.resolution.is_empty() {
            return Err(DecodeError::Unsupported(format!(
                "coded size {} is empty",
                config.resolution
            )));
        }
        if config.description.is_empty() {
            return Err(DecodeError::Unsupported(
                "empty decoder configuration record".into(),
            ));
        }

        self.codec = config.codec;
        self.resolution = config.resolution;
        self.nal_length_size = config.nal_length_size();
        self.sink = Some(sink);
        debug!(
            codec = %config.codec_string,
            resolution = %config.resolution,
            nal_length_size = self.nal_length_size,
            delay = self.delay,
            "Software decoder ready"
        );
        Ok(())
    }

    fn decode(&mut self, ticket: SequenceIndex, sample: &Sample) -> Result<(), DecodeError> {
        self.sink()?;
        if sample.data.is_empty() {
            return Err(DecodeError::fault(ticket, "empty sample"));
        }

        let units = split_length_prefixed(&sample.data, self.nal_length_size)
            .map_err(|reason| DecodeError::fault(ticket, reason))?;
        let random_access = units
            .iter()
            .any(|nal| is_random_access_nal(self.codec, nal));

        if !self.seen_keyframe {
            if !(sample.is_sync || random_access) {
                return Err(DecodeError::fault(
                    ticket,
                    "stream does not start with a keyframe",
                ));
            }
            self.seen_keyframe = true;
        }

        let image = self.render(sample)?;
        self.frames_decoded += 1;
        trace!(sequence = %ticket, nal_units = units.len(), "Decoded sample");

        if self.delay == 0 {
            self.emit(ticket, image);
            return Ok(());
        }
        self.held.push_back((ticket, image));
        while self.held.len() > self.delay {
            if let Some((ticket, image)) = self.held.pop_front() {
                self.emit(ticket, image);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        self.sink()?;
        while let Some((ticket, image)) = self.held.pop_front() {
            self.emit(ticket, image);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.held.clear();
        self.sink = None;
    }

    fn max_output_delay(&self) -> usize {
        self.delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use rc_common::{BufferPool, CompletionSink, ParameterSet};

    fn config(res: Resolution) -> DecoderConfig {
        let params = ParameterSet::new(
            VideoCodec::H264,
            *b"avc1",
            vec![0x01, 0x4D, 0x40, 0x1F, 0xFE],
        );
        DecoderConfig::new(&params, res)
    }

    fn sample(seq: u64, nal: &[u8], sync: bool) -> Sample {
        // 3-byte NAL lengths (0xFE -> length size 3)
        let mut data = (nal.len() as u32).to_be_bytes()[1..].to_vec();
        data.extend_from_slice(nal);
        Sample {
            sequence: SequenceIndex(seq),
            data,
            dts: seq,
            cts: seq as i64,
            duration: 1,
            is_sync: sync,
            time_scale: 30,
        }
    }

    #[test]
    fn split_nal_units() {
        let data = [0, 0, 0, 2, 0x65, 0x01, 0, 0, 0, 1, 0x41];
        let units = split_length_prefixed(&data, 4).unwrap();
        assert_eq!(units, vec![&[0x65, 0x01][..], &[0x41][..]]);

        assert!(split_length_prefixed(&[0, 0, 0, 9, 1], 4)
            .unwrap_err()
            .contains("exceeds"));
        assert!(split_length_prefixed(&[0, 0], 4).is_err());
        assert!(split_length_prefixed(&[0, 0, 0, 0], 4).is_err());
    }

    #[test]
    fn random_access_detection() {
        assert!(is_random_access_nal(VideoCodec::H264, &[0x65]));
        assert!(!is_random_access_nal(VideoCodec::H264, &[0x41]));
        assert!(is_random_access_nal(VideoCodec::H265, &[0x26, 0x01]));
        assert!(!is_random_access_nal(VideoCodec::H265, &[0x02, 0x01]));
        assert!(!is_random_access_nal(VideoCodec::H265, &[]));
    }

    #[test]
    fn decodes_with_configured_length_size() {
        let pool = BufferPool::new("test-frames", 4);
        let (tx, rx) = channel::unbounded();
        let mut decoder = SoftwareDecoder::new();
        decoder
            .configure(&config(Resolution::new(8, 4)), CompletionSink::new(tx, pool.clone()))
            .unwrap();

        decoder.decode(SequenceIndex(0), &sample(0, &[0x65, 0xAA], true)).unwrap();
        decoder.decode(SequenceIndex(1), &sample(1, &[0x41, 0xBB], false)).unwrap();

        let (t0, img0) = rx.recv().unwrap();
        let (t1, img1) = rx.recv().unwrap();
        let (img0, img1) = (img0.unwrap(), img1.unwrap());
        assert_eq!((t0, t1), (SequenceIndex(0), SequenceIndex(1)));
        assert_eq!(img0.buffer.len(), 48);
        assert_eq!(img0.buffer[40], 128);
        assert_ne!(img0.buffer[0], img1.buffer[0]);
        drop((img0, img1));
        assert!(pool.stats().is_balanced());
    }

    #[test]
    fn rejects_leading_delta_frame() {
        let (tx, _rx) = channel::unbounded();
        let mut decoder = SoftwareDecoder::new();
        decoder
            .configure(
                &config(Resolution::new(8, 4)),
                CompletionSink::new(tx, BufferPool::new("f", 1)),
            )
            .unwrap();
        let err = decoder
            .decode(SequenceIndex(0), &sample(0, &[0x41], false))
            .unwrap_err();
        assert!(err.is_fault());
        assert!(err.to_string().contains("keyframe"));
    }

    #[test]
    fn delay_holds_until_flush() {
        let (tx, rx) = channel::unbounded();
        let mut decoder = SoftwareDecoder::with_delay(2);
        decoder
            .configure(
                &config(Resolution::new(2, 2)),
                CompletionSink::new(tx, BufferPool::new("f", 4)),
            )
            .unwrap();
        for i in 0..3 {
            decoder
                .decode(SequenceIndex(i), &sample(i, &[0x65], true))
                .unwrap();
        }
        assert_eq!(rx.try_iter().count(), 1);
        decoder.flush().unwrap();
        assert_eq!(rx.try_iter().count(), 2);
    }

    #[test]
    fn decode_before_configure() {
        let mut decoder = SoftwareDecoder::new();
        assert!(matches!(
            decoder.decode(SequenceIndex(0), &sample(0, &[0x65], true)),
            Err(DecodeError::NotConfigured)
        ));
    }
}
