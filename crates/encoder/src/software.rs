//! CPU software encoder backend.
//!
//! [`SoftwareEncoder`] produces a structurally valid AVCC bitstream
//! without running a real H.264/H.265 encoder: one length-prefixed NAL
//! per frame (IDR / IRAP for keyframes, a non-IDR slice otherwise) whose
//! size tracks the target bitrate. It exposes a matching avcC / hvcC
//! parameter set so the output can be muxed and parsed back.
//!
//! Like the decoder counterpart it can hold `delay` frames before
//! emitting them, which exercises the stage's reordering and drain.

use std::collections::VecDeque;
use std::io::Write;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use rc_common::{
    ChunkSink, EncodeError, EncodedUnit, EncoderConfig, Frame, ParameterSet, SequenceIndex,
    VideoCodec, VideoEncoder,
};
use tracing::{debug, trace};

/// Bytes of the AVCC length prefix on every emitted NAL.
pub const NAL_LENGTH_SIZE: usize = 4;

/// Bounds on the emitted slice payload.
const MIN_PAYLOAD: usize = 16;
const MAX_PAYLOAD: usize = 4 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Parameter sets
// ---------------------------------------------------------------------------

/// Level indication that covers the coded size (H.264 `level_idc`).
fn avc_level(pixels: u64) -> u8 {
    match pixels {
        0..=101_376 => 0x15,         // 2.1
        101_377..=414_720 => 0x1E,   // 3.0
        414_721..=921_600 => 0x1F,   // 3.1
        921_601..=2_228_224 => 0x28, // 4.0
        _ => 0x33,                   // 5.1
    }
}

/// `general_level_idc` for HEVC (30 x level).
fn hevc_level(pixels: u64) -> u8 {
    match pixels {
        0..=552_960 => 90,
        552_961..=983_040 => 93,
        983_041..=2_228_224 => 120,
        _ => 153,
    }
}

/// Sequence parameter set stand-in; carries the geometry so distinct
/// configurations give distinct records.
fn synthetic_sps(header: &[u8], profile: u8, level: u8, config: &EncoderConfig) -> Vec<u8> {
    let mut sps = header.to_vec();
    sps.extend_from_slice(&[profile, 0x00, level]);
    sps.extend_from_slice(&(config.resolution.width as u16).to_be_bytes());
    sps.extend_from_slice(&(config.resolution.height as u16).to_be_bytes());
    sps
}

/// AVCDecoderConfigurationRecord (avcC payload).
pub fn build_avcc(config: &EncoderConfig) -> std::io::Result<Vec<u8>> {
    let level = avc_level(config.resolution.pixel_count());
    let sps = synthetic_sps(&[0x67], 0x64, level, config);
    let pps = [0x68, 0xEE, 0x3C, 0x80];

    let mut out = Vec::with_capacity(16 + sps.len() + pps.len());
    out.write_u8(1)?; // configurationVersion
    out.write_u8(sps[1])?; // AVCProfileIndication
    out.write_u8(sps[2])?; // profile_compatibility
    out.write_u8(sps[3])?; // AVCLevelIndication
    out.write_u8(0xFC | (NAL_LENGTH_SIZE as u8 - 1))?;
    out.write_u8(0xE1)?; // one SPS
    out.write_u16::<BigEndian>(sps.len() as u16)?;
    out.write_all(&sps)?;
    out.write_u8(1)?; // one PPS
    out.write_u16::<BigEndian>(pps.len() as u16)?;
    out.write_all(&pps)?;
    Ok(out)
}

/// HEVCDecoderConfigurationRecord (hvcC payload) with VPS/SPS/PPS arrays.
pub fn build_hvcc(config: &EncoderConfig) -> std::io::Result<Vec<u8>> {
    let level = hevc_level(config.resolution.pixel_count());
    let vps = [0x40, 0x01, 0x0C, 0x01, 0xFF, 0xFF];
    let sps = synthetic_sps(&[0x42, 0x01], 0x01, level, config);
    let pps = [0x44, 0x01, 0xC1, 0x72];

    let mut out = Vec::with_capacity(64);
    out.write_u8(1)?; // configurationVersion
    out.write_u8(0x01)?; // profile space 0, Main tier, Main profile
    out.write_u32::<BigEndian>(0x6000_0000)?; // compatibility flags
    out.write_all(&[0u8; 6])?; // constraint indicator flags
    out.write_u8(level)?;
    out.write_u16::<BigEndian>(0xF000)?; // min_spatial_segmentation_idc
    out.write_u8(0xFC)?; // parallelismType
    out.write_u8(0xFD)?; // chroma 4:2:0
    out.write_u8(0xF8)?; // luma bit depth 8
    out.write_u8(0xF8)?; // chroma bit depth 8
    out.write_u16::<BigEndian>(0)?; // avgFrameRate
    out.write_u8(0x0C | (NAL_LENGTH_SIZE as u8 - 1))?;

    out.write_u8(3)?; // numOfArrays
    for (nal_type, nal) in [(0x20u8, &vps[..]), (0x21, &sps[..]), (0x22, &pps[..])] {
        out.write_u8(0x80 | nal_type)?; // array_completeness
        out.write_u16::<BigEndian>(1)?;
        out.write_u16::<BigEndian>(nal.len() as u16)?;
        out.write_all(nal)?;
    }
    Ok(out)
}

/// NAL unit header for an emitted slice.
fn slice_header(codec: VideoCodec, keyframe: bool) -> &'static [u8] {
    match (codec, keyframe) {
        (VideoCodec::H264, true) => &[0x65],        // IDR slice
        (VideoCodec::H264, false) => &[0x41],       // non-IDR slice
        (VideoCodec::H265, true) => &[0x26, 0x01],  // IDR_W_RADL
        (VideoCodec::H265, false) => &[0x02, 0x01], // TRAIL_R
    }
}

/// Slice payload size for one frame: the bitrate share of its duration,
/// doubled for keyframes.
fn payload_size(bitrate: u64, duration_us: u64, keyframe: bool) -> usize {
    let bits = bitrate as u128 * duration_us as u128 / 1_000_000;
    let mut bytes = (bits / 8).min(MAX_PAYLOAD as u128) as usize;
    if keyframe {
        bytes = bytes.saturating_mul(2).min(MAX_PAYLOAD);
    }
    bytes.max(MIN_PAYLOAD)
}

// ---------------------------------------------------------------------------
// SoftwareEncoder
// ---------------------------------------------------------------------------

pub struct SoftwareEncoder {
    delay: usize,
    config: Option<EncoderConfig>,
    params: Option<ParameterSet>,
    sink: Option<ChunkSink>,
    held: VecDeque<(SequenceIndex, EncodedUnit)>,
    frames_encoded: u64,
}

impl SoftwareEncoder {
    pub fn new() -> Self {
        Self::with_delay(0)
    }

    /// Holds `delay` chunks before emitting the oldest one.
    pub fn with_delay(delay: usize) -> Self {
        Self {
            delay,
            config: None,
            params: None,
            sink: None,
            held: VecDeque::new(),
            frames_encoded: 0,
        }
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    fn emit(&self, ticket: SequenceIndex, unit: EncodedUnit) {
        if let Some(sink) = &self.sink {
            sink.complete(ticket, unit);
        }
    }
}

impl Default for SoftwareEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for SoftwareEncoder {
    fn name(&self) -> &str {
        "software"
    }

    fn configure(&mut self, config: &EncoderConfig, sink: ChunkSink) -> Result<(), EncodeError> {
        if config.resolution.is_empty() {
            return Err(EncodeError::Unsupported(format!(
                "target size {} is empty",
                config.resolution
            )));
        }
        if config.resolution.width > u16::MAX as u32 || config.resolution.height > u16::MAX as u32
        {
            return Err(EncodeError::Unsupported(format!(
                "target size {} is too large",
                config.resolution
            )));
        }
        if config.bitrate == 0 {
            return Err(EncodeError::Unsupported("bitrate must be > 0".into()));
        }

        let record = match config.codec {
            VideoCodec::H264 => build_avcc(config),
            VideoCodec::H265 => build_hvcc(config),
        }
        .map_err(|e| EncodeError::Unsupported(format!("parameter set: {e}")))?;

        let params = ParameterSet::new(config.codec, config.codec.sample_entry(), record);
        debug!(
            codec = %params.codec_string(),
            resolution = %config.resolution,
            bitrate = config.bitrate,
            delay = self.delay,
            "Software encoder ready"
        );
        self.params = Some(params);
        self.config = Some(config.clone());
        self.sink = Some(sink);
        Ok(())
    }

    fn parameter_set(&self) -> Option<ParameterSet> {
        self.params.clone()
    }

    fn encode(
        &mut self,
        ticket: SequenceIndex,
        frame: &Frame,
        keyframe: bool,
    ) -> Result<(), EncodeError> {
        let (Some(config), Some(sink)) = (&self.config, &self.sink) else {
            return Err(EncodeError::NotConfigured);
        };
        if frame.resolution() != config.resolution {
            return Err(EncodeError::fault(
                ticket,
                format!(
                    "frame is {}, encoder is configured for {}",
                    frame.resolution(),
                    config.resolution
                ),
            ));
        }
        if frame.data().len() < config.resolution.nv12_byte_size() {
            return Err(EncodeError::fault(
                ticket,
                format!("frame holds {} bytes of NV12 data", frame.data().len()),
            ));
        }

        let keyframe = keyframe || self.frames_encoded == 0;
        let header = slice_header(config.codec, keyframe);
        let body = payload_size(config.bitrate, frame.duration_us(), keyframe);
        let nal_len = header.len() + body;

        let mut data = sink.acquire(NAL_LENGTH_SIZE + nal_len);
        BigEndian::write_u32(&mut data[..NAL_LENGTH_SIZE], nal_len as u32);
        let (head, rest) = data[NAL_LENGTH_SIZE..].split_at_mut(header.len());
        head.copy_from_slice(header);
        // Sample the luma plane so different frames give different bytes.
        let pixels = frame.data();
        let step = (pixels.len() / body).max(1);
        for (i, byte) in rest.iter_mut().enumerate() {
            *byte = pixels[(i * step) % pixels.len()] ^ (i as u8);
        }

        self.frames_encoded += 1;
        trace!(sequence = %ticket, keyframe, size = data.len(), "Encoded frame");

        let unit = EncodedUnit {
            data,
            is_keyframe: keyframe,
        };
        if self.delay == 0 {
            self.emit(ticket, unit);
            return Ok(());
        }
        self.held.push_back((ticket, unit));
        while self.held.len() > self.delay {
            if let Some((ticket, unit)) = self.held.pop_front() {
                self.emit(ticket, unit);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), EncodeError> {
        if self.sink.is_none() {
            return Err(EncodeError::NotConfigured);
        }
        while let Some((ticket, unit)) = self.held.pop_front() {
            self.emit(ticket, unit);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.held.clear();
        self.sink = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use rc_common::media::nal_length_size;
    use rc_common::{BufferPool, CompletionSink, Resolution};

    fn config(codec: VideoCodec) -> EncoderConfig {
        EncoderConfig {
            codec,
            resolution: Resolution::new(8, 4),
            bitrate: 800_000,
            keyframe_interval: 30,
        }
    }

    fn frame(pool: &BufferPool, seq: u64, luma: u8) -> Frame {
        let res = Resolution::new(8, 4);
        let mut buffer = pool.acquire(res.nv12_byte_size());
        buffer[..32].fill(luma);
        Frame::new(buffer, res, 0, 40_000, SequenceIndex(seq), false)
    }

    #[test]
    fn avcc_record_layout() {
        let record = build_avcc(&config(VideoCodec::H264)).unwrap();
        assert_eq!(record[0], 1);
        assert_eq!(record[1], 0x64);
        assert_eq!(record[3], 0x15);
        assert_eq!(record[5] & 0x1F, 1);
        assert_eq!(nal_length_size(VideoCodec::H264, &record), 4);
        let params = ParameterSet::new(VideoCodec::H264, *b"avc1", record);
        assert_eq!(params.codec_string(), "avc1.640015");
    }

    #[test]
    fn hvcc_record_layout() {
        let record = build_hvcc(&config(VideoCodec::H265)).unwrap();
        assert_eq!(record[0], 1);
        assert_eq!(record[12], 90);
        assert_eq!(record[22], 3);
        assert_eq!(nal_length_size(VideoCodec::H265, &record), 4);
        let params = ParameterSet::new(VideoCodec::H265, *b"hvc1", record);
        assert_eq!(params.codec_string(), "hvc1.1.6.L90");
    }

    #[test]
    fn payload_tracks_bitrate() {
        // 800 kbit/s for 40 ms is 4000 bytes
        assert_eq!(payload_size(800_000, 40_000, false), 4000);
        assert_eq!(payload_size(800_000, 40_000, true), 8000);
        assert_eq!(payload_size(1, 1, false), MIN_PAYLOAD);
    }

    #[test]
    fn emits_length_prefixed_slices() {
        let frames = BufferPool::new("frames", 2);
        let chunks = BufferPool::new("chunks", 2);
        let (tx, rx) = channel::unbounded();
        let mut encoder = SoftwareEncoder::new();
        encoder
            .configure(&config(VideoCodec::H265), CompletionSink::new(tx, chunks.clone()))
            .unwrap();

        encoder.encode(SequenceIndex(0), &frame(&frames, 0, 10), false).unwrap();
        encoder.encode(SequenceIndex(1), &frame(&frames, 1, 200), false).unwrap();

        let (_, first) = rx.recv().unwrap();
        let (_, second) = rx.recv().unwrap();
        let (first, second) = (first.unwrap(), second.unwrap());
        // First frame is always a keyframe.
        assert!(first.is_keyframe);
        assert_eq!(&first.data[4..6], &[0x26, 0x01]);
        assert!(!second.is_keyframe);
        assert_eq!(&second.data[4..6], &[0x02, 0x01]);

        let declared = BigEndian::read_u32(&second.data[..4]) as usize;
        assert_eq!(declared + 4, second.data.len());
        assert_ne!(first.data[6..], second.data[6..]);
        drop((first, second));
        assert!(chunks.stats().is_balanced());
        assert!(frames.stats().is_balanced());
    }

    #[test]
    fn rejects_wrong_geometry() {
        let frames = BufferPool::new("frames", 1);
        let (tx, _rx) = channel::unbounded();
        let mut encoder = SoftwareEncoder::new();
        encoder
            .configure(
                &EncoderConfig {
                    resolution: Resolution::new(16, 16),
                    ..config(VideoCodec::H264)
                },
                CompletionSink::new(tx, BufferPool::new("c", 1)),
            )
            .unwrap();
        let err = encoder
            .encode(SequenceIndex(3), &frame(&frames, 3, 0), true)
            .unwrap_err();
        assert!(err.is_fault());
        assert!(err.to_string().contains("8x4"));
    }

    #[test]
    fn delay_holds_until_flush() {
        let frames = BufferPool::new("frames", 4);
        let (tx, rx) = channel::unbounded();
        let mut encoder = SoftwareEncoder::with_delay(2);
        encoder
            .configure(
                &config(VideoCodec::H264),
                CompletionSink::new(tx, BufferPool::new("c", 4)),
            )
            .unwrap();
        for i in 0..3 {
            encoder.encode(SequenceIndex(i), &frame(&frames, i, 1), i == 0).unwrap();
        }
        assert_eq!(rx.try_iter().count(), 1);
        encoder.flush().unwrap();
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(encoder.frames_encoded(), 3);
    }
}
