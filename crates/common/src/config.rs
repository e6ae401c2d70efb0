//! Configuration structs for the codec stages and the transcode pipeline.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;
use crate::error::ConfigError;
use crate::media::{nal_length_size, ParameterSet};
use crate::types::Resolution;

/// What a decoder backend needs to start: the codec configuration
/// boundary of the source track.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderConfig {
    pub codec: VideoCodec,
    /// RFC 6381 codec string, e.g. `avc1.64001f`.
    pub codec_string: String,
    /// Coded width/height.
    pub resolution: Resolution,
    /// Configuration box payload (header stripped).
    pub description: Arc<[u8]>,
}

impl DecoderConfig {
    pub fn new(params: &ParameterSet, resolution: Resolution) -> Self {
        Self {
            codec: params.codec,
            codec_string: params.codec_string(),
            resolution,
            description: Arc::clone(&params.description),
        }
    }

    /// NAL length-prefix size carried by the description.
    pub fn nal_length_size(&self) -> usize {
        nal_length_size(self.codec, &self.description)
    }
}

/// Encoder configuration: codec target, bitrate, geometry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub codec: VideoCodec,
    pub resolution: Resolution,
    /// Target bitrate in bits per second.
    pub bitrate: u64,
    /// Frames between forced keyframes (the first frame is always one).
    pub keyframe_interval: u32,
}

impl EncoderConfig {
    pub fn new(settings: &EncoderSettings, resolution: Resolution) -> Self {
        Self {
            codec: settings.codec,
            resolution,
            bitrate: settings.bitrate,
            keyframe_interval: settings.keyframe_interval,
        }
    }
}

/// Which container writer backend produces the output.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriterKind {
    /// ftyp + moov(mvex) init segment followed by moof/mdat fragments.
    Fragmented,
    /// All chunks buffered; ftyp + mdat + moov written at finalize.
    #[default]
    Progressive,
}

/// Backpressure watermarks on samples in flight between the decoder
/// input and the encoder input.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Pause the sample source when in-flight reaches this count.
    pub high_water: usize,
    /// Resume once in-flight drops to this count or below.
    pub low_water: usize,
}

impl FlowConfig {
    /// Reject a decoder whose held-back frames would keep the source
    /// paused for good.
    ///
    /// While paused nothing new is submitted, so the decoder never gives
    /// back its last `delay` frames. The source pauses once `delay + 1`
    /// samples are in flight and resumes only at `low_water`.
    pub fn check_decoder_delay(&self, delay: usize) -> Result<(), ConfigError> {
        if delay > self.low_water && delay.saturating_add(1) >= self.high_water {
            return Err(ConfigError::Invalid(format!(
                "decoder holds up to {delay} frames; with high_water {} and low_water {} \
                 the sample source would never resume",
                self.high_water, self.low_water
            )));
        }
        Ok(())
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            high_water: 30,
            low_water: 10,
        }
    }
}

/// Encoder settings; geometry comes from the source track.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderSettings {
    pub codec: VideoCodec,
    pub bitrate: u64,
    pub keyframe_interval: u32,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H264,
            bitrate: 4_000_000,
            keyframe_interval: 60,
        }
    }
}

/// Fragmenting policy for the fragmented writer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentConfig {
    /// Start a new fragment at the next keyframe once this much media
    /// has accumulated.
    pub target_duration_us: u64,
    /// Hard cap on chunks per fragment.
    pub max_chunks: usize,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            target_duration_us: 2_000_000,
            max_chunks: 300,
        }
    }
}

/// Top-level transcode configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    pub writer: WriterKind,
    pub flow: FlowConfig,
    pub encoder: EncoderSettings,
    pub fragment: FragmentConfig,
    /// Samples the source reads ahead of the decoder.
    pub read_ahead: usize,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            writer: WriterKind::default(),
            flow: FlowConfig::default(),
            encoder: EncoderSettings::default(),
            fragment: FragmentConfig::default(),
            read_ahead: 4,
        }
    }
}

impl TranscodeConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flow.high_water == 0 {
            return Err(ConfigError::Invalid("high_water must be > 0".into()));
        }
        if self.flow.low_water >= self.flow.high_water {
            return Err(ConfigError::Invalid(format!(
                "low_water ({}) must be below high_water ({})",
                self.flow.low_water, self.flow.high_water
            )));
        }
        if self.encoder.bitrate == 0 {
            return Err(ConfigError::Invalid("bitrate must be > 0".into()));
        }
        if self.encoder.keyframe_interval == 0 {
            return Err(ConfigError::Invalid("keyframe_interval must be > 0".into()));
        }
        if self.fragment.max_chunks == 0 {
            return Err(ConfigError::Invalid("fragment.max_chunks must be > 0".into()));
        }
        Ok(())
    }
}
