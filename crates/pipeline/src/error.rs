//! Transcode error type: one variant per stage, plus abort.

use rc_common::{ConfigError, DecodeError, DemuxError, EncodeError, SequenceIndex};
use rc_mux::MuxError;
use thiserror::Error;

/// Errors surfaced by [`Transcoder::run`](crate::Transcoder::run).
#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Demux failed: {0}")]
    Demux(#[from] DemuxError),

    #[error("Decode stage failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Encode stage failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Mux failed: {0}")]
    Mux(#[from] MuxError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Abort was requested; no output was produced.
    #[error("Transcode aborted")]
    Aborted,

    /// The background job thread could not be started or died.
    #[error("Transcode job failed: {0}")]
    Job(String),
}

impl TranscodeError {
    /// Name of the stage the error came from.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Demux(_) => "demux",
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::Mux(_) => "mux",
            Self::Config(_) => "config",
            Self::Aborted => "controller",
            Self::Job(_) => "job",
        }
    }

    /// Sequence index of the sample or frame a codec fault refers to.
    pub fn sequence(&self) -> Option<SequenceIndex> {
        match self {
            Self::Decode(DecodeError::DecoderFault { sequence, .. })
            | Self::Encode(EncodeError::EncoderFault { sequence, .. }) => Some(*sequence),
            _ => None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

/// Convenience Result type for transcode operations.
pub type TranscodeResult<T> = Result<T, TranscodeError>;
