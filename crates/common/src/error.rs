//! Central error types for the demux and codec stages (thiserror-based).

use thiserror::Error;

use crate::types::{SequenceIndex, StageState};

/// Container parsing errors.
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("Malformed container at offset {offset}: {reason}")]
    MalformedContainer { offset: u64, reason: String },

    #[error("Box path not found: {path}")]
    NotFound { path: String },

    #[error("No codec configuration box (avcC/hvcC) in track {track_id}")]
    MissingParameterSet { track_id: u32 },

    #[error("No video track found")]
    NoVideoTrack,

    #[error("Track {0} is not a selectable video track")]
    UnknownTrack(u32),

    #[error("Truncated data: expected {expected} bytes, got {got}")]
    TruncatedData { expected: usize, got: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DemuxError {
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Self::MalformedContainer {
            offset,
            reason: reason.into(),
        }
    }
}

/// Decode stage errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Decoder is not configured")]
    NotConfigured,

    #[error("Decoder is closed")]
    Closed,

    #[error("Invalid decoder state transition: {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: StageState,
    },

    #[error("Decoder fault at sample {sequence}: {reason}")]
    DecoderFault {
        sequence: SequenceIndex,
        reason: String,
    },

    #[error("Decoder configuration rejected: {0}")]
    Unsupported(String),
}

impl DecodeError {
    pub fn fault(sequence: SequenceIndex, reason: impl Into<String>) -> Self {
        Self::DecoderFault {
            sequence,
            reason: reason.into(),
        }
    }

    /// Whether this error is a codec-reported fault (as opposed to misuse).
    pub fn is_fault(&self) -> bool {
        matches!(self, Self::DecoderFault { .. })
    }
}

/// Encode stage errors.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("Encoder is not configured")]
    NotConfigured,

    #[error("Encoder is closed")]
    Closed,

    #[error("Invalid encoder state transition: {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: StageState,
    },

    #[error("Encoder fault at frame {sequence}: {reason}")]
    EncoderFault {
        sequence: SequenceIndex,
        reason: String,
    },

    #[error("Encoder configuration rejected: {0}")]
    Unsupported(String),
}

impl EncodeError {
    pub fn fault(sequence: SequenceIndex, reason: impl Into<String>) -> Self {
        Self::EncoderFault {
            sequence,
            reason: reason.into(),
        }
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Self::EncoderFault { .. })
    }
}

/// Configuration validation error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Convenience Result type for demux operations.
pub type DemuxResult<T> = Result<T, DemuxError>;
