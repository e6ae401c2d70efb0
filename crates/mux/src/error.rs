//! Muxer error types.

use thiserror::Error;

/// Errors that can occur while writing a container.
#[derive(Error, Debug)]
pub enum MuxError {
    /// I/O error on the in-memory output.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Invalid track configuration.
    #[error("Invalid muxer config: {0}")]
    InvalidConfig(String),

    /// Codec or sample entry the writer cannot describe.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Track-related misuse (second track, chunk before any track).
    #[error("Track error: {0}")]
    TrackError(String),

    /// Handle that does not belong to this writer.
    #[error("Unknown track {0}")]
    UnknownTrack(u32),

    /// Any call after `finalize` or `discard`.
    #[error("Writer is already finished")]
    Finished,

    /// A box or table outgrew its size field.
    #[error("Buffer full: {0}")]
    BufferFull(String),
}

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;
