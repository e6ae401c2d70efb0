//! `rc-common` -- Shared types, traits, and errors for the recast transcoder.
//!
//! This crate is the foundation that all other recast crates depend on.
//! It defines the core abstractions:
//!
//! - **Types**: `SequenceIndex`, `Resolution`, `StageState`, µs time-base math
//! - **Media**: `Sample`, `Frame`, `Chunk`, `ParameterSet`, `TrackDescriptor`
//! - **Buffers**: `BufferPool` / `PooledBuffer` (release-on-drop accounting)
//! - **Codec traits**: `VideoDecoder`, `VideoEncoder`, completion sinks
//! - **Flow**: `Backpressure`, `FlowSignal`, `AbortHandle`
//! - **Errors**: `DemuxError`, `DecodeError`, `EncodeError` (thiserror-based)
//! - **Config**: `TranscodeConfig`, `DecoderConfig`, `EncoderConfig`

pub mod buffer;
pub mod codec;
pub mod codec_traits;
pub mod config;
pub mod error;
pub mod flow;
pub mod media;
pub mod types;

// Re-export commonly used items at crate root
pub use buffer::{BufferPool, BufferStats, PooledBuffer};
pub use codec::VideoCodec;
pub use codec_traits::{
    ChunkSink, Completion, CompletionSink, DecodedImage, EncodedUnit, FrameSink, VideoDecoder,
    VideoEncoder,
};
pub use config::{
    DecoderConfig, EncoderConfig, EncoderSettings, FlowConfig, FragmentConfig, TranscodeConfig,
    WriterKind,
};
pub use error::{ConfigError, DecodeError, DemuxError, DemuxResult, EncodeError};
pub use flow::{AbortHandle, Backpressure, FlowChange, FlowSignal};
pub use media::{Chunk, Frame, ParameterSet, Sample, TrackDescriptor};
pub use types::{
    duration_to_micros, duration_to_ticks, micros_to_ticks, ticks_to_micros, Resolution,
    SequenceIndex, StageState,
};
