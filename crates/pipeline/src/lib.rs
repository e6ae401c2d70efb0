//! `rc-pipeline` -- Re-encoding pipeline controller for recast.
//!
//! Ties the other crates together:
//!
//! ```text
//! SampleSource (rc-demux)
//!   --> DecodeStage (rc-decoder)
//!     --> EncodeStage (rc-encoder)
//!       --> ContainerWriter (rc-mux)
//!
//! Backpressure: in-flight count --> FlowSignal --> SampleSource
//! ```
//!
//! - [`controller`] -- `Transcoder`: synchronous run with abort and progress
//! - [`job`] -- `TranscodeJob` / `TranscodeHandle`: the same run on a
//!   background thread
//! - [`progress`] -- `TranscodeProgress` updates
//! - [`error`] -- `TranscodeError`
//!
//! # Usage
//!
//! ```ignore
//! use rc_decoder::SoftwareDecoder;
//! use rc_encoder::SoftwareEncoder;
//! use rc_pipeline::Transcoder;
//!
//! let mut transcoder = Transcoder::new(
//!     TranscodeConfig::default(),
//!     Box::new(SoftwareDecoder::new()),
//!     Box::new(SoftwareEncoder::new()),
//! );
//! let output = transcoder.run(&input)?;
//! std::fs::write("out.mp4", &output.data)?;
//! ```

pub mod controller;
pub mod error;
pub mod job;
pub mod progress;

pub use controller::{TranscodeOutput, Transcoder};
pub use error::{TranscodeError, TranscodeResult};
pub use job::{TranscodeHandle, TranscodeJob};
pub use progress::TranscodeProgress;
