//! `rc-decoder` -- Decode stage for recast.
//!
//! Turns compressed [`Sample`](rc_common::Sample)s into decoded
//! [`Frame`](rc_common::Frame)s through a pluggable
//! [`VideoDecoder`](rc_common::VideoDecoder) backend.
//!
//! ## Module Overview
//!
//! - [`stage`] -- `DecodeStage`: state machine, ticketed submission,
//!   reorder buffer and drain
//! - [`software`] -- `SoftwareDecoder`: CPU backend that validates NAL
//!   framing and produces NV12 frames
//!
//! ## Usage
//!
//! ```ignore
//! use rc_decoder::{DecodeStage, SoftwareDecoder};
//!
//! let mut stage = DecodeStage::new(Box::new(SoftwareDecoder::new()));
//! stage.configure(&params, track.resolution)?;
//! stage.submit(sample)?;
//! for frame in stage.poll_frames()? {
//!     // hand to the encoder, then drop to release
//! }
//! let tail = stage.drain()?;
//! ```

pub mod software;
pub mod stage;

pub use software::SoftwareDecoder;
pub use stage::{DecodeStage, DecodeStats, POLL_INTERVAL};
