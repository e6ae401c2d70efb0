//! `rc-encoder` -- Encode stage for recast.
//!
//! Mirrors the decoder crate: a stage that owns ticketing, keyframe
//! placement and in-order delivery, over a pluggable
//! [`VideoEncoder`](rc_common::VideoEncoder) backend.
//!
//! - [`stage`] -- `EncodeStage` and its `EncoderStats`
//! - [`software`] -- `SoftwareEncoder`: CPU backend emitting AVCC slices
//!   and a matching avcC / hvcC parameter set
//!
//! # Encode Pipeline
//!
//! ```text
//! Frame (NV12, pooled)
//!   --> EncodeStage::submit (keyframe decision, timing recorded)
//!     --> backend encode, completion (ticket, EncodedUnit)
//!       --> reorder by ticket
//!         --> Chunk --> ContainerWriter
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use rc_encoder::{EncodeStage, SoftwareEncoder};
//!
//! let mut stage = EncodeStage::new(Box::new(SoftwareEncoder::new()));
//! stage.configure(EncoderConfig::new(&settings, track.resolution))?;
//! let params = stage.parameter_set()?.clone();
//!
//! stage.submit(&frame)?;
//! frame.release();
//! for chunk in stage.poll_chunks()? {
//!     writer.add_chunk(track, chunk)?;
//! }
//! for chunk in stage.drain()? {
//!     writer.add_chunk(track, chunk)?;
//! }
//! ```

pub mod software;
pub mod stage;

pub use software::SoftwareEncoder;
pub use stage::{is_keyframe_position, EncodeStage, EncoderStats};
