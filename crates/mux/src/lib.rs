//! `rc-mux` -- MP4 container writers for recast.
//!
//! Turns encoded chunks into a playable ISO Base Media File
//! (ISO 14496-12) held in memory. Two layouts sit behind one
//! [`ContainerWriter`] trait:
//!
//! - **Progressive** -- ftyp, one mdat, moov written at `finalize()`
//! - **Fragmented** -- init segment (ftyp + moov/mvex), then moof/mdat
//!   pairs cut at keyframes
//!
//! Decode times are the running sum of chunk durations; presentation
//! order differences are carried as composition offsets (ctts / trun).
//!
//! # Usage
//!
//! ```ignore
//! use rc_mux::{create_writer, TrackConfig};
//!
//! let mut writer = create_writer(config.writer, config.fragment);
//! let track = writer.add_track(TrackConfig::new(&params, resolution, time_scale))?;
//! for chunk in chunks {
//!     writer.add_chunk(track, chunk)?;
//! }
//! let mp4: Vec<u8> = writer.finalize()?;
//! ```

pub mod atoms;
pub mod error;
pub mod fragment;
pub mod fragmented;
pub mod mp4;
pub mod progressive;
pub mod writer;

pub use error::{MuxError, MuxResult};
pub use fragmented::FragmentedWriter;
pub use progressive::ProgressiveWriter;
pub use writer::{create_writer, ContainerWriter, SampleInfo, TrackConfig, TrackHandle};
