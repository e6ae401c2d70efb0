//! `rc-demux` -- In-memory ISO BMFF (MP4) parsing for recast.
//!
//! Builds a box tree over the input buffer, extracts the video track's
//! decoder configuration and streams its compressed samples under
//! backpressure. No FFmpeg dependency; the parser is self-contained.

pub mod boxes;
pub mod params;
pub mod sample;
pub mod source;
pub mod tree;

#[cfg(test)]
mod testutil;

pub use params::{AvccConfig, HvccConfig, ParameterExtractor};
pub use sample::{SampleEntry, SampleTable};
pub use source::{SamplePoll, SampleSource, SampleStream, DEFAULT_READ_AHEAD};
pub use tree::{BoxNode, BoxTree, ContainerParser};
