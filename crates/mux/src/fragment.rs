//! Movie fragment (moof + mdat) writing.
//!
//! Each fragment carries a single traf whose trun lists every sample
//! with explicit duration, size, flags and composition offset. Sample
//! data offsets are relative to the start of the moof
//! (default-base-is-moof), so fragments can be written without knowing
//! where they land in the output.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};

use crate::atoms::{begin_box, begin_full_box, fill_box_size, write_box_header};
use crate::error::{MuxError, MuxResult};
use crate::writer::SampleInfo;

/// tfhd flag: data offsets are relative to the enclosing moof.
pub const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

pub const TRUN_DATA_OFFSET: u32 = 0x000001;
pub const TRUN_SAMPLE_DURATION: u32 = 0x000100;
pub const TRUN_SAMPLE_SIZE: u32 = 0x000200;
pub const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
pub const TRUN_SAMPLE_CTS: u32 = 0x000800;

/// Sample flags for a sync sample (depends on no other sample).
pub const SAMPLE_FLAGS_SYNC: u32 = 0x0200_0000;
/// Sample flags for a non-sync sample (depends on others, non-sync bit).
pub const SAMPLE_FLAGS_NON_SYNC: u32 = 0x0101_0000;

/// Write one moof + mdat pair for a single track.
///
/// `base_dts` is the decode time of the first sample in track ticks;
/// `payload` is the concatenated sample data in sample order.
pub fn write_fragment<W: Write + Seek>(
    writer: &mut W,
    sequence: u32,
    track_id: u32,
    base_dts: u64,
    samples: &[SampleInfo],
    payload: &[u8],
) -> MuxResult<()> {
    let declared: u64 = samples.iter().map(|s| s.size as u64).sum();
    if declared != payload.len() as u64 {
        return Err(MuxError::TrackError(format!(
            "fragment {sequence}: samples declare {declared} bytes, payload has {}",
            payload.len()
        )));
    }

    let moof_start = writer.stream_position()?;
    let moof = begin_box(writer, b"moof")?;

    let mfhd = begin_full_box(writer, b"mfhd", 0, 0)?;
    writer.write_u32::<BigEndian>(sequence)?;
    fill_box_size(writer, mfhd)?;

    let traf = begin_box(writer, b"traf")?;

    let tfhd = begin_full_box(writer, b"tfhd", 0, TFHD_DEFAULT_BASE_IS_MOOF)?;
    writer.write_u32::<BigEndian>(track_id)?;
    fill_box_size(writer, tfhd)?;

    let tfdt = begin_full_box(writer, b"tfdt", 1, 0)?;
    writer.write_u64::<BigEndian>(base_dts)?;
    fill_box_size(writer, tfdt)?;

    let flags = TRUN_DATA_OFFSET
        | TRUN_SAMPLE_DURATION
        | TRUN_SAMPLE_SIZE
        | TRUN_SAMPLE_FLAGS
        | TRUN_SAMPLE_CTS;
    let trun = begin_full_box(writer, b"trun", 1, flags)?;
    writer.write_u32::<BigEndian>(samples.len() as u32)?;
    let data_offset_pos = writer.stream_position()?;
    writer.write_i32::<BigEndian>(0)?;
    for sample in samples {
        writer.write_u32::<BigEndian>(sample.duration)?;
        writer.write_u32::<BigEndian>(sample.size)?;
        writer.write_u32::<BigEndian>(if sample.is_sync {
            SAMPLE_FLAGS_SYNC
        } else {
            SAMPLE_FLAGS_NON_SYNC
        })?;
        writer.write_i32::<BigEndian>(sample.composition_offset)?;
    }
    fill_box_size(writer, trun)?;

    fill_box_size(writer, traf)?;
    fill_box_size(writer, moof)?;

    // First sample byte sits right after the mdat header.
    let moof_end = writer.stream_position()?;
    let data_offset = i32::try_from(moof_end - moof_start + 8)
        .map_err(|_| MuxError::BufferFull(format!("fragment {sequence}: moof too large")))?;
    writer.seek(SeekFrom::Start(data_offset_pos))?;
    writer.write_i32::<BigEndian>(data_offset)?;
    writer.seek(SeekFrom::Start(moof_end))?;

    let mdat_size = u32::try_from(payload.len() as u64 + 8)
        .map_err(|_| MuxError::BufferFull(format!("fragment {sequence}: mdat too large")))?;
    write_box_header(writer, b"mdat", mdat_size)?;
    writer.write_all(payload)?;
    Ok(())
}
