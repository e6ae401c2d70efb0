//! Box-writing primitives shared by the moov, fragment and mdat writers.
//!
//! A box is a big-endian u32 size (header included) followed by a fourcc.
//! A full box adds a version byte and 24 bits of flags. Size 1 means a
//! u64 size follows the fourcc.
//!
//! Boxes whose size is not known up front are opened with
//! [`begin_box`] / [`begin_full_box`], which leave a size placeholder,
//! and closed with [`fill_box_size`] once their content is written.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, SeekFrom, Write};

use crate::error::{MuxError, MuxResult};

/// Movie-level timescale (1000 = millisecond precision).
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Seconds between 1904-01-01 (MP4 epoch) and 1970-01-01 (Unix epoch).
pub const MP4_EPOCH_OFFSET: u64 = 2_082_844_800;

/// Fixed creation time (2024-01-01 00:00:00 UTC) so output is
/// byte-for-byte reproducible.
pub fn mp4_creation_time() -> u64 {
    MP4_EPOCH_OFFSET + 1_704_067_200
}

/// Write a standard box header: 4-byte size + 4-byte type.
pub fn write_box_header<W: Write>(writer: &mut W, box_type: &[u8; 4], size: u32) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    Ok(())
}

/// Write a "full box" header: size + type + version + 24-bit flags.
pub fn write_full_box_header<W: Write>(
    writer: &mut W,
    box_type: &[u8; 4],
    size: u32,
    version: u8,
    flags: u32,
) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    write_version_flags(writer, version, flags)
}

pub fn write_version_flags<W: Write>(writer: &mut W, version: u8, flags: u32) -> MuxResult<()> {
    let version_flags = ((version as u32) << 24) | (flags & 0x00FF_FFFF);
    writer.write_u32::<BigEndian>(version_flags)?;
    Ok(())
}

/// Write a box size placeholder (4 bytes of zeros) and return the stream
/// position where the size should be patched later.
pub fn box_size_placeholder<W: Write + Seek>(writer: &mut W) -> MuxResult<u64> {
    let pos = writer.stream_position()?;
    writer.write_u32::<BigEndian>(0)?;
    Ok(pos)
}

/// Open a box of unknown size. Close it with [`fill_box_size`].
pub fn begin_box<W: Write + Seek>(writer: &mut W, box_type: &[u8; 4]) -> MuxResult<u64> {
    let pos = box_size_placeholder(writer)?;
    writer.write_all(box_type)?;
    Ok(pos)
}

/// Open a full box of unknown size.
pub fn begin_full_box<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
    version: u8,
    flags: u32,
) -> MuxResult<u64> {
    let pos = begin_box(writer, box_type)?;
    write_version_flags(writer, version, flags)?;
    Ok(pos)
}

/// Patch the box size at `size_pos` with the distance to the current
/// position.
pub fn fill_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let current = writer.stream_position()?;
    let size = current - size_pos;
    if size > u32::MAX as u64 {
        return Err(MuxError::BufferFull(format!(
            "Box size {size} exceeds 32-bit limit"
        )));
    }

    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u32::<BigEndian>(size as u32)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Write a placeholder for a 64-bit box header and return the position
/// of the extended size field.
pub fn large_box_size_placeholder<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
) -> MuxResult<u64> {
    writer.write_u32::<BigEndian>(1)?; // size=1 signals extended size
    writer.write_all(box_type)?;
    let size_pos = writer.stream_position()?;
    writer.write_u64::<BigEndian>(0)?;
    Ok(size_pos)
}

/// Fill in a 64-bit extended size. `size_pos` points at the 8-byte
/// extended size field, right after the 8-byte standard header.
pub fn fill_large_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<()> {
    let current = writer.stream_position()?;
    let total_size = current - (size_pos - 8);
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u64::<BigEndian>(total_size)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(())
}

/// Rescale a tick count between time scales, rounding half up.
pub fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    let from = from as u128;
    let scaled = (value as u128 * to as u128 + from / 2) / from;
    scaled.min(u64::MAX as u128) as u64
}

/// Write an integer as 16.16 fixed point.
pub fn write_fixed_16_16<W: Write>(writer: &mut W, value: u16) -> MuxResult<()> {
    writer.write_u32::<BigEndian>((value as u32) << 16)?;
    Ok(())
}

/// Write the identity transformation matrix used by mvhd and tkhd.
pub fn write_unity_matrix<W: Write>(writer: &mut W) -> MuxResult<()> {
    const MATRIX: [u32; 9] = [
        0x0001_0000, 0, 0, //
        0, 0x0001_0000, 0, //
        0, 0, 0x4000_0000,
    ];
    for value in MATRIX {
        writer.write_u32::<BigEndian>(value)?;
    }
    Ok(())
}

/// Write zero padding bytes.
pub fn write_zeros<W: Write>(writer: &mut W, count: usize) -> MuxResult<()> {
    writer.write_all(&vec![0u8; count])?;
    Ok(())
}

/// ISO 639-2/T language code packed into 3x5 bits; "und" when the code
/// is not three lowercase letters.
pub fn encode_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_lowercase) {
        return encode_language("und");
    }
    bytes
        .iter()
        .fold(0u16, |acc, &b| (acc << 5) | (b - 0x60) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_write_box_header() {
        let mut buf = Vec::new();
        write_box_header(&mut buf, b"ftyp", 20).unwrap();
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x14]);
        assert_eq!(&buf[4..8], b"ftyp");
    }

    #[test]
    fn test_write_full_box_header() {
        let mut buf = Vec::new();
        write_full_box_header(&mut buf, b"tfhd", 16, 0, 0x020000).unwrap();
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[8..12], &[0x00, 0x02, 0x00, 0x00]);
    }

    #[test]
    fn test_begin_and_fill() {
        let mut cursor = Cursor::new(Vec::new());
        let outer = begin_box(&mut cursor, b"moov").unwrap();
        let inner = begin_full_box(&mut cursor, b"mvex", 1, 3).unwrap();
        cursor.write_all(&[0xAA; 4]).unwrap();
        fill_box_size(&mut cursor, inner).unwrap();
        fill_box_size(&mut cursor, outer).unwrap();

        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 8 + 12 + 4);
        assert_eq!(&buf[0..4], &[0, 0, 0, 24]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 16]);
        assert_eq!(&buf[16..20], &[1, 0, 0, 3]);
    }

    #[test]
    fn test_large_box_placeholder_and_fill() {
        let mut cursor = Cursor::new(Vec::new());
        let size_pos = large_box_size_placeholder(&mut cursor, b"mdat").unwrap();
        cursor.write_all(&[0xBB; 32]).unwrap();
        fill_large_box_size(&mut cursor, size_pos).unwrap();

        let buf = cursor.into_inner();
        assert_eq!(buf.len(), 48);
        assert_eq!(&buf[0..4], &[0, 0, 0, 1]);
        let extended_size = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        assert_eq!(extended_size, 48);
    }

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(90_000, 90_000, MOVIE_TIMESCALE), 1000);
        assert_eq!(rescale(1001, 30_000, MOVIE_TIMESCALE), 33); // 33.37
        assert_eq!(rescale(15, 30_000, MOVIE_TIMESCALE), 1); // 0.5 rounds up
        assert_eq!(rescale(5, 0, MOVIE_TIMESCALE), 0);
    }

    #[test]
    fn test_fixed_point_and_matrix() {
        let mut buf = Vec::new();
        write_fixed_16_16(&mut buf, 1920).unwrap();
        assert_eq!(&buf, &[0x07, 0x80, 0x00, 0x00]);

        let mut buf = Vec::new();
        write_unity_matrix(&mut buf).unwrap();
        assert_eq!(buf.len(), 36);
        assert_eq!(&buf[32..36], &[0x40, 0, 0, 0]);
    }

    #[test]
    fn test_encode_language() {
        assert_eq!(encode_language("und"), 0x55C4);
        assert_eq!(encode_language("eng"), 5575);
        assert_eq!(encode_language("EN"), 0x55C4);
    }

    #[test]
    fn test_creation_time_after_epoch() {
        assert!(mp4_creation_time() > MP4_EPOCH_OFFSET);
    }
}
