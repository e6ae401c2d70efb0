//! ISO BMFF box (atom) primitives.
//!
//! FourCC constants, header decoding and typed payload parsers for the
//! boxes the transcoder reads: track/media headers, the visual sample
//! entry and the sample table boxes.
//!
//! Every parser takes the box payload (header already stripped) plus the
//! absolute payload offset, which is only used for error reporting.
//!
//! Reference: ISO 14496-12 (ISO Base Media File Format).

use std::io::{self, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use rc_common::{DemuxError, DemuxResult};
use tracing::{debug, trace};

// ─── Box FourCC constants ────────────────────────────────────────────

/// Convert 4 ASCII bytes to a u32 FourCC code.
pub const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    ((a as u32) << 24) | ((b as u32) << 16) | ((c as u32) << 8) | (d as u32)
}

pub const FTYP: u32 = fourcc(b'f', b't', b'y', b'p');
pub const MOOV: u32 = fourcc(b'm', b'o', b'o', b'v');
pub const MVHD: u32 = fourcc(b'm', b'v', b'h', b'd');
pub const TRAK: u32 = fourcc(b't', b'r', b'a', b'k');
pub const TKHD: u32 = fourcc(b't', b'k', b'h', b'd');
pub const EDTS: u32 = fourcc(b'e', b'd', b't', b's');
pub const MDIA: u32 = fourcc(b'm', b'd', b'i', b'a');
pub const MDHD: u32 = fourcc(b'm', b'd', b'h', b'd');
pub const HDLR: u32 = fourcc(b'h', b'd', b'l', b'r');
pub const MINF: u32 = fourcc(b'm', b'i', b'n', b'f');
pub const DINF: u32 = fourcc(b'd', b'i', b'n', b'f');
pub const STBL: u32 = fourcc(b's', b't', b'b', b'l');
pub const STSD: u32 = fourcc(b's', b't', b's', b'd');
pub const STTS: u32 = fourcc(b's', b't', b't', b's');
pub const STSC: u32 = fourcc(b's', b't', b's', b'c');
pub const STSZ: u32 = fourcc(b's', b't', b's', b'z');
pub const STCO: u32 = fourcc(b's', b't', b'c', b'o');
pub const CO64: u32 = fourcc(b'c', b'o', b'6', b'4');
pub const STSS: u32 = fourcc(b's', b't', b's', b's');
pub const CTTS: u32 = fourcc(b'c', b't', b't', b's');
pub const UDTA: u32 = fourcc(b'u', b'd', b't', b'a');
pub const MVEX: u32 = fourcc(b'm', b'v', b'e', b'x');
pub const TREX: u32 = fourcc(b't', b'r', b'e', b'x');
pub const MOOF: u32 = fourcc(b'm', b'o', b'o', b'f');
pub const MFHD: u32 = fourcc(b'm', b'f', b'h', b'd');
pub const TRAF: u32 = fourcc(b't', b'r', b'a', b'f');
pub const TFHD: u32 = fourcc(b't', b'f', b'h', b'd');
pub const TFDT: u32 = fourcc(b't', b'f', b'd', b't');
pub const TRUN: u32 = fourcc(b't', b'r', b'u', b'n');
pub const MDAT: u32 = fourcc(b'm', b'd', b'a', b't');
pub const AVCC: u32 = fourcc(b'a', b'v', b'c', b'C');
pub const AVC1: u32 = fourcc(b'a', b'v', b'c', b'1');
pub const AVC3: u32 = fourcc(b'a', b'v', b'c', b'3');
pub const HEV1: u32 = fourcc(b'h', b'e', b'v', b'1');
pub const HVC1: u32 = fourcc(b'h', b'v', b'c', b'1');
pub const HVCC: u32 = fourcc(b'h', b'v', b'c', b'C');
pub const VIDE: u32 = fourcc(b'v', b'i', b'd', b'e');

/// Convert a FourCC u32 to a human-readable string for logging.
pub fn fourcc_to_string(cc: u32) -> String {
    cc.to_be_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}

/// Join a box path for error messages: `moov/trak/mdia`.
pub fn path_to_string(path: &[u32]) -> String {
    path.iter()
        .map(|&cc| fourcc_to_string(cc))
        .collect::<Vec<_>>()
        .join("/")
}

// ─── Box Header ─────────────────────────────────────────────────────

/// A decoded ISO BMFF box header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoxHeader {
    /// FourCC type code.
    pub box_type: u32,
    /// Total box size (including header), already resolved for
    /// "extends to end" boxes.
    pub size: u64,
    /// Offset of the box start in the buffer.
    pub offset: u64,
    /// Size of the header itself (8 or 16 bytes).
    pub header_size: u8,
}

impl BoxHeader {
    /// Byte offset where the box content (payload) starts.
    pub fn content_offset(&self) -> u64 {
        self.offset + self.header_size as u64
    }

    /// Byte size of the content (payload), excluding the header.
    pub fn content_size(&self) -> u64 {
        self.size - self.header_size as u64
    }

    /// Byte offset of the first byte after this box.
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }
}

/// Read the box header starting at `pos`, where the enclosing structure
/// ends at `end`. `size == 0` boxes are resolved to run up to `end`.
///
/// Fails with `MalformedContainer` if the header is truncated, the size
/// is smaller than the header, or the box runs past `end`.
pub fn read_box_header(data: &[u8], pos: u64, end: u64) -> DemuxResult<BoxHeader> {
    let remaining = end.saturating_sub(pos);
    if remaining < 8 {
        return Err(DemuxError::malformed(
            pos,
            format!("truncated box header: {remaining} bytes left"),
        ));
    }

    let start = pos as usize;
    let size32 = u32::from_be_bytes([data[start], data[start + 1], data[start + 2], data[start + 3]]);
    let box_type =
        u32::from_be_bytes([data[start + 4], data[start + 5], data[start + 6], data[start + 7]]);

    let (size, header_size) = match size32 {
        // Box extends to the end of its parent
        0 => (remaining, 8u8),
        1 => {
            if remaining < 16 {
                return Err(DemuxError::malformed(
                    pos,
                    format!(
                        "box '{}' declares a 64-bit size but only {remaining} bytes remain",
                        fourcc_to_string(box_type)
                    ),
                ));
            }
            let mut large = [0u8; 8];
            large.copy_from_slice(&data[start + 8..start + 16]);
            (u64::from_be_bytes(large), 16u8)
        }
        _ => (size32 as u64, 8u8),
    };

    if size < header_size as u64 {
        return Err(DemuxError::malformed(
            pos,
            format!(
                "box '{}' has invalid size {size} (less than header)",
                fourcc_to_string(box_type)
            ),
        ));
    }
    if size > remaining {
        return Err(DemuxError::malformed(
            pos,
            format!(
                "box '{}' declares {size} bytes but only {remaining} remain",
                fourcc_to_string(box_type)
            ),
        ));
    }

    trace!(
        "Box '{}' at offset {}, size {}",
        fourcc_to_string(box_type),
        pos,
        size
    );

    Ok(BoxHeader {
        box_type,
        size,
        offset: pos,
        header_size,
    })
}

/// Map a short read inside a payload to `MalformedContainer`.
fn short(offset: u64, what: &'static str) -> impl FnOnce(io::Error) -> DemuxError {
    move |_| DemuxError::malformed(offset, format!("{what} payload is truncated"))
}

/// Skip version (1) + flags (3), returning the version.
fn read_version(reader: &mut Cursor<&[u8]>, offset: u64, what: &'static str) -> DemuxResult<u8> {
    let version = reader.read_u8().map_err(short(offset, what))?;
    let mut flags = [0u8; 3];
    reader.read_exact(&mut flags).map_err(short(offset, what))?;
    Ok(version)
}

/// Entry count with a sanity bound: each entry needs at least
/// `entry_size` bytes of payload.
fn read_entry_count(
    reader: &mut Cursor<&[u8]>,
    offset: u64,
    what: &'static str,
    entry_size: usize,
) -> DemuxResult<usize> {
    let count = reader.read_u32::<BigEndian>().map_err(short(offset, what))? as usize;
    let left = reader.get_ref().len().saturating_sub(reader.position() as usize);
    if count.saturating_mul(entry_size) > left {
        return Err(DemuxError::malformed(
            offset,
            format!("{what} declares {count} entries but holds {left} bytes"),
        ));
    }
    Ok(count)
}

// ─── mdhd Box ───────────────────────────────────────────────────────

/// Parsed mdhd (Media Header) box -- per-track timescale and duration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MdhdBox {
    pub timescale: u32,
    pub duration: u64,
}

pub fn parse_mdhd(payload: &[u8], offset: u64) -> DemuxResult<MdhdBox> {
    let mut reader = Cursor::new(payload);
    let version = read_version(&mut reader, offset, "mdhd")?;
    let err = || short(offset, "mdhd");

    let (timescale, duration) = if version == 1 {
        let _creation_time = reader.read_u64::<BigEndian>().map_err(err())?;
        let _modification_time = reader.read_u64::<BigEndian>().map_err(err())?;
        let timescale = reader.read_u32::<BigEndian>().map_err(err())?;
        let duration = reader.read_u64::<BigEndian>().map_err(err())?;
        (timescale, duration)
    } else {
        let _creation_time = reader.read_u32::<BigEndian>().map_err(err())?;
        let _modification_time = reader.read_u32::<BigEndian>().map_err(err())?;
        let timescale = reader.read_u32::<BigEndian>().map_err(err())?;
        let duration = reader.read_u32::<BigEndian>().map_err(err())? as u64;
        (timescale, duration)
    };

    if timescale == 0 {
        return Err(DemuxError::malformed(offset, "mdhd timescale is zero"));
    }

    debug!("mdhd: timescale={}, duration={}", timescale, duration);
    Ok(MdhdBox {
        timescale,
        duration,
    })
}

// ─── hdlr Box ───────────────────────────────────────────────────────

/// Handler type FourCC ('vide', 'soun', ...) of an hdlr payload.
pub fn parse_hdlr(payload: &[u8], offset: u64) -> DemuxResult<u32> {
    let mut reader = Cursor::new(payload);
    read_version(&mut reader, offset, "hdlr")?;
    let _pre_defined = reader.read_u32::<BigEndian>().map_err(short(offset, "hdlr"))?;
    let handler_type = reader.read_u32::<BigEndian>().map_err(short(offset, "hdlr"))?;
    debug!("hdlr: handler_type='{}'", fourcc_to_string(handler_type));
    Ok(handler_type)
}

// ─── tkhd Box ───────────────────────────────────────────────────────

/// Parsed tkhd (Track Header) box -- track id, display dimensions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TkhdBox {
    pub track_id: u32,
    pub width: u32,
    pub height: u32,
}

pub fn parse_tkhd(payload: &[u8], offset: u64) -> DemuxResult<TkhdBox> {
    let mut reader = Cursor::new(payload);
    let version = read_version(&mut reader, offset, "tkhd")?;
    let err = || short(offset, "tkhd");

    let track_id = if version == 1 {
        let _creation_time = reader.read_u64::<BigEndian>().map_err(err())?;
        let _modification_time = reader.read_u64::<BigEndian>().map_err(err())?;
        let track_id = reader.read_u32::<BigEndian>().map_err(err())?;
        let _reserved = reader.read_u32::<BigEndian>().map_err(err())?;
        let _duration = reader.read_u64::<BigEndian>().map_err(err())?;
        track_id
    } else {
        let _creation_time = reader.read_u32::<BigEndian>().map_err(err())?;
        let _modification_time = reader.read_u32::<BigEndian>().map_err(err())?;
        let track_id = reader.read_u32::<BigEndian>().map_err(err())?;
        let _reserved = reader.read_u32::<BigEndian>().map_err(err())?;
        let _duration = reader.read_u32::<BigEndian>().map_err(err())?;
        track_id
    };

    // Skip: reserved (8), layer (2), alt_group (2), volume (2), reserved (2), matrix (36)
    let mut skip_buf = [0u8; 52];
    reader.read_exact(&mut skip_buf).map_err(err())?;

    // width and height are 16.16 fixed-point
    let width = reader.read_u32::<BigEndian>().map_err(err())? >> 16;
    let height = reader.read_u32::<BigEndian>().map_err(err())? >> 16;

    debug!("tkhd: track_id={}, {}x{}", track_id, width, height);
    Ok(TkhdBox {
        track_id,
        width,
        height,
    })
}

// ─── Visual sample entry ────────────────────────────────────────────

/// Bytes of fixed fields in a VisualSampleEntry before its child boxes.
pub const VISUAL_SAMPLE_ENTRY_SIZE: usize = 78;

/// Coded width/height of a visual sample entry (avc1, hvc1, ...).
pub fn parse_visual_sample_entry(payload: &[u8], offset: u64) -> DemuxResult<(u16, u16)> {
    if payload.len() < VISUAL_SAMPLE_ENTRY_SIZE {
        return Err(DemuxError::malformed(
            offset,
            format!(
                "visual sample entry has {} bytes, need {}",
                payload.len(),
                VISUAL_SAMPLE_ENTRY_SIZE
            ),
        ));
    }
    // reserved (6) + data_reference_index (2) + pre_defined/reserved (16)
    let width = u16::from_be_bytes([payload[24], payload[25]]);
    let height = u16::from_be_bytes([payload[26], payload[27]]);
    Ok((width, height))
}

// ─── Sample table boxes ─────────────────────────────────────────────

/// stts (Decoding Time to Sample) entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

pub fn parse_stts(payload: &[u8], offset: u64) -> DemuxResult<Vec<SttsEntry>> {
    let mut reader = Cursor::new(payload);
    read_version(&mut reader, offset, "stts")?;
    let entry_count = read_entry_count(&mut reader, offset, "stts", 8)?;
    let mut entries = Vec::with_capacity(entry_count);

    for _ in 0..entry_count {
        let sample_count = reader.read_u32::<BigEndian>().map_err(short(offset, "stts"))?;
        let sample_delta = reader.read_u32::<BigEndian>().map_err(short(offset, "stts"))?;
        entries.push(SttsEntry {
            sample_count,
            sample_delta,
        });
    }

    debug!("stts: {} entries", entries.len());
    Ok(entries)
}

/// ctts (Composition Time to Sample) entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CttsEntry {
    pub sample_count: u32,
    /// Composition offset (can be negative in version 1).
    pub sample_offset: i32,
}

pub fn parse_ctts(payload: &[u8], offset: u64) -> DemuxResult<Vec<CttsEntry>> {
    let mut reader = Cursor::new(payload);
    let version = read_version(&mut reader, offset, "ctts")?;
    let entry_count = read_entry_count(&mut reader, offset, "ctts", 8)?;
    let mut entries = Vec::with_capacity(entry_count);

    for _ in 0..entry_count {
        let sample_count = reader.read_u32::<BigEndian>().map_err(short(offset, "ctts"))?;
        let sample_offset = if version == 0 {
            reader.read_u32::<BigEndian>().map_err(short(offset, "ctts"))? as i32
        } else {
            reader.read_i32::<BigEndian>().map_err(short(offset, "ctts"))?
        };
        entries.push(CttsEntry {
            sample_count,
            sample_offset,
        });
    }

    debug!("ctts: {} entries (version {})", entries.len(), version);
    Ok(entries)
}

/// stsc (Sample to Chunk) entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StscEntry {
    /// First chunk number (1-based).
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

pub fn parse_stsc(payload: &[u8], offset: u64) -> DemuxResult<Vec<StscEntry>> {
    let mut reader = Cursor::new(payload);
    read_version(&mut reader, offset, "stsc")?;
    let entry_count = read_entry_count(&mut reader, offset, "stsc", 12)?;
    let mut entries = Vec::with_capacity(entry_count);

    for _ in 0..entry_count {
        let err = || short(offset, "stsc");
        entries.push(StscEntry {
            first_chunk: reader.read_u32::<BigEndian>().map_err(err())?,
            samples_per_chunk: reader.read_u32::<BigEndian>().map_err(err())?,
            sample_description_index: reader.read_u32::<BigEndian>().map_err(err())?,
        });
    }

    debug!("stsc: {} entries", entries.len());
    Ok(entries)
}

/// Parsed stsz (Sample Size) box.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StszBox {
    /// If non-zero, all samples have this uniform size.
    pub default_sample_size: u32,
    /// Individual sample sizes (empty if default_sample_size > 0).
    pub sample_sizes: Vec<u32>,
    pub sample_count: u32,
}

pub fn parse_stsz(payload: &[u8], offset: u64) -> DemuxResult<StszBox> {
    let mut reader = Cursor::new(payload);
    read_version(&mut reader, offset, "stsz")?;
    let default_sample_size = reader.read_u32::<BigEndian>().map_err(short(offset, "stsz"))?;

    let (sample_count, sample_sizes) = if default_sample_size == 0 {
        let count = read_entry_count(&mut reader, offset, "stsz", 4)?;
        let mut sizes = Vec::with_capacity(count);
        for _ in 0..count {
            sizes.push(reader.read_u32::<BigEndian>().map_err(short(offset, "stsz"))?);
        }
        (count as u32, sizes)
    } else {
        let count = reader.read_u32::<BigEndian>().map_err(short(offset, "stsz"))?;
        (count, Vec::new())
    };

    debug!(
        "stsz: {} samples, default_size={}",
        sample_count, default_sample_size
    );
    Ok(StszBox {
        default_sample_size,
        sample_sizes,
        sample_count,
    })
}

/// Parse stco (32-bit) or co64 (64-bit) chunk offsets.
pub fn parse_chunk_offsets(payload: &[u8], offset: u64, wide: bool) -> DemuxResult<Vec<u64>> {
    let what = if wide { "co64" } else { "stco" };
    let mut reader = Cursor::new(payload);
    read_version(&mut reader, offset, what)?;
    let entry_count = read_entry_count(&mut reader, offset, what, if wide { 8 } else { 4 })?;
    let mut offsets = Vec::with_capacity(entry_count);

    for _ in 0..entry_count {
        let value = if wide {
            reader.read_u64::<BigEndian>().map_err(short(offset, what))?
        } else {
            reader.read_u32::<BigEndian>().map_err(short(offset, what))? as u64
        };
        offsets.push(value);
    }

    debug!("{}: {} chunk offsets", what, offsets.len());
    Ok(offsets)
}

/// Parse stss (Sync Sample / Keyframe) box. Returns 1-based sample numbers.
pub fn parse_stss(payload: &[u8], offset: u64) -> DemuxResult<Vec<u32>> {
    let mut reader = Cursor::new(payload);
    read_version(&mut reader, offset, "stss")?;
    let entry_count = read_entry_count(&mut reader, offset, "stss", 4)?;
    let mut sync_samples = Vec::with_capacity(entry_count);

    for _ in 0..entry_count {
        sync_samples.push(reader.read_u32::<BigEndian>().map_err(short(offset, "stss"))?);
    }

    debug!("stss: {} sync samples", sync_samples.len());
    Ok(sync_samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{full_box_payload, make_box, make_box_ext};

    #[test]
    fn test_read_box_header_basic() {
        let data = make_box(FTYP, &[0u8; 12]);
        let header = read_box_header(&data, 0, data.len() as u64).unwrap();

        assert_eq!(header.box_type, FTYP);
        assert_eq!(header.size, 20);
        assert_eq!(header.offset, 0);
        assert_eq!(header.header_size, 8);
        assert_eq!(header.content_offset(), 8);
        assert_eq!(header.content_size(), 12);
        assert_eq!(header.end_offset(), 20);
    }

    #[test]
    fn test_read_box_header_extended_size() {
        let data = make_box_ext(MOOV, &[0u8; 32]);
        let header = read_box_header(&data, 0, data.len() as u64).unwrap();

        assert_eq!(header.box_type, MOOV);
        assert_eq!(header.size, 48);
        assert_eq!(header.header_size, 16);
        assert_eq!(header.content_offset(), 16);
        assert_eq!(header.content_size(), 32);
    }

    #[test]
    fn test_size_zero_extends_to_end() {
        let mut data = make_box(MDAT, &[7u8; 10]);
        data[0..4].copy_from_slice(&0u32.to_be_bytes());
        let header = read_box_header(&data, 0, data.len() as u64).unwrap();
        assert_eq!(header.size, 18);
    }

    #[test]
    fn test_box_longer_than_buffer_is_malformed() {
        let mut data = make_box(MOOV, &[0u8; 4]);
        data[0..4].copy_from_slice(&100u32.to_be_bytes());
        let err = read_box_header(&data, 0, data.len() as u64).unwrap_err();
        assert!(matches!(err, DemuxError::MalformedContainer { offset: 0, .. }));
    }

    #[test]
    fn test_size_smaller_than_header_is_malformed() {
        let mut data = make_box(MOOV, &[]);
        data[0..4].copy_from_slice(&4u32.to_be_bytes());
        assert!(read_box_header(&data, 0, 8).is_err());
    }

    #[test]
    fn test_truncated_header() {
        let data = [0u8, 0, 0];
        let err = read_box_header(&data, 0, 3).unwrap_err();
        assert!(err.to_string().contains("truncated box header"));
    }

    #[test]
    fn test_fourcc_to_string() {
        assert_eq!(fourcc_to_string(FTYP), "ftyp");
        assert_eq!(fourcc_to_string(0x0001_6162), "??ab");
        assert_eq!(path_to_string(&[MOOV, TRAK, MDIA]), "moov/trak/mdia");
    }

    #[test]
    fn test_parse_mdhd_v0_and_v1() {
        let mut v0 = Vec::new();
        v0.extend_from_slice(&[0u32.to_be_bytes(), 0u32.to_be_bytes(), 0u32.to_be_bytes()].concat());
        v0.extend_from_slice(&30_000u32.to_be_bytes());
        v0.extend_from_slice(&300_300u32.to_be_bytes());
        v0.extend_from_slice(&[0x55, 0xC4, 0, 0]);
        let mdhd = parse_mdhd(&v0, 0).unwrap();
        assert_eq!(mdhd.timescale, 30_000);
        assert_eq!(mdhd.duration, 300_300);

        let mut v1 = vec![1, 0, 0, 0];
        v1.extend_from_slice(&[0u8; 16]);
        v1.extend_from_slice(&90_000u32.to_be_bytes());
        v1.extend_from_slice(&(u32::MAX as u64 + 5).to_be_bytes());
        let mdhd = parse_mdhd(&v1, 0).unwrap();
        assert_eq!(mdhd.duration, u32::MAX as u64 + 5);
    }

    #[test]
    fn test_parse_mdhd_zero_timescale() {
        let payload = [0u8; 24];
        assert!(parse_mdhd(&payload, 40).is_err());
    }

    #[test]
    fn test_parse_tkhd() {
        let mut p = vec![0u8, 0, 0, 3];
        p.extend_from_slice(&[0u8; 8]);
        p.extend_from_slice(&7u32.to_be_bytes());
        p.extend_from_slice(&[0u8; 8]);
        p.extend_from_slice(&[0u8; 52]);
        p.extend_from_slice(&(1280u32 << 16).to_be_bytes());
        p.extend_from_slice(&(720u32 << 16).to_be_bytes());
        let tkhd = parse_tkhd(&p, 0).unwrap();
        assert_eq!(
            tkhd,
            TkhdBox {
                track_id: 7,
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn test_parse_hdlr() {
        let mut p = vec![0u8; 8];
        p.extend_from_slice(b"vide");
        p.extend_from_slice(&[0u8; 12]);
        p.extend_from_slice(b"VideoHandler\0");
        assert_eq!(parse_hdlr(&p, 0).unwrap(), VIDE);
    }

    #[test]
    fn test_parse_visual_sample_entry() {
        let mut p = vec![0u8; VISUAL_SAMPLE_ENTRY_SIZE];
        p[24..26].copy_from_slice(&640u16.to_be_bytes());
        p[26..28].copy_from_slice(&360u16.to_be_bytes());
        assert_eq!(parse_visual_sample_entry(&p, 0).unwrap(), (640, 360));
        assert!(parse_visual_sample_entry(&p[..40], 0).is_err());
    }

    #[test]
    fn test_parse_stts() {
        let payload = full_box_payload(&[&2u32.to_be_bytes(), &[0, 0, 0, 9], &1001u32.to_be_bytes(), &[0, 0, 0, 1], &2002u32.to_be_bytes()]);
        let entries = parse_stts(&payload, 0).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sample_count, 9);
        assert_eq!(entries[1].sample_delta, 2002);
    }

    #[test]
    fn test_parse_ctts_signed() {
        let mut payload = vec![1u8, 0, 0, 0];
        payload.extend_from_slice(&1u32.to_be_bytes());
        payload.extend_from_slice(&3u32.to_be_bytes());
        payload.extend_from_slice(&(-512i32).to_be_bytes());
        let entries = parse_ctts(&payload, 0).unwrap();
        assert_eq!(entries[0].sample_offset, -512);
    }

    #[test]
    fn test_entry_count_larger_than_payload() {
        let payload = full_box_payload(&[&1000u32.to_be_bytes(), &[0u8; 8]]);
        let err = parse_stts(&payload, 64).unwrap_err();
        assert!(matches!(err, DemuxError::MalformedContainer { offset: 64, .. }));
    }

    #[test]
    fn test_parse_stsz_uniform_and_variable() {
        let uniform = full_box_payload(&[&100u32.to_be_bytes(), &5u32.to_be_bytes()]);
        let stsz = parse_stsz(&uniform, 0).unwrap();
        assert_eq!(stsz.sample_count, 5);
        assert!(stsz.sample_sizes.is_empty());

        let variable = full_box_payload(&[
            &0u32.to_be_bytes(),
            &2u32.to_be_bytes(),
            &10u32.to_be_bytes(),
            &20u32.to_be_bytes(),
        ]);
        let stsz = parse_stsz(&variable, 0).unwrap();
        assert_eq!(stsz.sample_sizes, vec![10, 20]);
    }

    #[test]
    fn test_parse_chunk_offsets() {
        let stco = full_box_payload(&[&2u32.to_be_bytes(), &48u32.to_be_bytes(), &96u32.to_be_bytes()]);
        assert_eq!(parse_chunk_offsets(&stco, 0, false).unwrap(), vec![48, 96]);

        let co64 = full_box_payload(&[&1u32.to_be_bytes(), &(1u64 << 33).to_be_bytes()]);
        assert_eq!(parse_chunk_offsets(&co64, 0, true).unwrap(), vec![1u64 << 33]);
    }

    #[test]
    fn test_parse_stss_and_stsc() {
        let stss = full_box_payload(&[&2u32.to_be_bytes(), &1u32.to_be_bytes(), &31u32.to_be_bytes()]);
        assert_eq!(parse_stss(&stss, 0).unwrap(), vec![1, 31]);

        let stsc = full_box_payload(&[&1u32.to_be_bytes(), &1u32.to_be_bytes(), &10u32.to_be_bytes(), &1u32.to_be_bytes()]);
        let entries = parse_stsc(&stsc, 0).unwrap();
        assert_eq!(entries[0].samples_per_chunk, 10);
    }
}
