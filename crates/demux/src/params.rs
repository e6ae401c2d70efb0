//! Track metadata and codec configuration extraction.
//!
//! Reads a `trak` subtree into a [`TrackDescriptor`] and pulls the
//! avcC/hvcC decoder configuration record out of its sample entry.

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};
use rc_common::{DemuxError, DemuxResult, ParameterSet, Resolution, TrackDescriptor, VideoCodec};
use tracing::{debug, warn};

use crate::boxes::*;
use crate::tree::{BoxNode, BoxTree};

/// AVC Decoder Configuration Record (avcC payload).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvccConfig {
    pub profile: u8,
    pub profile_compat: u8,
    pub level: u8,
    /// NAL unit length size minus one (typically 3, meaning 4-byte lengths).
    pub length_size_minus_one: u8,
    pub sps_list: Vec<Vec<u8>>,
    pub pps_list: Vec<Vec<u8>>,
}

impl AvccConfig {
    /// The byte size used for NAL unit length fields in the bitstream.
    pub fn length_size(&self) -> u8 {
        self.length_size_minus_one + 1
    }
}

/// Parse an avcC payload. `offset` is only used for error reporting.
pub fn parse_avcc(payload: &[u8], offset: u64) -> DemuxResult<AvccConfig> {
    let mut reader = Cursor::new(payload);
    let err = |_| DemuxError::malformed(offset, "avcC record is truncated");

    let config_version = reader.read_u8().map_err(err)?;
    if config_version != 1 {
        return Err(DemuxError::malformed(
            offset,
            format!("unexpected avcC version: {config_version}"),
        ));
    }

    let profile = reader.read_u8().map_err(err)?;
    let profile_compat = reader.read_u8().map_err(err)?;
    let level = reader.read_u8().map_err(err)?;
    let length_size_minus_one = reader.read_u8().map_err(err)? & 0x03;

    let sps_count = (reader.read_u8().map_err(err)? & 0x1F) as usize;
    let sps_list = read_nal_list(&mut reader, sps_count).map_err(err)?;
    let pps_count = reader.read_u8().map_err(err)? as usize;
    let pps_list = read_nal_list(&mut reader, pps_count).map_err(err)?;

    if sps_list.is_empty() {
        warn!("avcC at offset {} carries no SPS", offset);
    }

    Ok(AvccConfig {
        profile,
        profile_compat,
        level,
        length_size_minus_one,
        sps_list,
        pps_list,
    })
}

/// HEVC Decoder Configuration Record (hvcC payload), reduced to what the
/// pipeline looks at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HvccConfig {
    pub general_profile_idc: u8,
    pub general_level_idc: u8,
    pub length_size_minus_one: u8,
    /// (NAL unit type, units) per array: VPS=32, SPS=33, PPS=34.
    pub arrays: Vec<(u8, Vec<Vec<u8>>)>,
}

impl HvccConfig {
    pub fn length_size(&self) -> u8 {
        self.length_size_minus_one + 1
    }
}

/// Fixed part of an hvcC record before the NAL arrays.
const HVCC_FIXED_SIZE: usize = 23;

pub fn parse_hvcc(payload: &[u8], offset: u64) -> DemuxResult<HvccConfig> {
    if payload.len() < HVCC_FIXED_SIZE {
        return Err(DemuxError::malformed(
            offset,
            format!("hvcC record is {} bytes, need {HVCC_FIXED_SIZE}", payload.len()),
        ));
    }
    if payload[0] != 1 {
        return Err(DemuxError::malformed(
            offset,
            format!("unexpected hvcC version: {}", payload[0]),
        ));
    }

    let mut reader = Cursor::new(&payload[HVCC_FIXED_SIZE - 1..]);
    let err = |_| DemuxError::malformed(offset, "hvcC arrays are truncated");
    let num_arrays = reader.read_u8().map_err(err)? as usize;
    let mut arrays = Vec::with_capacity(num_arrays);
    for _ in 0..num_arrays {
        let nal_type = reader.read_u8().map_err(err)? & 0x3F;
        let count = reader.read_u16::<BigEndian>().map_err(err)? as usize;
        arrays.push((nal_type, read_nal_list(&mut reader, count).map_err(err)?));
    }

    Ok(HvccConfig {
        general_profile_idc: payload[1] & 0x1F,
        general_level_idc: payload[12],
        length_size_minus_one: payload[21] & 0x03,
        arrays,
    })
}

fn read_nal_list(reader: &mut Cursor<&[u8]>, count: usize) -> std::io::Result<Vec<Vec<u8>>> {
    let mut list = Vec::with_capacity(count.min(32));
    for _ in 0..count {
        let len = reader.read_u16::<BigEndian>()? as usize;
        let mut nal = vec![0u8; len];
        reader.read_exact(&mut nal)?;
        list.push(nal);
    }
    Ok(list)
}

/// Reads track metadata and decoder configuration out of a `trak` box.
pub struct ParameterExtractor;

impl ParameterExtractor {
    /// Describe a track. Returns `Ok(None)` for non-video tracks and for
    /// video tracks whose sample entry is not H.264/H.265.
    pub fn describe(tree: &BoxTree<'_>, trak: &BoxNode) -> DemuxResult<Option<TrackDescriptor>> {
        let hdlr = trak.find(&[MDIA, HDLR])?;
        let handler = parse_hdlr(tree.payload(hdlr), hdlr.header.content_offset())?;
        if handler != VIDE {
            debug!("Skipping '{}' track", fourcc_to_string(handler));
            return Ok(None);
        }

        let tkhd = trak.find(&[TKHD])?;
        let tkhd = parse_tkhd(tree.payload(tkhd), tkhd.header.content_offset())?;
        let mdhd = trak.find(&[MDIA, MDHD])?;
        let mdhd = parse_mdhd(tree.payload(mdhd), mdhd.header.content_offset())?;

        let Some((codec, entry)) = Self::video_entry(trak)? else {
            return Ok(None);
        };
        let (width, height) =
            parse_visual_sample_entry(tree.payload(entry), entry.header.content_offset())?;

        let stsz = trak.find(&[MDIA, MINF, STBL, STSZ])?;
        let stsz = parse_stsz(tree.payload(stsz), stsz.header.content_offset())?;

        let descriptor = TrackDescriptor {
            track_id: tkhd.track_id,
            codec,
            sample_entry: entry.box_type().to_be_bytes(),
            resolution: Resolution::new(width as u32, height as u32),
            time_scale: mdhd.timescale,
            duration: mdhd.duration,
            sample_count: stsz.sample_count,
        };
        debug!(
            track_id = descriptor.track_id,
            codec = codec.display_name(),
            resolution = %descriptor.resolution,
            samples = descriptor.sample_count,
            "Video track"
        );
        Ok(Some(descriptor))
    }

    /// The decoder configuration record of a video track, header stripped.
    pub fn extract(tree: &BoxTree<'_>, trak: &BoxNode) -> DemuxResult<ParameterSet> {
        let tkhd = trak.find(&[TKHD])?;
        let track_id = parse_tkhd(tree.payload(tkhd), tkhd.header.content_offset())?.track_id;
        let (codec, entry, config) = Self::configured_entry(trak)?
            .ok_or(DemuxError::MissingParameterSet { track_id })?;
        let payload = tree.payload(config);
        let offset = config.header.content_offset();

        match codec {
            VideoCodec::H264 => {
                let avcc = parse_avcc(payload, offset)?;
                debug!(
                    "avcC: profile={} level={} nal_length={} sps={} pps={}",
                    avcc.profile,
                    avcc.level,
                    avcc.length_size(),
                    avcc.sps_list.len(),
                    avcc.pps_list.len()
                );
            }
            VideoCodec::H265 => {
                let hvcc = parse_hvcc(payload, offset)?;
                debug!(
                    "hvcC: profile={} level={} nal_length={} arrays={}",
                    hvcc.general_profile_idc,
                    hvcc.general_level_idc,
                    hvcc.length_size(),
                    hvcc.arrays.len()
                );
            }
        }

        Ok(ParameterSet::new(
            codec,
            entry.box_type().to_be_bytes(),
            payload.to_vec(),
        ))
    }

    /// First H.264/H.265 sample entry that carries its configuration box.
    fn configured_entry(trak: &BoxNode) -> DemuxResult<Option<(VideoCodec, &BoxNode, &BoxNode)>> {
        let stsd = trak.find(&[MDIA, MINF, STBL, STSD])?;
        for entry in &stsd.children {
            let Some(codec) = VideoCodec::from_sample_entry(entry.box_type().to_be_bytes()) else {
                continue;
            };
            let config_type = match codec {
                VideoCodec::H264 => AVCC,
                VideoCodec::H265 => HVCC,
            };
            if let Some(config) = entry.child(config_type) {
                return Ok(Some((codec, entry, config)));
            }
        }
        Ok(None)
    }

    /// First H.264/H.265 sample entry under `stsd`.
    fn video_entry(trak: &BoxNode) -> DemuxResult<Option<(VideoCodec, &BoxNode)>> {
        let stsd = trak.find(&[MDIA, MINF, STBL, STSD])?;
        for entry in &stsd.children {
            if let Some(codec) = VideoCodec::from_sample_entry(entry.box_type().to_be_bytes()) {
                return Ok(Some((codec, entry)));
            }
            warn!(
                "Unsupported video sample entry '{}'",
                fourcc_to_string(entry.box_type())
            );
        }
        Ok(None)
    }
}
