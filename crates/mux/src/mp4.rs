//! MP4 box (atom) writers for ISO Base Media File Format (ISO 14496-12).
//!
//! This module writes the structural boxes of the output: ftyp and the
//! moov hierarchy (mvhd, trak, tkhd, mdia, mdhd, hdlr, minf, stbl, and
//! mvex for fragmented files). Media data (mdat) and movie fragments
//! are written by the writers themselves.

use byteorder::{BigEndian, WriteBytesExt};
use std::io::{Seek, Write};

use crate::atoms::{
    begin_box, begin_full_box, encode_language, fill_box_size, mp4_creation_time, rescale,
    write_fixed_16_16, write_full_box_header, write_unity_matrix, write_zeros, MOVIE_TIMESCALE,
};
use crate::error::MuxResult;
use crate::writer::{SampleInfo, TrackConfig};

/// Largest number of samples grouped into one stco chunk.
pub const MAX_SAMPLES_PER_CHUNK: u32 = 32;

/// Which brand set goes into `ftyp`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileBrand {
    /// Classic moov + mdat file.
    Progressive,
    /// Init segment followed by movie fragments.
    Fragmented,
}

/// One track as it goes into the moov box.
#[derive(Clone, Copy, Debug)]
pub struct TrackLayout<'a> {
    pub track_id: u32,
    pub config: &'a TrackConfig,
    /// Total duration in track ticks (0 for a fragmented init segment).
    pub duration: u64,
    /// Sample table entries; empty for a fragmented init segment.
    pub samples: &'a [SampleInfo],
}

/// Write the ftyp (File Type) box.
pub fn write_ftyp<W: Write + Seek>(writer: &mut W, brand: FileBrand, codec_brand: &[u8; 4]) -> MuxResult<()> {
    let pos = begin_box(writer, b"ftyp")?;
    match brand {
        FileBrand::Progressive => {
            writer.write_all(b"isom")?;
            writer.write_u32::<BigEndian>(0x200)?;
            for compatible in [b"isom", b"iso2", codec_brand, b"mp41"] {
                writer.write_all(compatible)?;
            }
        }
        FileBrand::Fragmented => {
            writer.write_all(b"iso6")?;
            writer.write_u32::<BigEndian>(0)?;
            for compatible in [b"iso6", b"isom", codec_brand, b"mp41"] {
                writer.write_all(compatible)?;
            }
        }
    }
    fill_box_size(writer, pos)
}

/// Write the mvhd (Movie Header) box; version 1 when the duration needs
/// 64 bits.
pub fn write_mvhd<W: Write + Seek>(writer: &mut W, duration: u64, next_track_id: u32) -> MuxResult<()> {
    let creation_time = mp4_creation_time();
    let wide = duration > u32::MAX as u64;
    let pos = begin_full_box(writer, b"mvhd", wide as u8, 0)?;

    if wide {
        writer.write_u64::<BigEndian>(creation_time)?;
        writer.write_u64::<BigEndian>(creation_time)?;
        writer.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
        writer.write_u64::<BigEndian>(duration)?;
    } else {
        writer.write_u32::<BigEndian>(creation_time as u32)?;
        writer.write_u32::<BigEndian>(creation_time as u32)?;
        writer.write_u32::<BigEndian>(MOVIE_TIMESCALE)?;
        writer.write_u32::<BigEndian>(duration as u32)?;
    }

    writer.write_u32::<BigEndian>(0x0001_0000)?; // rate 1.0
    writer.write_u16::<BigEndian>(0x0100)?; // volume 1.0
    write_zeros(writer, 10)?; // reserved
    write_unity_matrix(writer)?;
    write_zeros(writer, 24)?; // pre_defined
    writer.write_u32::<BigEndian>(next_track_id)?;

    fill_box_size(writer, pos)
}

/// Write the tkhd (Track Header) box; flags enabled | in_movie.
pub fn write_tkhd<W: Write + Seek>(writer: &mut W, track: &TrackLayout<'_>, duration: u64) -> MuxResult<()> {
    let creation_time = mp4_creation_time();
    let wide = duration > u32::MAX as u64;
    let pos = begin_full_box(writer, b"tkhd", wide as u8, 0x000003)?;

    if wide {
        writer.write_u64::<BigEndian>(creation_time)?;
        writer.write_u64::<BigEndian>(creation_time)?;
        writer.write_u32::<BigEndian>(track.track_id)?;
        write_zeros(writer, 4)?;
        writer.write_u64::<BigEndian>(duration)?;
    } else {
        writer.write_u32::<BigEndian>(creation_time as u32)?;
        writer.write_u32::<BigEndian>(creation_time as u32)?;
        writer.write_u32::<BigEndian>(track.track_id)?;
        write_zeros(writer, 4)?;
        writer.write_u32::<BigEndian>(duration as u32)?;
    }

    write_zeros(writer, 8)?; // reserved
    writer.write_i16::<BigEndian>(0)?; // layer
    writer.write_i16::<BigEndian>(0)?; // alternate_group
    writer.write_u16::<BigEndian>(0)?; // volume (video)
    write_zeros(writer, 2)?;
    write_unity_matrix(writer)?;
    write_fixed_16_16(writer, track.config.resolution.width as u16)?;
    write_fixed_16_16(writer, track.config.resolution.height as u16)?;

    fill_box_size(writer, pos)
}

/// Write the mdhd (Media Header) box.
pub fn write_mdhd<W: Write + Seek>(writer: &mut W, time_scale: u32, duration: u64) -> MuxResult<()> {
    let creation_time = mp4_creation_time();
    let wide = duration > u32::MAX as u64;
    let pos = begin_full_box(writer, b"mdhd", wide as u8, 0)?;

    if wide {
        writer.write_u64::<BigEndian>(creation_time)?;
        writer.write_u64::<BigEndian>(creation_time)?;
        writer.write_u32::<BigEndian>(time_scale)?;
        writer.write_u64::<BigEndian>(duration)?;
    } else {
        writer.write_u32::<BigEndian>(creation_time as u32)?;
        writer.write_u32::<BigEndian>(creation_time as u32)?;
        writer.write_u32::<BigEndian>(time_scale)?;
        writer.write_u32::<BigEndian>(duration as u32)?;
    }
    writer.write_u16::<BigEndian>(encode_language("und"))?;
    writer.write_u16::<BigEndian>(0)?; // pre_defined

    fill_box_size(writer, pos)
}

/// Write the hdlr (Handler Reference) box for a video track.
pub fn write_hdlr<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    let pos = begin_full_box(writer, b"hdlr", 0, 0)?;
    write_zeros(writer, 4)?; // pre_defined
    writer.write_all(b"vide")?;
    write_zeros(writer, 12)?; // reserved
    writer.write_all(b"VideoHandler\0")?;
    fill_box_size(writer, pos)
}

/// Write the stsd box: one visual sample entry carrying the codec
/// configuration box verbatim.
pub fn write_stsd<W: Write + Seek>(writer: &mut W, config: &TrackConfig) -> MuxResult<()> {
    let pos = begin_full_box(writer, b"stsd", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?; // entry_count

    let entry = begin_box(writer, &config.sample_entry)?;
    write_zeros(writer, 6)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // data_reference_index
    write_zeros(writer, 16)?; // pre_defined + reserved
    writer.write_u16::<BigEndian>(config.resolution.width as u16)?;
    writer.write_u16::<BigEndian>(config.resolution.height as u16)?;
    writer.write_u32::<BigEndian>(0x0048_0000)?; // horizresolution 72 dpi
    writer.write_u32::<BigEndian>(0x0048_0000)?; // vertresolution 72 dpi
    write_zeros(writer, 4)?; // reserved
    writer.write_u16::<BigEndian>(1)?; // frame_count
    write_zeros(writer, 32)?; // compressorname
    writer.write_u16::<BigEndian>(0x0018)?; // depth
    writer.write_i16::<BigEndian>(-1)?; // pre_defined

    let record = begin_box(writer, &config.codec.config_box())?;
    writer.write_all(&config.description)?;
    fill_box_size(writer, record)?;

    fill_box_size(writer, entry)?;
    fill_box_size(writer, pos)
}

/// Write the stbl (Sample Table) box. With no samples the tables are
/// present but empty, as a fragmented init segment requires.
pub fn write_stbl<W: Write + Seek>(
    writer: &mut W,
    config: &TrackConfig,
    samples: &[SampleInfo],
) -> MuxResult<()> {
    let pos = begin_box(writer, b"stbl")?;
    write_stsd(writer, config)?;
    write_stts(writer, samples)?;
    if samples.iter().any(|s| s.composition_offset != 0) {
        write_ctts(writer, samples)?;
    }

    let chunks = group_chunks(samples);
    write_stsc(writer, &chunks)?;
    write_stsz(writer, samples)?;
    let wide = chunks.iter().any(|c| c.offset > u32::MAX as u64);
    write_chunk_offsets(writer, &chunks, wide)?;

    // An absent stss means every sample is a sync sample.
    if !samples.iter().all(|s| s.is_sync) {
        write_stss(writer, samples)?;
    }
    fill_box_size(writer, pos)
}

/// Run-length encode consecutive equal values: Vec<(count, value)>.
fn run_length<T: PartialEq + Copy>(values: impl IntoIterator<Item = T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

fn write_stts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let entries = run_length(samples.iter().map(|s| s.duration));
    let pos = begin_full_box(writer, b"stts", 0, 0)?;
    writer.write_u32::<BigEndian>(entries.len() as u32)?;
    for (count, delta) in entries {
        writer.write_u32::<BigEndian>(count)?;
        writer.write_u32::<BigEndian>(delta)?;
    }
    fill_box_size(writer, pos)
}

/// ctts, version 1 (signed) only when some offset is negative.
fn write_ctts<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let entries = run_length(samples.iter().map(|s| s.composition_offset));
    let signed = entries.iter().any(|&(_, offset)| offset < 0);
    let pos = begin_full_box(writer, b"ctts", signed as u8, 0)?;
    writer.write_u32::<BigEndian>(entries.len() as u32)?;
    for (count, offset) in entries {
        writer.write_u32::<BigEndian>(count)?;
        writer.write_i32::<BigEndian>(offset)?;
    }
    fill_box_size(writer, pos)
}

/// A run of samples stored back to back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ChunkRun {
    offset: u64,
    samples: u32,
}

/// Group samples into chunks: contiguous in the file and at most
/// [`MAX_SAMPLES_PER_CHUNK`] long.
fn group_chunks(samples: &[SampleInfo]) -> Vec<ChunkRun> {
    let mut chunks: Vec<ChunkRun> = Vec::new();
    let mut next_offset = None;
    for sample in samples {
        match chunks.last_mut() {
            Some(run) if next_offset == Some(sample.offset) && run.samples < MAX_SAMPLES_PER_CHUNK => {
                run.samples += 1;
            }
            _ => chunks.push(ChunkRun {
                offset: sample.offset,
                samples: 1,
            }),
        }
        next_offset = Some(sample.offset + sample.size as u64);
    }
    chunks
}

fn write_stsc<W: Write + Seek>(writer: &mut W, chunks: &[ChunkRun]) -> MuxResult<()> {
    let mut entries: Vec<(u32, u32)> = Vec::new();
    for (index, chunk) in chunks.iter().enumerate() {
        if entries.last().map(|&(_, n)| n) != Some(chunk.samples) {
            entries.push((index as u32 + 1, chunk.samples));
        }
    }

    let pos = begin_full_box(writer, b"stsc", 0, 0)?;
    writer.write_u32::<BigEndian>(entries.len() as u32)?;
    for (first_chunk, samples_per_chunk) in entries {
        writer.write_u32::<BigEndian>(first_chunk)?;
        writer.write_u32::<BigEndian>(samples_per_chunk)?;
        writer.write_u32::<BigEndian>(1)?; // sample_description_index
    }
    fill_box_size(writer, pos)
}

fn write_stsz<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let pos = begin_full_box(writer, b"stsz", 0, 0)?;
    let uniform = samples
        .first()
        .map(|first| first.size)
        .filter(|&size| samples.iter().all(|s| s.size == size));

    match uniform {
        Some(size) => {
            writer.write_u32::<BigEndian>(size)?;
            writer.write_u32::<BigEndian>(samples.len() as u32)?;
        }
        None => {
            writer.write_u32::<BigEndian>(0)?;
            writer.write_u32::<BigEndian>(samples.len() as u32)?;
            for sample in samples {
                writer.write_u32::<BigEndian>(sample.size)?;
            }
        }
    }
    fill_box_size(writer, pos)
}

/// stco (32-bit) or co64 (64-bit) chunk offsets.
fn write_chunk_offsets<W: Write + Seek>(writer: &mut W, chunks: &[ChunkRun], wide: bool) -> MuxResult<()> {
    let pos = begin_full_box(writer, if wide { b"co64" } else { b"stco" }, 0, 0)?;
    writer.write_u32::<BigEndian>(chunks.len() as u32)?;
    for chunk in chunks {
        if wide {
            writer.write_u64::<BigEndian>(chunk.offset)?;
        } else {
            writer.write_u32::<BigEndian>(chunk.offset as u32)?;
        }
    }
    fill_box_size(writer, pos)
}

/// stss: 1-based numbers of the sync samples.
fn write_stss<W: Write + Seek>(writer: &mut W, samples: &[SampleInfo]) -> MuxResult<()> {
    let sync: Vec<u32> = samples
        .iter()
        .enumerate()
        .filter(|(_, s)| s.is_sync)
        .map(|(i, _)| i as u32 + 1)
        .collect();

    let pos = begin_full_box(writer, b"stss", 0, 0)?;
    writer.write_u32::<BigEndian>(sync.len() as u32)?;
    for number in sync {
        writer.write_u32::<BigEndian>(number)?;
    }
    fill_box_size(writer, pos)
}

/// dinf with a single self-contained url entry.
fn write_dinf<W: Write + Seek>(writer: &mut W) -> MuxResult<()> {
    let pos = begin_box(writer, b"dinf")?;
    let dref = begin_full_box(writer, b"dref", 0, 0)?;
    writer.write_u32::<BigEndian>(1)?;
    write_full_box_header(writer, b"url ", 12, 0, 0x000001)?;
    fill_box_size(writer, dref)?;
    fill_box_size(writer, pos)
}

fn write_minf<W: Write + Seek>(writer: &mut W, track: &TrackLayout<'_>) -> MuxResult<()> {
    let pos = begin_box(writer, b"minf")?;
    write_full_box_header(writer, b"vmhd", 20, 0, 0x000001)?;
    writer.write_u16::<BigEndian>(0)?; // graphicsmode
    write_zeros(writer, 6)?; // opcolor
    write_dinf(writer)?;
    write_stbl(writer, track.config, track.samples)?;
    fill_box_size(writer, pos)
}

fn write_trak<W: Write + Seek>(writer: &mut W, track: &TrackLayout<'_>) -> MuxResult<()> {
    let pos = begin_box(writer, b"trak")?;
    let movie_duration = rescale(track.duration, track.config.time_scale, MOVIE_TIMESCALE);
    write_tkhd(writer, track, movie_duration)?;

    let mdia = begin_box(writer, b"mdia")?;
    write_mdhd(writer, track.config.time_scale, track.duration)?;
    write_hdlr(writer)?;
    write_minf(writer, track)?;
    fill_box_size(writer, mdia)?;

    fill_box_size(writer, pos)
}

/// mvex with a trex defaulting every sample field to "given per sample".
fn write_mvex<W: Write + Seek>(writer: &mut W, track_id: u32) -> MuxResult<()> {
    let pos = begin_box(writer, b"mvex")?;
    let trex = begin_full_box(writer, b"trex", 0, 0)?;
    writer.write_u32::<BigEndian>(track_id)?;
    writer.write_u32::<BigEndian>(1)?; // default_sample_description_index
    writer.write_u32::<BigEndian>(0)?; // default_sample_duration
    writer.write_u32::<BigEndian>(0)?; // default_sample_size
    writer.write_u32::<BigEndian>(0)?; // default_sample_flags
    fill_box_size(writer, trex)?;
    fill_box_size(writer, pos)
}

/// Write the complete moov box for one track. `fragmented` adds mvex.
pub fn write_moov<W: Write + Seek>(writer: &mut W, track: &TrackLayout<'_>, fragmented: bool) -> MuxResult<()> {
    let pos = begin_box(writer, b"moov")?;
    let movie_duration = rescale(track.duration, track.config.time_scale, MOVIE_TIMESCALE);
    write_mvhd(writer, movie_duration, track.track_id + 1)?;
    write_trak(writer, track)?;
    if fragmented {
        write_mvex(writer, track.track_id)?;
    }
    fill_box_size(writer, pos)
}
