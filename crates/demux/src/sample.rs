//! Sample table interpretation: maps sample indices to buffer offsets,
//! sizes, timestamps and sync status.
//!
//! Combines stsc, stsz, stco/co64, stts, ctts and stss into one flat
//! index in decode order.

use rc_common::{DemuxError, DemuxResult};
use tracing::debug;

use crate::boxes::*;
use crate::tree::{BoxNode, BoxTree};

/// Largest per-sample preallocation; bigger tables grow as they fill.
const PREALLOC_LIMIT: usize = 1 << 16;

/// Flat entry for a single sample.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleEntry {
    /// 0-based sample index (decode order).
    pub index: u32,
    /// Byte offset of the sample data in the container buffer.
    pub offset: u64,
    pub size: u32,
    /// Decoding timestamp in media timescale units.
    pub dts: u64,
    /// Composition timestamp in media timescale units.
    pub cts: i64,
    /// stts delta of this sample.
    pub duration: u32,
    pub is_sync: bool,
}

/// Sample index for one track.
#[derive(Clone, Debug, Default)]
pub struct SampleTable {
    pub samples: Vec<SampleEntry>,
}

/// Raw tables as read from `stbl`.
#[derive(Clone, Debug, Default)]
pub struct StblTables {
    pub stts: Vec<SttsEntry>,
    pub ctts: Vec<CttsEntry>,
    pub stsc: Vec<StscEntry>,
    pub stsz: StszBox,
    pub chunk_offsets: Vec<u64>,
    /// `None` when there is no stss box: every sample is sync.
    pub sync_samples: Option<Vec<u32>>,
}

impl StblTables {
    /// Read every sample table box under `stbl`.
    pub fn read(tree: &BoxTree<'_>, stbl: &BoxNode) -> DemuxResult<Self> {
        let required = |box_type: u32| {
            stbl.child(box_type).ok_or_else(|| DemuxError::NotFound {
                path: format!("stbl/{}", fourcc_to_string(box_type)),
            })
        };
        let at = |node: &BoxNode| node.header.content_offset();

        let stts = required(STTS)?;
        let stsc = required(STSC)?;
        let stsz = required(STSZ)?;

        let chunk_offsets = match (stbl.child(STCO), stbl.child(CO64)) {
            (Some(stco), _) => parse_chunk_offsets(tree.payload(stco), at(stco), false)?,
            (None, Some(co64)) => parse_chunk_offsets(tree.payload(co64), at(co64), true)?,
            (None, None) => {
                return Err(DemuxError::NotFound {
                    path: "stbl/stco".into(),
                })
            }
        };

        let ctts = match stbl.child(CTTS) {
            Some(ctts) => parse_ctts(tree.payload(ctts), at(ctts))?,
            None => Vec::new(),
        };
        let sync_samples = match stbl.child(STSS) {
            Some(stss) => Some(parse_stss(tree.payload(stss), at(stss))?),
            None => None,
        };

        Ok(Self {
            stts: parse_stts(tree.payload(stts), at(stts))?,
            ctts,
            stsc: parse_stsc(tree.payload(stsc), at(stsc))?,
            stsz: parse_stsz(tree.payload(stsz), at(stsz))?,
            chunk_offsets,
            sync_samples,
        })
    }
}

impl SampleTable {
    /// Build the flat index from a track's `stbl`.
    pub fn from_stbl(tree: &BoxTree<'_>, stbl: &BoxNode) -> DemuxResult<Self> {
        let tables = StblTables::read(tree, stbl)?;
        let len = tree.data().len() as u64;

        // Fixed-size samples carry no per-sample table, so the declared
        // count is only bounded by the bytes they would occupy.
        let stsz = &tables.stsz;
        let declared = u64::from(stsz.default_sample_size) * u64::from(stsz.sample_count);
        if stsz.default_sample_size > 0 && declared > len {
            return Err(DemuxError::malformed(
                stbl.offset(),
                format!(
                    "stsz declares {} samples of {} bytes, more than the {len}-byte buffer",
                    stsz.sample_count, stsz.default_sample_size
                ),
            ));
        }
        let table = Self::build(&tables, stbl.offset())?;

        // Every sample must lie inside the buffer.
        if let Some(bad) = table
            .samples
            .iter()
            .find(|s| s.offset.saturating_add(s.size as u64) > len)
        {
            return Err(DemuxError::malformed(
                bad.offset,
                format!(
                    "sample {} ({} bytes) runs past the end of the {len}-byte buffer",
                    bad.index, bad.size
                ),
            ));
        }
        Ok(table)
    }

    /// Build from already-parsed tables. `offset` locates errors.
    pub fn build(tables: &StblTables, offset: u64) -> DemuxResult<Self> {
        let sample_count = tables.stsz.sample_count as usize;
        if sample_count == 0 {
            return Ok(Self::default());
        }
        let capacity = chunk_capacity(&tables.stsc, tables.chunk_offsets.len());
        if sample_count as u64 > capacity {
            return Err(DemuxError::malformed(
                offset,
                format!("stsz declares {sample_count} samples but stsc/stco hold at most {capacity}"),
            ));
        }

        let offsets_and_sizes = build_sample_offsets(
            &tables.stsc,
            &tables.chunk_offsets,
            &tables.stsz.sample_sizes,
            tables.stsz.default_sample_size,
            sample_count,
        )
        .map_err(|reason| DemuxError::malformed(offset, reason))?;
        let (dts_array, durations) = build_dts_array(&tables.stts, sample_count);
        let cts_offsets = build_cts_offsets(&tables.ctts, sample_count);

        let mut samples = Vec::with_capacity(offsets_and_sizes.len());
        for (i, &(sample_offset, size)) in offsets_and_sizes.iter().enumerate() {
            let number = i as u32 + 1;
            let is_sync = match &tables.sync_samples {
                Some(sync) => sync.binary_search(&number).is_ok(),
                None => true,
            };
            samples.push(SampleEntry {
                index: i as u32,
                offset: sample_offset,
                size,
                dts: dts_array[i],
                cts: dts_array[i] as i64 + cts_offsets[i] as i64,
                duration: durations[i],
                is_sync,
            });
        }

        debug!(
            "SampleTable: {} samples, {} sync",
            samples.len(),
            samples.iter().filter(|s| s.is_sync).count()
        );
        Ok(Self { samples })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SampleEntry> {
        self.samples.get(index)
    }
}

/// (offset, size) for each sample, walking chunks via stsc + stco + stsz.
fn build_sample_offsets(
    stsc: &[StscEntry],
    chunk_offsets: &[u64],
    sample_sizes: &[u32],
    default_sample_size: u32,
    sample_count: usize,
) -> Result<Vec<(u64, u32)>, String> {
    let mut result = Vec::with_capacity(sample_count.min(PREALLOC_LIMIT));
    let mut sample_idx: usize = 0;

    for (chunk_idx, &chunk_offset) in chunk_offsets.iter().enumerate() {
        // chunk numbers are 1-based in stsc
        let samples_in_chunk = samples_per_chunk_for(stsc, chunk_idx as u32 + 1);
        let mut offset = chunk_offset;

        for _ in 0..samples_in_chunk {
            if sample_idx >= sample_count {
                break;
            }
            let size = if default_sample_size > 0 {
                default_sample_size
            } else {
                *sample_sizes.get(sample_idx).ok_or_else(|| {
                    format!(
                        "sample index {sample_idx} exceeds stsz table length {}",
                        sample_sizes.len()
                    )
                })?
            };
            result.push((offset, size));
            offset = offset.checked_add(size as u64).ok_or_else(|| {
                format!("sample {sample_idx} of chunk {} overflows the file offset", chunk_idx + 1)
            })?;
            sample_idx += 1;
        }
    }

    if result.len() != sample_count {
        return Err(format!(
            "built {} sample offsets but expected {sample_count} (stsc/stco/stsz mismatch)",
            result.len()
        ));
    }
    Ok(result)
}

/// Upper bound on samples the chunk table can place.
fn chunk_capacity(stsc: &[StscEntry], chunk_count: usize) -> u64 {
    (0..chunk_count).fold(0u64, |total, chunk_idx| {
        total.saturating_add(u64::from(samples_per_chunk_for(stsc, chunk_idx as u32 + 1)))
    })
}

/// Samples in a 1-based chunk: the last stsc entry whose first_chunk
/// is at or before it applies.
fn samples_per_chunk_for(stsc: &[StscEntry], chunk_num: u32) -> u32 {
    let mut spc = 1;
    for entry in stsc {
        if entry.first_chunk <= chunk_num {
            spc = entry.samples_per_chunk;
        } else {
            break;
        }
    }
    spc
}

/// DTS and duration per sample from stts. Samples past the end of the
/// table repeat the last delta.
fn build_dts_array(stts: &[SttsEntry], sample_count: usize) -> (Vec<u64>, Vec<u32>) {
    let mut dts_array = Vec::with_capacity(sample_count.min(PREALLOC_LIMIT));
    let mut durations = Vec::with_capacity(sample_count.min(PREALLOC_LIMIT));
    let mut dts: u64 = 0;

    'entries: for entry in stts {
        for _ in 0..entry.sample_count {
            if dts_array.len() >= sample_count {
                break 'entries;
            }
            dts_array.push(dts);
            durations.push(entry.sample_delta);
            dts += entry.sample_delta as u64;
        }
    }

    let last_delta = stts.last().map_or(1, |e| e.sample_delta);
    while dts_array.len() < sample_count {
        dts_array.push(dts);
        durations.push(last_delta);
        dts += last_delta as u64;
    }

    (dts_array, durations)
}

/// Composition offsets per sample; zero past the end of ctts.
fn build_cts_offsets(ctts: &[CttsEntry], sample_count: usize) -> Vec<i32> {
    let mut offsets: Vec<i32> = ctts
        .iter()
        .flat_map(|e| std::iter::repeat(e.sample_offset).take(e.sample_count as usize))
        .take(sample_count)
        .collect();
    offsets.resize(sample_count, 0);
    offsets
}
