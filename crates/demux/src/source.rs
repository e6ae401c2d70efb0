//! Sample source: track listing, track selection and a lazy,
//! flow-controlled stream of compressed samples.

use std::collections::VecDeque;

use rc_common::{
    DemuxError, DemuxResult, FlowSignal, ParameterSet, Sample, SequenceIndex, TrackDescriptor,
};
use tracing::{debug, info, trace};

use crate::boxes::*;
use crate::params::ParameterExtractor;
use crate::sample::{SampleEntry, SampleTable};
use crate::tree::{BoxNode, BoxTree, ContainerParser};

/// Samples read ahead of the consumer by default.
pub const DEFAULT_READ_AHEAD: usize = 4;

struct VideoTrack {
    descriptor: TrackDescriptor,
    trak: BoxNode,
}

/// Video tracks of one in-memory container.
pub struct SampleSource<'a> {
    tree: BoxTree<'a>,
    tracks: Vec<VideoTrack>,
    selected: usize,
}

impl<'a> SampleSource<'a> {
    /// Parse the container and list its H.264/H.265 video tracks.
    pub fn open(data: &'a [u8]) -> DemuxResult<Self> {
        let tree = ContainerParser::parse(data)?;
        let moov = tree.find(&[MOOV])?;

        let mut tracks = Vec::new();
        for trak in moov.children_of(TRAK) {
            if let Some(descriptor) = ParameterExtractor::describe(&tree, trak)? {
                tracks.push(VideoTrack {
                    descriptor,
                    trak: trak.clone(),
                });
            }
        }

        if tracks.is_empty() {
            return Err(DemuxError::NoVideoTrack);
        }

        let first = &tracks[0].descriptor;
        info!(
            tracks = tracks.len(),
            track_id = first.track_id,
            codec = first.codec.display_name(),
            resolution = %first.resolution,
            samples = first.sample_count,
            "Opened container"
        );

        Ok(Self {
            tree,
            tracks,
            selected: 0,
        })
    }

    /// Every video track, in container order.
    pub fn tracks(&self) -> impl Iterator<Item = &TrackDescriptor> {
        self.tracks.iter().map(|t| &t.descriptor)
    }

    /// Choose the track to read. The first video track is selected
    /// after `open`.
    pub fn select(&mut self, track_id: u32) -> DemuxResult<&TrackDescriptor> {
        let index = self
            .tracks
            .iter()
            .position(|t| t.descriptor.track_id == track_id)
            .ok_or(DemuxError::UnknownTrack(track_id))?;
        self.selected = index;
        info!(track_id, "Selected video track");
        Ok(&self.tracks[index].descriptor)
    }

    /// The currently selected track.
    pub fn track(&self) -> &TrackDescriptor {
        &self.tracks[self.selected].descriptor
    }

    /// Decoder configuration of the selected track.
    pub fn parameter_set(&self) -> DemuxResult<ParameterSet> {
        ParameterExtractor::extract(&self.tree, &self.tracks[self.selected].trak)
    }

    /// Samples of the selected track in decode order, gated by `flow`.
    ///
    /// Decode order is what a decoder must be fed; presentation order
    /// differs only when the track has B-frames, and each sample keeps
    /// its `cts`. Sequence indices count samples in this order.
    pub fn samples(&self, flow: FlowSignal) -> DemuxResult<SampleStream<'a>> {
        let track = &self.tracks[self.selected];
        let stbl = track.trak.find(&[MDIA, MINF, STBL])?;
        let table = SampleTable::from_stbl(&self.tree, stbl)?;
        debug!(
            track_id = track.descriptor.track_id,
            samples = table.len(),
            "Sample stream ready"
        );

        Ok(SampleStream {
            data: self.tree.data(),
            entries: table.samples,
            next: 0,
            buffered: VecDeque::new(),
            read_ahead: DEFAULT_READ_AHEAD,
            time_scale: track.descriptor.time_scale,
            flow,
        })
    }
}

/// Outcome of [`SampleStream::poll_sample`].
#[derive(Debug)]
pub enum SamplePoll {
    Ready(Sample),
    /// The flow signal is paused; nothing is handed out.
    Pending,
    /// Every sample has been handed out.
    Done,
}

/// Lazy, finite, non-restartable sample sequence for one track.
pub struct SampleStream<'a> {
    data: &'a [u8],
    entries: Vec<SampleEntry>,
    next: usize,
    buffered: VecDeque<Sample>,
    read_ahead: usize,
    time_scale: u32,
    flow: FlowSignal,
}

impl<'a> SampleStream<'a> {
    /// Change the read-ahead depth (at least one sample).
    pub fn with_read_ahead(mut self, read_ahead: usize) -> Self {
        self.read_ahead = read_ahead.max(1);
        self
    }

    /// Next sample, unless the stream is paused or exhausted.
    pub fn poll_sample(&mut self) -> DemuxResult<SamplePoll> {
        if self.flow.is_paused() {
            return Ok(SamplePoll::Pending);
        }
        self.fill()?;
        Ok(match self.buffered.pop_front() {
            Some(sample) => {
                trace!(
                    sequence = %sample.sequence,
                    size = sample.data.len(),
                    sync = sample.is_sync,
                    "Sample out"
                );
                SamplePoll::Ready(sample)
            }
            None => SamplePoll::Done,
        })
    }

    /// Total samples of the track.
    pub fn total(&self) -> usize {
        self.entries.len()
    }

    /// Samples not yet handed out (buffered ones included).
    pub fn remaining(&self) -> usize {
        self.entries.len() - self.next + self.buffered.len()
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_done(&self) -> bool {
        self.remaining() == 0
    }

    fn fill(&mut self) -> DemuxResult<()> {
        while self.buffered.len() < self.read_ahead && self.next < self.entries.len() {
            let entry = &self.entries[self.next];
            let start = entry.offset as usize;
            let end = start + entry.size as usize;
            let bytes = self.data.get(start..end).ok_or_else(|| {
                DemuxError::malformed(
                    entry.offset,
                    format!("sample {} lies outside the buffer", entry.index),
                )
            })?;

            self.buffered.push_back(Sample {
                sequence: SequenceIndex(entry.index as u64),
                data: bytes.to_vec(),
                dts: entry.dts,
                cts: entry.cts,
                duration: entry.duration,
                is_sync: entry.is_sync,
                time_scale: self.time_scale,
            });
            self.next += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Mp4Fixture;
    use rc_common::{Backpressure, FlowConfig, VideoCodec};

    fn drain(stream: &mut SampleStream<'_>) -> Vec<Sample> {
        let mut out = Vec::new();
        loop {
            match stream.poll_sample().unwrap() {
                SamplePoll::Ready(sample) => out.push(sample),
                SamplePoll::Pending => panic!("unexpected pause"),
                SamplePoll::Done => return out,
            }
        }
    }

    #[test]
    fn yields_every_sample_in_order() {
        let fixture = Mp4Fixture::avc_gop(10, 4);
        let data = fixture.build();
        let source = SampleSource::open(&data).unwrap();
        assert_eq!(source.track().sample_count, 10);

        let mut stream = source.samples(FlowSignal::unpaused()).unwrap();
        assert_eq!(stream.total(), 10);
        let samples = drain(&mut stream);

        assert_eq!(samples.len(), 10);
        for (i, (sample, expected)) in samples.iter().zip(&fixture.samples).enumerate() {
            assert_eq!(sample.sequence, SequenceIndex(i as u64));
            assert_eq!(sample.data, expected.data);
            assert_eq!(sample.is_sync, expected.is_sync);
            assert_eq!(sample.dts, i as u64 * 1001);
            assert_eq!(sample.time_scale, 30_000);
        }
        assert!(stream.is_done());
        assert!(matches!(stream.poll_sample().unwrap(), SamplePoll::Done));
    }

    #[test]
    fn b_frames_come_out_in_decode_order() {
        // I P B B: presentation order I B B P
        let offsets = [1001, 3003, 0, 0];
        let mut fixture = Mp4Fixture::avc_gop(4, 4);
        for (sample, offset) in fixture.samples.iter_mut().zip(offsets) {
            sample.cts_offset = offset;
        }
        let data = fixture.build();
        let source = SampleSource::open(&data).unwrap();
        let samples = drain(&mut source.samples(FlowSignal::unpaused()).unwrap());

        let dts: Vec<u64> = samples.iter().map(|s| s.dts).collect();
        let cts: Vec<i64> = samples.iter().map(|s| s.cts).collect();
        let seq: Vec<u64> = samples.iter().map(|s| s.sequence.as_u64()).collect();
        assert_eq!(dts, vec![0, 1001, 2002, 3003]);
        assert_eq!(seq, vec![0, 1, 2, 3]);
        assert_eq!(cts, vec![1001, 4004, 2002, 3003]);
        assert!(cts.windows(2).any(|w| w[1] < w[0]));
    }

    #[test]
    fn pause_keeps_buffered_samples() {
        let data = Mp4Fixture::avc_gop(6, 3).build();
        let source = SampleSource::open(&data).unwrap();
        let mut flow = Backpressure::new(FlowConfig {
            high_water: 2,
            low_water: 0,
        });
        let mut stream = source.samples(flow.signal()).unwrap().with_read_ahead(3);

        assert!(matches!(stream.poll_sample().unwrap(), SamplePoll::Ready(_)));
        flow.on_submitted();
        assert!(matches!(stream.poll_sample().unwrap(), SamplePoll::Ready(_)));
        flow.on_submitted();

        // Paused at the high mark: nothing comes out, nothing is lost.
        assert!(matches!(stream.poll_sample().unwrap(), SamplePoll::Pending));
        assert_eq!(stream.remaining(), 4);
        assert_eq!(stream.buffered(), 2);

        flow.on_consumed();
        flow.on_consumed();
        let rest = drain(&mut stream);
        let seq: Vec<u64> = rest.iter().map(|s| s.sequence.as_u64()).collect();
        assert_eq!(seq, vec![2, 3, 4, 5]);
    }

    #[test]
    fn skips_audio_and_selects_by_id() {
        let mut fixture = Mp4Fixture::avc_gop(3, 3);
        fixture.with_audio = true;
        fixture.track_id = 2;
        let data = fixture.build();
        let mut source = SampleSource::open(&data).unwrap();

        let ids: Vec<u32> = source.tracks().map(|t| t.track_id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(source.select(2).unwrap().codec, VideoCodec::H264);
        assert!(matches!(source.select(9), Err(DemuxError::UnknownTrack(9))));
    }

    #[test]
    fn no_video_track() {
        let mut fixture = Mp4Fixture::avc_gop(1, 1);
        fixture.sample_entry = fourcc(b'v', b'p', b'0', b'9');
        let data = fixture.build();
        assert!(matches!(
            SampleSource::open(&data),
            Err(DemuxError::NoVideoTrack)
        ));
    }

    #[test]
    fn parameter_set_of_selected_track() {
        let data = Mp4Fixture::avc_gop(2, 1).build();
        let source = SampleSource::open(&data).unwrap();
        let params = source.parameter_set().unwrap();
        assert_eq!(params.codec_string(), "avc1.64001f");
    }

    #[test]
    fn missing_parameter_set_surfaces_before_samples() {
        let mut fixture = Mp4Fixture::avc_gop(2, 1);
        fixture.config = None;
        let data = fixture.build();
        let source = SampleSource::open(&data).unwrap();
        assert!(matches!(
            source.parameter_set(),
            Err(DemuxError::MissingParameterSet { track_id: 1 })
        ));
    }
}
