//! Integration tests for `DecodeStage` against backends that complete
//! work on their own thread, in batches and out of order.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use rc_common::{
    AbortHandle, BufferPool, DecodeError, DecodedImage, DecoderConfig, FrameSink, ParameterSet,
    Resolution, Sample, SequenceIndex, StageState, VideoCodec, VideoDecoder,
};
use rc_decoder::DecodeStage;

// ---------------------------------------------------------------------------
// Helper: a threaded backend that completes each batch in reverse order
// ---------------------------------------------------------------------------

enum Work {
    Decode(SequenceIndex),
    Flush(Sender<()>),
}

struct ReversingDecoder {
    batch: usize,
    /// Tickets the worker silently drops.
    lose: Vec<u64>,
    /// Tickets the worker reports as failed.
    fail: Vec<u64>,
    work: Option<Sender<Work>>,
    worker: Option<JoinHandle<()>>,
}

impl ReversingDecoder {
    fn new(batch: usize) -> Self {
        Self {
            batch,
            lose: Vec::new(),
            fail: Vec::new(),
            work: None,
            worker: None,
        }
    }
}

fn run_worker(
    rx: channel::Receiver<Work>,
    sink: FrameSink,
    resolution: Resolution,
    batch: usize,
    lose: Vec<u64>,
    fail: Vec<u64>,
) {
    let mut held: Vec<SequenceIndex> = Vec::new();
    let emit = |held: &mut Vec<SequenceIndex>| {
        while let Some(ticket) = held.pop() {
            if lose.contains(&ticket.as_u64()) {
                continue;
            }
            if fail.contains(&ticket.as_u64()) {
                sink.fail(ticket, DecodeError::fault(ticket, "corrupt slice"));
                continue;
            }
            let image = DecodedImage {
                buffer: sink.acquire(resolution.nv12_byte_size()),
                resolution,
            };
            sink.complete(ticket, image);
        }
    };

    for work in rx {
        match work {
            Work::Decode(ticket) => {
                held.push(ticket);
                if held.len() >= batch {
                    emit(&mut held);
                }
            }
            Work::Flush(ack) => {
                emit(&mut held);
                let _ = ack.send(());
            }
        }
    }
}

impl VideoDecoder for ReversingDecoder {
    fn name(&self) -> &str {
        "reversing"
    }

    fn configure(&mut self, config: &DecoderConfig, sink: FrameSink) -> Result<(), DecodeError> {
        let (tx, rx) = channel::unbounded();
        let resolution = config.resolution;
        let (batch, lose, fail) = (self.batch, self.lose.clone(), self.fail.clone());
        self.worker = Some(thread::spawn(move || {
            run_worker(rx, sink, resolution, batch, lose, fail)
        }));
        self.work = Some(tx);
        Ok(())
    }

    fn decode(&mut self, ticket: SequenceIndex, _sample: &Sample) -> Result<(), DecodeError> {
        let work = self.work.as_ref().ok_or(DecodeError::NotConfigured)?;
        work.send(Work::Decode(ticket))
            .map_err(|_| DecodeError::fault(ticket, "worker gone"))
    }

    fn flush(&mut self) -> Result<(), DecodeError> {
        let work = self.work.as_ref().ok_or(DecodeError::NotConfigured)?;
        let (ack_tx, ack_rx) = channel::bounded(1);
        work.send(Work::Flush(ack_tx))
            .map_err(|_| DecodeError::Closed)?;
        ack_rx.recv().map_err(|_| DecodeError::Closed)
    }

    fn close(&mut self) {
        self.work = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn params() -> ParameterSet {
    ParameterSet::new(VideoCodec::H264, *b"avc1", vec![1, 0x64, 0, 0x28, 0xFF])
}

fn sample(seq: u64) -> Sample {
    Sample {
        sequence: SequenceIndex(seq),
        data: vec![0, 0, 0, 1, if seq == 0 { 0x65 } else { 0x41 }],
        dts: seq * 512,
        cts: seq as i64 * 512,
        duration: 512,
        is_sync: seq == 0,
        time_scale: 12_800,
    }
}

fn stage_with(backend: ReversingDecoder, pool: &BufferPool) -> DecodeStage {
    let mut stage = DecodeStage::with_pool(Box::new(backend), pool.clone());
    stage.configure(&params(), Resolution::new(32, 16)).unwrap();
    stage
}

/// Feed every sample, collecting frames as they become ready.
fn run(stage: &mut DecodeStage, count: u64) -> Result<Vec<u64>, DecodeError> {
    let abort = AbortHandle::new();
    let mut order = Vec::new();
    for i in 0..count {
        stage.submit(sample(i))?;
        for frame in stage.poll_frames()? {
            order.push(frame.sequence().as_u64());
        }
    }
    while stage.in_flight() > 0 && order.len() < count as usize - 3 {
        for frame in stage.wait_frames(&abort)? {
            order.push(frame.sequence().as_u64());
        }
    }
    for frame in stage.drain()? {
        order.push(frame.sequence().as_u64());
    }
    Ok(order)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn reversed_batches_come_out_in_ticket_order() {
    let pool = BufferPool::new("frames", 8);
    let mut stage = stage_with(ReversingDecoder::new(4), &pool);

    let order = run(&mut stage, 22).unwrap();

    assert_eq!(order, (0..22).collect::<Vec<_>>());
    assert_eq!(stage.state(), StageState::Closed);
    let stats = stage.stats();
    assert_eq!(stats.samples_submitted, 22);
    assert_eq!(stats.frames_emitted, 22);
    assert!(stats.max_reorder_depth >= 1);
    assert!(pool.stats().is_balanced());
}

#[test]
fn frame_timestamps_follow_samples() {
    let pool = BufferPool::new("frames", 8);
    let mut stage = stage_with(ReversingDecoder::new(3), &pool);
    for i in 0..3 {
        stage.submit(sample(i)).unwrap();
    }
    let abort = AbortHandle::new();
    let mut frames = Vec::new();
    while frames.len() < 3 {
        frames.extend(stage.wait_frames(&abort).unwrap());
    }
    let ts: Vec<i64> = frames.iter().map(|f| f.timestamp_us()).collect();
    assert_eq!(ts, vec![0, 40_000, 80_000]);
    assert!(frames[0].source_sync());
    assert!(!frames[2].source_sync());
    stage.close();
}

#[test]
fn lost_frame_is_a_fault_at_drain() {
    let pool = BufferPool::new("frames", 8);
    let mut backend = ReversingDecoder::new(2);
    backend.lose = vec![5];
    let mut stage = DecodeStage::with_pool(Box::new(backend), pool.clone());
    stage.configure(&params(), Resolution::new(32, 16)).unwrap();

    for i in 0..8 {
        stage.submit(sample(i)).unwrap();
    }
    let mut seen = Vec::new();
    for frame in stage.poll_frames().unwrap() {
        seen.push(frame.sequence().as_u64());
    }

    match stage.drain() {
        Err(DecodeError::DecoderFault { sequence, .. }) => {
            assert_eq!(sequence, SequenceIndex(5))
        }
        other => panic!("expected DecoderFault, got {other:?}"),
    }
    assert!(seen.iter().all(|&s| s < 5));
    assert_eq!(stage.state(), StageState::Closed);
    assert!(pool.stats().is_balanced());
}

#[test]
fn completion_error_closes_stage() {
    let pool = BufferPool::new("frames", 8);
    let mut backend = ReversingDecoder::new(1);
    backend.fail = vec![2];
    let mut stage = DecodeStage::with_pool(Box::new(backend), pool.clone());
    stage.configure(&params(), Resolution::new(32, 16)).unwrap();

    let err = run(&mut stage, 6).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::DecoderFault {
            sequence: SequenceIndex(2),
            ..
        }
    ));
    assert_eq!(stage.state(), StageState::Closed);
    assert!(matches!(stage.submit(sample(9)), Err(DecodeError::Closed)));
    assert!(pool.stats().is_balanced());
}

#[test]
fn close_mid_stream_releases_everything() {
    let pool = BufferPool::new("frames", 8);
    let mut stage = stage_with(ReversingDecoder::new(5), &pool);
    for i in 0..12 {
        stage.submit(sample(i)).unwrap();
    }
    let held = stage.poll_frames().unwrap();
    stage.close();
    drop(held);

    assert_eq!(stage.state(), StageState::Closed);
    assert_eq!(stage.in_flight(), 0);
    assert!(pool.stats().is_balanced());
}
