//! Decode stage: drives a [`VideoDecoder`] backend and turns its
//! out-of-order completions back into an in-order stream of [`Frame`]s.
//!
//! Each submitted sample is keyed by its sequence index (the ticket).
//! The backend may complete tickets late, in batches or out of order;
//! early arrivals wait in a reorder buffer until every earlier ticket has
//! been forwarded.
//!
//! State machine:
//!
//! ```text
//! Unconfigured --configure--> Configured --submit--> Decoding
//!      Decoding --drain--> Draining --> Closed
//!      (any) --close / fault--> Closed
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use rc_common::{
    AbortHandle, BufferPool, CompletionSink, DecodeError, DecodedImage, DecoderConfig, Frame,
    ParameterSet, Resolution, Sample, SequenceIndex, StageState, VideoDecoder,
};
use tracing::{debug, info, trace, warn};

/// Interval at which blocking waits re-check the abort flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Free frame buffers kept for reuse.
const FRAME_POOL_FREE: usize = 8;

type DecodeCompletion = (SequenceIndex, Result<DecodedImage, DecodeError>);

/// Timing recorded at submit, stamped onto the frame when it comes back.
#[derive(Copy, Clone, Debug)]
struct Timing {
    timestamp_us: i64,
    duration_us: u64,
    sync: bool,
}

/// Counters for one decode session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub samples_submitted: u64,
    pub frames_emitted: u64,
    /// Largest number of completions held for reordering at once.
    pub max_reorder_depth: usize,
}

pub struct DecodeStage {
    backend: Box<dyn VideoDecoder>,
    state: StageState,
    pool: BufferPool,
    config: Option<DecoderConfig>,
    completions: Option<Receiver<DecodeCompletion>>,
    /// Submitted tickets that have not been forwarded yet.
    pending: BTreeMap<SequenceIndex, Timing>,
    /// Completed tickets waiting for an earlier one.
    reorder: BTreeMap<SequenceIndex, DecodedImage>,
    stats: DecodeStats,
}

impl DecodeStage {
    pub fn new(backend: Box<dyn VideoDecoder>) -> Self {
        Self::with_pool(backend, BufferPool::new("frames", FRAME_POOL_FREE))
    }

    /// Use a caller-supplied frame pool (to observe its accounting).
    pub fn with_pool(backend: Box<dyn VideoDecoder>, pool: BufferPool) -> Self {
        Self {
            backend,
            state: StageState::Unconfigured,
            pool,
            config: None,
            completions: None,
            pending: BTreeMap::new(),
            reorder: BTreeMap::new(),
            stats: DecodeStats::default(),
        }
    }

    // ---- Lifecycle ----

    /// Configure the backend from the source track's parameter set.
    pub fn configure(
        &mut self,
        params: &ParameterSet,
        resolution: Resolution,
    ) -> Result<(), DecodeError> {
        if self.state != StageState::Unconfigured {
            return Err(DecodeError::InvalidState {
                action: "configure",
                state: self.state,
            });
        }

        let config = DecoderConfig::new(params, resolution);
        let (tx, rx) = channel::unbounded();
        let sink = CompletionSink::new(tx, self.pool.clone());
        if let Err(e) = self.backend.configure(&config, sink) {
            warn!(backend = self.backend.name(), error = %e, "Decoder configuration failed");
            self.close();
            return Err(e);
        }

        info!(
            backend = self.backend.name(),
            codec = %config.codec_string,
            resolution = %config.resolution,
            "Decoder configured"
        );
        self.config = Some(config);
        self.completions = Some(rx);
        self.state = StageState::Configured;
        Ok(())
    }

    /// Hand one sample to the backend. Never waits for output.
    pub fn submit(&mut self, sample: Sample) -> Result<(), DecodeError> {
        self.check_accepts("submit")?;

        let ticket = sample.sequence;
        if self.pending.contains_key(&ticket) {
            return Err(self.fault(DecodeError::fault(ticket, "ticket submitted twice")));
        }
        self.pending.insert(
            ticket,
            Timing {
                timestamp_us: sample.timestamp_us(),
                duration_us: sample.duration_us(),
                sync: sample.is_sync,
            },
        );

        trace!(sequence = %ticket, size = sample.data.len(), "Submit sample");
        if let Err(e) = self.backend.decode(ticket, &sample) {
            return Err(self.fault(into_fault(ticket, e)));
        }
        self.stats.samples_submitted += 1;
        self.state = StageState::Decoding;
        Ok(())
    }

    /// Frames that are ready, in ticket order. Never blocks.
    pub fn poll_frames(&mut self) -> Result<Vec<Frame>, DecodeError> {
        self.check_open()?;
        self.absorb_available()?;
        Ok(self.release_ready())
    }

    /// Block until at least one completion arrives, then return the frames
    /// that became ready (possibly none, if the arrival was early). Returns
    /// immediately with nothing when abort is requested or nothing is
    /// outstanding.
    pub fn wait_frames(&mut self, abort: &AbortHandle) -> Result<Vec<Frame>, DecodeError> {
        self.check_open()?;
        self.absorb_available()?;
        if !self.has_ready() && self.outstanding() > 0 {
            loop {
                if abort.is_aborted() {
                    return Ok(Vec::new());
                }
                let Some(rx) = &self.completions else {
                    break;
                };
                match rx.recv_timeout(POLL_INTERVAL) {
                    Ok(completion) => {
                        self.absorb(completion)?;
                        self.absorb_available()?;
                        break;
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => {
                        return Err(self.backend_gone());
                    }
                }
            }
        }
        Ok(self.release_ready())
    }

    /// Flush the backend and return every remaining frame in order.
    /// Each submitted sample must have produced exactly one frame. The
    /// stage is `Closed` afterwards.
    pub fn drain(&mut self) -> Result<Vec<Frame>, DecodeError> {
        self.check_accepts("drain")?;
        self.state = StageState::Draining;
        debug!(outstanding = self.outstanding(), "Draining decoder");

        if let Err(e) = self.backend.flush() {
            let ticket = self.first_pending().unwrap_or(SequenceIndex::ZERO);
            return Err(self.fault(into_fault(ticket, e)));
        }
        self.absorb_available()?;
        let frames = self.release_ready();

        if let Some(missing) = self.first_pending() {
            drop(frames);
            return Err(self.fault(DecodeError::fault(
                missing,
                "decoder produced no frame for this sample",
            )));
        }

        info!(
            samples = self.stats.samples_submitted,
            frames = self.stats.frames_emitted,
            "Decoder drained"
        );
        self.shutdown();
        Ok(frames)
    }

    /// Close the backend and drop every held frame. Idempotent.
    pub fn close(&mut self) {
        if self.state == StageState::Closed {
            return;
        }
        if !self.reorder.is_empty() || !self.pending.is_empty() {
            warn!(
                held = self.reorder.len(),
                outstanding = self.pending.len(),
                "Closing decoder with work in flight"
            );
        }
        self.shutdown();
    }

    // ---- Accessors ----

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Samples submitted whose frames have not been forwarded yet.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats.clone()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn config(&self) -> Option<&DecoderConfig> {
        self.config.as_ref()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Frames the backend may hold back until it gets more input.
    pub fn max_output_delay(&self) -> usize {
        self.backend.max_output_delay()
    }

    // ---- internal helpers ----

    fn check_accepts(&self, action: &'static str) -> Result<(), DecodeError> {
        match self.state {
            StageState::Unconfigured => Err(DecodeError::NotConfigured),
            StageState::Closed => Err(DecodeError::Closed),
            StageState::Draining => Err(DecodeError::InvalidState {
                action,
                state: self.state,
            }),
            StageState::Configured | StageState::Decoding => Ok(()),
        }
    }

    fn check_open(&self) -> Result<(), DecodeError> {
        match self.state {
            StageState::Unconfigured => Err(DecodeError::NotConfigured),
            StageState::Closed => Err(DecodeError::Closed),
            _ => Ok(()),
        }
    }

    /// Tickets submitted but not yet completed by the backend.
    fn outstanding(&self) -> usize {
        self.pending.len() - self.reorder.len()
    }

    fn first_pending(&self) -> Option<SequenceIndex> {
        self.pending.keys().next().copied()
    }

    fn has_ready(&self) -> bool {
        self.first_pending()
            .is_some_and(|first| self.reorder.contains_key(&first))
    }

    fn absorb_available(&mut self) -> Result<(), DecodeError> {
        loop {
            let Some(rx) = &self.completions else {
                return Ok(());
            };
            match rx.try_recv() {
                Ok(completion) => self.absorb(completion)?,
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Disconnected) => {
                    if self.outstanding() > 0 {
                        return Err(self.backend_gone());
                    }
                    return Ok(());
                }
            }
        }
    }

    fn absorb(&mut self, (ticket, result): DecodeCompletion) -> Result<(), DecodeError> {
        let image = match result {
            Ok(image) => image,
            Err(e) => return Err(self.fault(into_fault(ticket, e))),
        };
        if !self.pending.contains_key(&ticket) || self.reorder.contains_key(&ticket) {
            return Err(self.fault(DecodeError::fault(
                ticket,
                "completion for a ticket that is not outstanding",
            )));
        }
        trace!(sequence = %ticket, "Frame completed");
        self.reorder.insert(ticket, image);
        self.stats.max_reorder_depth = self.stats.max_reorder_depth.max(self.reorder.len());
        Ok(())
    }

    /// Move frames out of the reorder buffer while the lowest pending
    /// ticket has completed.
    fn release_ready(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some((&ticket, _)) = self.pending.first_key_value() {
            let Some(image) = self.reorder.remove(&ticket) else {
                break;
            };
            let Some(timing) = self.pending.remove(&ticket) else {
                break;
            };
            frames.push(Frame::new(
                image.buffer,
                image.resolution,
                timing.timestamp_us,
                timing.duration_us,
                ticket,
                timing.sync,
            ));
        }
        self.stats.frames_emitted += frames.len() as u64;
        frames
    }

    fn backend_gone(&mut self) -> DecodeError {
        let ticket = self.first_pending().unwrap_or(SequenceIndex::ZERO);
        self.fault(DecodeError::fault(ticket, "decoder backend stopped responding"))
    }

    /// Close on fault and hand the error back for propagation.
    fn fault(&mut self, err: DecodeError) -> DecodeError {
        warn!(backend = self.backend.name(), error = %err, "Decoder fault");
        self.shutdown();
        err
    }

    fn shutdown(&mut self) {
        self.backend.close();
        // Dropping the receiver makes late backend sends fail, which
        // releases their buffers.
        self.completions = None;
        self.reorder.clear();
        self.pending.clear();
        self.state = StageState::Closed;
    }
}

/// Backend errors reported for a ticket are faults of that ticket.
fn into_fault(ticket: SequenceIndex, err: DecodeError) -> DecodeError {
    if err.is_fault() {
        err
    } else {
        DecodeError::fault(ticket, err.to_string())
    }
}
