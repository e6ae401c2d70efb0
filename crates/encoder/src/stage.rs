//! Encode stage: drives a [`VideoEncoder`] backend and delivers its
//! completions as an in-order stream of [`Chunk`]s.
//!
//! Ticketing, reorder buffer and lifecycle are the same as the decode
//! stage; the ticket is the sequence index of the frame. On top of that
//! the stage decides where keyframes go, and it copies each frame's
//! timing onto the chunk produced from it.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use rc_common::{
    AbortHandle, BufferPool, Chunk, CompletionSink, EncodeError, EncodedUnit, EncoderConfig,
    Frame, ParameterSet, SequenceIndex, StageState, VideoEncoder,
};
use tracing::{debug, info, trace, warn};

/// Interval at which blocking waits re-check the abort flag.
pub const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Free chunk buffers kept for reuse.
const CHUNK_POOL_FREE: usize = 16;

type EncodeCompletion = (SequenceIndex, Result<EncodedUnit, EncodeError>);

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Statistics for one encode session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EncoderStats {
    pub frames_submitted: u64,
    pub chunks_emitted: u64,
    /// Emitted chunks flagged as keyframes.
    pub keyframes: u64,
    /// Compressed bytes emitted.
    pub bytes: u64,
    pub max_reorder_depth: usize,
}

impl EncoderStats {
    /// Mean compressed chunk size in bytes.
    pub fn avg_chunk_size(&self) -> u64 {
        if self.chunks_emitted == 0 {
            0
        } else {
            self.bytes / self.chunks_emitted
        }
    }
}

/// Whether the frame at `position` must be a keyframe.
///
/// With an interval of 0 only the first frame is one.
pub fn is_keyframe_position(position: u64, interval: u32) -> bool {
    if interval == 0 {
        position == 0
    } else {
        position % interval as u64 == 0
    }
}

// ---------------------------------------------------------------------------
// EncodeStage
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug)]
struct Timing {
    timestamp_us: i64,
    duration_us: u64,
}

pub struct EncodeStage {
    backend: Box<dyn VideoEncoder>,
    state: StageState,
    pool: BufferPool,
    config: Option<EncoderConfig>,
    params: Option<ParameterSet>,
    completions: Option<Receiver<EncodeCompletion>>,
    pending: BTreeMap<SequenceIndex, Timing>,
    reorder: BTreeMap<SequenceIndex, EncodedUnit>,
    stats: EncoderStats,
}

impl fmt::Debug for EncodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodeStage")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("config", &self.config)
            .field("in_flight", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl EncodeStage {
    pub fn new(backend: Box<dyn VideoEncoder>) -> Self {
        Self::with_pool(backend, BufferPool::new("chunks", CHUNK_POOL_FREE))
    }

    pub fn with_pool(backend: Box<dyn VideoEncoder>, pool: BufferPool) -> Self {
        Self {
            backend,
            state: StageState::Unconfigured,
            pool,
            config: None,
            params: None,
            completions: None,
            pending: BTreeMap::new(),
            reorder: BTreeMap::new(),
            stats: EncoderStats::default(),
        }
    }

    // ---- Lifecycle ----

    /// Configure the backend. Its output parameter set must be available
    /// afterwards.
    pub fn configure(&mut self, config: EncoderConfig) -> Result<(), EncodeError> {
        if self.state != StageState::Unconfigured {
            return Err(EncodeError::InvalidState {
                action: "configure",
                state: self.state,
            });
        }
        if config.resolution.is_empty() {
            return Err(EncodeError::Unsupported(format!(
                "target size {} is empty",
                config.resolution
            )));
        }

        let (tx, rx) = channel::unbounded();
        let sink = CompletionSink::new(tx, self.pool.clone());
        if let Err(e) = self.backend.configure(&config, sink) {
            warn!(backend = self.backend.name(), error = %e, "Encoder configuration failed");
            self.shutdown();
            return Err(e);
        }
        let Some(params) = self.backend.parameter_set() else {
            self.shutdown();
            return Err(EncodeError::Unsupported(format!(
                "{} backend exposes no parameter set",
                self.backend.name()
            )));
        };

        info!(
            backend = self.backend.name(),
            codec = %params.codec_string(),
            resolution = %config.resolution,
            bitrate = config.bitrate,
            keyframe_interval = config.keyframe_interval,
            "Encoder configured"
        );
        self.config = Some(config);
        self.params = Some(params);
        self.completions = Some(rx);
        self.state = StageState::Configured;
        Ok(())
    }

    /// Decoder configuration of the bitstream this stage produces.
    pub fn parameter_set(&self) -> Result<&ParameterSet, EncodeError> {
        self.params.as_ref().ok_or(EncodeError::NotConfigured)
    }

    /// Hand one frame to the backend. The frame is only read; the caller
    /// releases it once this returns.
    pub fn submit(&mut self, frame: &Frame) -> Result<(), EncodeError> {
        self.check_accepts("submit")?;

        let ticket = frame.sequence();
        if self.pending.contains_key(&ticket) {
            return Err(self.fault(EncodeError::fault(ticket, "ticket submitted twice")));
        }
        let interval = self.config.as_ref().map_or(0, |c| c.keyframe_interval);
        let keyframe = is_keyframe_position(self.stats.frames_submitted, interval);

        self.pending.insert(
            ticket,
            Timing {
                timestamp_us: frame.timestamp_us(),
                duration_us: frame.duration_us(),
            },
        );
        trace!(sequence = %ticket, keyframe, "Submit frame");
        if let Err(e) = self.backend.encode(ticket, frame, keyframe) {
            return Err(self.fault(into_fault(ticket, e)));
        }
        self.stats.frames_submitted += 1;
        self.state = StageState::Decoding;
        Ok(())
    }

    /// Chunks that are ready, in ticket order. Never blocks.
    pub fn poll_chunks(&mut self) -> Result<Vec<Chunk>, EncodeError> {
        self.check_open()?;
        self.absorb_available()?;
        Ok(self.release_ready())
    }

    /// Block until a completion arrives (or abort is requested), then
    /// return whatever became ready.
    pub fn wait_chunks(&mut self, abort: &AbortHandle) -> Result<Vec<Chunk>, EncodeError> {
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
                    Err(RecvTimeoutError::Disconnected) => return Err(self.backend_gone()),
                }
            }
        }
        Ok(self.release_ready())
    }

    /// Flush the backend and return the trailing chunks. Every submitted
    /// frame must have produced a chunk. The stage is `Closed` afterwards.
    pub fn drain(&mut self) -> Result<Vec<Chunk>, EncodeError> {
        self.check_accepts("drain")?;
        self.state = StageState::Draining;
        debug!(outstanding = self.outstanding(), "Draining encoder");

        if let Err(e) = self.backend.flush() {
            let ticket = self.first_pending().unwrap_or(SequenceIndex::ZERO);
            return Err(self.fault(into_fault(ticket, e)));
        }
        self.absorb_available()?;
        let chunks = self.release_ready();

        if let Some(missing) = self.first_pending() {
            drop(chunks);
            return Err(self.fault(EncodeError::fault(
                missing,
                "encoder produced no chunk for this frame",
            )));
        }

        info!(
            frames = self.stats.frames_submitted,
            chunks = self.stats.chunks_emitted,
            keyframes = self.stats.keyframes,
            bytes = self.stats.bytes,
            "Encoder drained"
        );
        self.shutdown();
        Ok(chunks)
    }

    /// Close the backend and drop every held chunk. Idempotent.
    pub fn close(&mut self) {
        if self.state == StageState::Closed {
            return;
        }
        if !self.pending.is_empty() {
            warn!(
                held = self.reorder.len(),
                outstanding = self.pending.len(),
                "Closing encoder with work in flight"
            );
        }
        self.shutdown();
    }

    // ---- Accessors ----

    pub fn state(&self) -> StageState {
        self.state
    }

    /// Frames submitted whose chunks have not been forwarded yet.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> EncoderStats {
        self.stats.clone()
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn config(&self) -> Option<&EncoderConfig> {
        self.config.as_ref()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    // ---- internal helpers ----

    fn check_accepts(&self, action: &'static str) -> Result<(), EncodeError> {
        match self.state {
            StageState::Unconfigured => Err(EncodeError::NotConfigured),
            StageState::Closed => Err(EncodeError::Closed),
            StageState::Draining => Err(EncodeError::InvalidState {
                action,
                state: self.state,
            }),
            StageState::Configured | StageState::Decoding => Ok(()),
        }
    }

    fn check_open(&self) -> Result<(), EncodeError> {
        match self.state {
            StageState::Unconfigured => Err(EncodeError::NotConfigured),
            StageState::Closed => Err(EncodeError::Closed),
            _ => Ok(()),
        }
    }

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

    fn absorb_available(&mut self) -> Result<(), EncodeError> {
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

    fn absorb(&mut self, (ticket, result): EncodeCompletion) -> Result<(), EncodeError> {
        let unit = match result {
            Ok(unit) => unit,
            Err(e) => return Err(self.fault(into_fault(ticket, e))),
        };
        if !self.pending.contains_key(&ticket) || self.reorder.contains_key(&ticket) {
            return Err(self.fault(EncodeError::fault(
                ticket,
                "completion for a ticket that is not outstanding",
            )));
        }
        if unit.data.is_empty() {
            return Err(self.fault(EncodeError::fault(ticket, "encoder produced an empty chunk")));
        }
        trace!(sequence = %ticket, size = unit.data.len(), keyframe = unit.is_keyframe, "Chunk completed");
        self.reorder.insert(ticket, unit);
        self.stats.max_reorder_depth = self.stats.max_reorder_depth.max(self.reorder.len());
        Ok(())
    }

    fn release_ready(&mut self) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        while let Some((&ticket, _)) = self.pending.first_key_value() {
            let Some(unit) = self.reorder.remove(&ticket) else {
                break;
            };
            let Some(timing) = self.pending.remove(&ticket) else {
                break;
            };
            self.stats.chunks_emitted += 1;
            self.stats.bytes += unit.data.len() as u64;
            if unit.is_keyframe {
                self.stats.keyframes += 1;
            }
            chunks.push(Chunk::new(
                unit.data,
                unit.is_keyframe,
                timing.timestamp_us,
                timing.duration_us,
                ticket,
            ));
        }
        chunks
    }

    fn backend_gone(&mut self) -> EncodeError {
        let ticket = self.first_pending().unwrap_or(SequenceIndex::ZERO);
        self.fault(EncodeError::fault(ticket, "encoder backend stopped responding"))
    }

    fn fault(&mut self, err: EncodeError) -> EncodeError {
        warn!(backend = self.backend.name(), error = %err, "Encoder fault");
        self.shutdown();
        err
    }

    fn shutdown(&mut self) {
        self.backend.close();
        self.completions = None;
        self.reorder.clear();
        self.pending.clear();
        self.state = StageState::Closed;
    }
}

fn into_fault(ticket: SequenceIndex, err: EncodeError) -> EncodeError {
    if err.is_fault() {
        err
    } else {
        EncodeError::fault(ticket, err.to_string())
    }
}
