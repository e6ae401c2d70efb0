//! Flow control between the pipeline controller and the sample source,
//! plus the cooperative abort flag.
//!
//! The controller owns a [`Backpressure`] counter and is the only writer
//! of the pause state; the sample source holds a read-only [`FlowSignal`]
//! and suspends production while it reads as paused.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::FlowConfig;

/// Read-only view of the pause state, observed by the sample source.
#[derive(Clone, Debug, Default)]
pub struct FlowSignal {
    paused: Arc<AtomicBool>,
}

impl FlowSignal {
    /// A signal that is never paused (for callers without backpressure).
    pub fn unpaused() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    fn set(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }
}

/// Result of a counter update.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowChange {
    Unchanged,
    /// The high-water mark was reached; the source has been paused.
    Paused,
    /// The count fell to the low-water mark; the source has been resumed.
    Resumed,
}

/// In-flight counter of samples submitted to the decoder but not yet
/// consumed by the encoder.
#[derive(Debug)]
pub struct Backpressure {
    config: FlowConfig,
    signal: FlowSignal,
    in_flight: usize,
    peak: usize,
    pauses: u64,
    resumes: u64,
}

impl Backpressure {
    pub fn new(config: FlowConfig) -> Self {
        Self {
            config,
            signal: FlowSignal::default(),
            in_flight: 0,
            peak: 0,
            pauses: 0,
            resumes: 0,
        }
    }

    /// Handle for the sample source.
    pub fn signal(&self) -> FlowSignal {
        self.signal.clone()
    }

    /// Record one sample submitted to the decoder.
    ///
    /// Pauses as soon as the count reaches the high-water mark, so the
    /// count itself never goes above it while the source honours the pause.
    pub fn on_submitted(&mut self) -> FlowChange {
        self.in_flight += 1;
        self.peak = self.peak.max(self.in_flight);
        if !self.is_paused() && self.in_flight >= self.config.high_water {
            self.signal.set(true);
            self.pauses += 1;
            debug!(in_flight = self.in_flight, "Sample source paused");
            return FlowChange::Paused;
        }
        FlowChange::Unchanged
    }

    /// Record one frame consumed by the encoder.
    pub fn on_consumed(&mut self) -> FlowChange {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.is_paused() && self.in_flight <= self.config.low_water {
            self.signal.set(false);
            self.resumes += 1;
            debug!(in_flight = self.in_flight, "Sample source resumed");
            return FlowChange::Resumed;
        }
        FlowChange::Unchanged
    }

    /// Drop all in-flight accounting (abort / fault cleanup).
    pub fn reset(&mut self) {
        self.in_flight = 0;
        self.signal.set(false);
    }

    pub fn is_paused(&self) -> bool {
        self.signal.is_paused()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn peak(&self) -> usize {
        self.peak
    }

    pub fn pauses(&self) -> u64 {
        self.pauses
    }

    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    pub fn config(&self) -> FlowConfig {
        self.config
    }
}

/// Cooperative cancellation flag shared between a running transcode and
/// whoever wants to stop it.
#[derive(Clone, Debug, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an abort; takes effect at the next suspension point.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
