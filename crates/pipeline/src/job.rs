//! Background transcode job.
//!
//! Runs a [`Transcoder`] on its own named thread and gives the caller a
//! [`TranscodeHandle`] for progress and cancellation.
//!
//! ```text
//! TranscodeJob::spawn()
//!   |
//!   +-- spawn "recast-transcode" thread --> Transcoder::run(input)
//!   |                                          |
//!   |                                          +-- progress --> channel
//!   |
//!   +-- TranscodeHandle (progress receiver, abort flag, join)
//! ```

use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver};
use rc_common::{AbortHandle, TranscodeConfig, VideoDecoder, VideoEncoder};
use tracing::info;

use crate::controller::{TranscodeOutput, Transcoder};
use crate::error::{TranscodeError, TranscodeResult};
use crate::progress::TranscodeProgress;

/// Starts transcodes on background threads.
pub struct TranscodeJob;

impl TranscodeJob {
    /// Validate the config and start transcoding `input` on a new thread.
    pub fn spawn(
        input: Vec<u8>,
        config: TranscodeConfig,
        decoder: Box<dyn VideoDecoder>,
        encoder: Box<dyn VideoEncoder>,
    ) -> TranscodeResult<TranscodeHandle> {
        let (progress_tx, progress_rx) = channel::unbounded();
        let abort = AbortHandle::new();
        let mut transcoder = Transcoder::new(config, decoder, encoder)
            .with_abort_handle(abort.clone())
            .with_progress(progress_tx);
        transcoder.validate()?;

        info!(bytes = input.len(), "Starting transcode job");
        let worker = std::thread::Builder::new()
            .name("recast-transcode".to_string())
            .spawn(move || transcoder.run(&input))
            .map_err(|e| TranscodeError::Job(format!("failed to spawn transcode thread: {e}")))?;

        Ok(TranscodeHandle {
            progress_rx,
            abort,
            worker,
        })
    }
}

/// Handle for monitoring and controlling a running transcode.
#[derive(Debug)]
pub struct TranscodeHandle {
    progress_rx: Receiver<TranscodeProgress>,
    abort: AbortHandle,
    worker: JoinHandle<TranscodeResult<TranscodeOutput>>,
}

impl TranscodeHandle {
    /// Next progress update, if one is waiting (non-blocking).
    pub fn try_recv_progress(&self) -> Option<TranscodeProgress> {
        self.progress_rx.try_recv().ok()
    }

    /// Wait for the next progress update. `None` once the job is over
    /// and every update has been received.
    pub fn recv_progress(&self) -> Option<TranscodeProgress> {
        self.progress_rx.recv().ok()
    }

    /// Every progress update currently waiting.
    pub fn drain_progress(&self) -> Vec<TranscodeProgress> {
        self.progress_rx.try_iter().collect()
    }

    /// Request an abort; the job stops at its next suspension point.
    pub fn cancel(&self) {
        self.abort.abort();
        info!("Transcode cancellation requested");
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.abort.is_aborted()
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the job and return its result.
    pub fn join(self) -> TranscodeResult<TranscodeOutput> {
        self.worker
            .join()
            .map_err(|_| TranscodeError::Job("transcode thread panicked".into()))?
    }
}
