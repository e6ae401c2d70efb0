//! Progress updates sent by the controller over a crossbeam channel.

/// Progress update from a running transcode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TranscodeProgress {
    /// Track opened and both stages configured.
    Started {
        /// Samples in the selected track.
        total: u64,
    },
    /// A chunk has been handed to the writer.
    SampleProcessed {
        /// Chunks written so far.
        processed: u64,
        total: u64,
    },
    /// The sample source was paused at the high-water mark.
    Paused { in_flight: usize },
    /// The sample source was resumed at the low-water mark.
    Resumed { in_flight: usize },
    /// Output finalized.
    Completed {
        chunks: u64,
        /// Size of the output buffer.
        bytes: u64,
    },
    /// A stage failed; the output was discarded.
    Failed { error: String },
    /// Abort was requested; the output was discarded.
    Cancelled,
}

impl TranscodeProgress {
    /// Progress as a fraction (0.0 to 1.0).
    pub fn progress_fraction(&self) -> f64 {
        match self {
            Self::SampleProcessed { processed, total } if *total > 0 => {
                (*processed as f64 / *total as f64).min(1.0)
            }
            Self::Completed { .. } => 1.0,
            _ => 0.0,
        }
    }

    /// Whether the transcode is still running.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::Started { .. }
                | Self::SampleProcessed { .. }
                | Self::Paused { .. }
                | Self::Resumed { .. }
        )
    }

    /// Whether this is the last update of a run.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }
}
