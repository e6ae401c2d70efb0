//! Pipeline controller: wires SampleSource → DecodeStage → EncodeStage →
//! ContainerWriter and keeps the sample source in check.
//!
//! The controller is single-threaded and cooperative. The only places
//! it suspends are the stage waits, which poll the abort flag.
//!
//! ```text
//! loop:
//!   feed one sample (unless the source is paused or done)
//!   frames ready  --> encode, release frame, on_consumed
//!   chunks ready  --> writer.add_chunk, progress
//!   paused and nothing moved --> block on the decoder
//! drain decoder --> encode the trailing frames
//! drain encoder --> write the trailing chunks
//! finalize writer
//! ```

use crossbeam::channel::Sender;
use rc_common::{
    AbortHandle, Backpressure, BufferStats, Chunk, EncoderConfig, FlowChange, Frame, StageState,
    TranscodeConfig, VideoDecoder, VideoEncoder,
};
use rc_decoder::{DecodeStage, DecodeStats};
use rc_demux::{SamplePoll, SampleSource};
use rc_encoder::{EncodeStage, EncoderStats};
use rc_mux::{create_writer, ContainerWriter, TrackConfig, TrackHandle};
use tracing::{debug, info, warn};

use crate::error::{TranscodeError, TranscodeResult};
use crate::progress::TranscodeProgress;

/// What a successful run hands back.
#[derive(Debug)]
pub struct TranscodeOutput {
    /// The finished container.
    pub data: Vec<u8>,
    /// Chunks written, one per source sample.
    pub chunks: u64,
    /// Keyframe chunks among them.
    pub keyframes: u64,
    /// Pause/resume cycles of the sample source.
    pub pause_cycles: u64,
    /// Highest in-flight sample count observed.
    pub peak_in_flight: usize,
    /// Frame pool accounting at the end of the run.
    pub frame_stats: BufferStats,
    /// Chunk pool accounting at the end of the run.
    pub chunk_stats: BufferStats,
    /// Decode stage counters.
    pub decode_stats: DecodeStats,
    /// Encode stage counters.
    pub encode_stats: EncoderStats,
}

/// Per-run state the stage pumps share.
struct Run {
    writer: Box<dyn ContainerWriter>,
    track: Option<TrackHandle>,
    flow: Backpressure,
    total: u64,
    written: u64,
    keyframes: u64,
}

/// Re-encodes the video track of one in-memory container.
///
/// A `Transcoder` is single-use: both stages are closed when `run`
/// returns, whatever the outcome.
pub struct Transcoder {
    config: TranscodeConfig,
    decode: DecodeStage,
    encode: EncodeStage,
    abort: AbortHandle,
    progress: Option<Sender<TranscodeProgress>>,
    track_id: Option<u32>,
}

impl Transcoder {
    pub fn new(
        config: TranscodeConfig,
        decoder: Box<dyn VideoDecoder>,
        encoder: Box<dyn VideoEncoder>,
    ) -> Self {
        Self {
            config,
            decode: DecodeStage::new(decoder),
            encode: EncodeStage::new(encoder),
            abort: AbortHandle::new(),
            progress: None,
            track_id: None,
        }
    }

    /// Share an existing abort flag instead of the transcoder's own.
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    /// Send progress updates to `tx`.
    pub fn with_progress(mut self, tx: Sender<TranscodeProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Transcode this track instead of the first video track.
    pub fn with_track(mut self, track_id: u32) -> Self {
        self.track_id = Some(track_id);
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn config(&self) -> &TranscodeConfig {
        &self.config
    }

    pub fn decode_stage(&self) -> &DecodeStage {
        &self.decode
    }

    pub fn encode_stage(&self) -> &EncodeStage {
        &self.encode
    }

    /// States of the decode and encode stages.
    pub fn stage_states(&self) -> (StageState, StageState) {
        (self.decode.state(), self.encode.state())
    }

    /// Check the config, including that the decoder's output delay
    /// cannot stall the paused sample source.
    pub fn validate(&self) -> TranscodeResult<()> {
        self.config.validate()?;
        self.config
            .flow
            .check_decoder_delay(self.decode.max_output_delay())?;
        Ok(())
    }

    /// Run the whole transcode. On any error or abort both stages are
    /// closed, every held buffer is released and the writer's output is
    /// discarded.
    pub fn run(&mut self, input: &[u8]) -> TranscodeResult<TranscodeOutput> {
        self.validate()?;
        let mut run = Run {
            writer: create_writer(self.config.writer, self.config.fragment),
            track: None,
            flow: Backpressure::new(self.config.flow),
            total: 0,
            written: 0,
            keyframes: 0,
        };

        match self.execute(input, &mut run) {
            Ok(data) => {
                let output = TranscodeOutput {
                    chunks: run.written,
                    keyframes: run.keyframes,
                    pause_cycles: run.flow.pauses(),
                    peak_in_flight: run.flow.peak(),
                    frame_stats: self.decode.pool().stats(),
                    chunk_stats: self.encode.pool().stats(),
                    decode_stats: self.decode.stats(),
                    encode_stats: self.encode.stats(),
                    data,
                };
                info!(
                    chunks = output.chunks,
                    keyframes = output.keyframes,
                    bytes = output.data.len(),
                    pause_cycles = output.pause_cycles,
                    peak_in_flight = output.peak_in_flight,
                    "Transcode complete"
                );
                self.report(TranscodeProgress::Completed {
                    chunks: output.chunks,
                    bytes: output.data.len() as u64,
                });
                Ok(output)
            }
            Err(err) => {
                self.teardown(&mut run);
                if err.is_aborted() {
                    warn!(written = run.written, total = run.total, "Transcode aborted");
                    self.report(TranscodeProgress::Cancelled);
                } else {
                    warn!(
                        stage = err.stage(),
                        sequence = ?err.sequence(),
                        error = %err,
                        "Transcode failed"
                    );
                    self.report(TranscodeProgress::Failed {
                        error: err.to_string(),
                    });
                }
                Err(err)
            }
        }
    }

    fn execute(&mut self, input: &[u8], run: &mut Run) -> TranscodeResult<Vec<u8>> {
        let mut source = SampleSource::open(input)?;
        if let Some(track_id) = self.track_id {
            source.select(track_id)?;
        }
        let track = source.track().clone();
        let params = source.parameter_set()?;

        self.decode.configure(&params, track.resolution)?;
        self.encode
            .configure(EncoderConfig::new(&self.config.encoder, track.resolution))?;
        let output_params = self.encode.parameter_set()?.clone();
        let handle = run.writer.add_track(TrackConfig::new(
            &output_params,
            track.resolution,
            track.time_scale,
        ))?;
        run.track = Some(handle);

        let mut stream = source
            .samples(run.flow.signal())?
            .with_read_ahead(self.config.read_ahead);
        run.total = stream.total() as u64;
        info!(
            track_id = track.track_id,
            samples = run.total,
            source = %params.codec_string(),
            target = %output_params.codec_string(),
            writer = ?self.config.writer,
            "Transcode started"
        );
        self.report(TranscodeProgress::Started { total: run.total });

        let mut source_done = false;
        loop {
            self.check_abort()?;
            let mut moved = false;

            if !source_done {
                match stream.poll_sample()? {
                    SamplePoll::Ready(sample) => {
                        self.decode.submit(sample)?;
                        if run.flow.on_submitted() == FlowChange::Paused {
                            self.report(TranscodeProgress::Paused {
                                in_flight: run.flow.in_flight(),
                            });
                        }
                        moved = true;
                    }
                    SamplePoll::Pending => {}
                    SamplePoll::Done => source_done = true,
                }
            }

            let frames = self.decode.poll_frames()?;
            moved |= !frames.is_empty();
            self.encode_frames(run, frames)?;
            let chunks = self.encode.poll_chunks()?;
            moved |= !chunks.is_empty();
            self.write_chunks(run, chunks)?;

            if source_done {
                break;
            }
            if !moved && run.flow.is_paused() {
                // Nothing else can happen until the decoder hands back a frame.
                let frames = self.decode.wait_frames(&self.abort)?;
                self.check_abort()?;
                self.encode_frames(run, frames)?;
            }
        }

        debug!(in_flight = run.flow.in_flight(), "Source exhausted, draining");
        let frames = self.decode.drain()?;
        self.encode_frames(run, frames)?;
        self.check_abort()?;
        let chunks = self.encode.drain()?;
        self.write_chunks(run, chunks)?;

        Ok(run.writer.finalize()?)
    }

    /// Encode `frames` in order, releasing each one after submit.
    fn encode_frames(&mut self, run: &mut Run, frames: Vec<Frame>) -> TranscodeResult<()> {
        for frame in frames {
            self.encode.submit(&frame)?;
            frame.release();
            if run.flow.on_consumed() == FlowChange::Resumed {
                self.report(TranscodeProgress::Resumed {
                    in_flight: run.flow.in_flight(),
                });
            }
        }
        Ok(())
    }

    fn write_chunks(&self, run: &mut Run, chunks: Vec<Chunk>) -> TranscodeResult<()> {
        let Some(track) = run.track else {
            return Ok(());
        };
        for chunk in chunks {
            if chunk.is_keyframe() {
                run.keyframes += 1;
            }
            run.writer.add_chunk(track, chunk)?;
            run.written += 1;
            self.report(TranscodeProgress::SampleProcessed {
                processed: run.written,
                total: run.total,
            });
        }
        Ok(())
    }

    fn check_abort(&self) -> TranscodeResult<()> {
        if self.abort.is_aborted() {
            return Err(TranscodeError::Aborted);
        }
        Ok(())
    }

    /// Close both stages, reset the flow state and drop the output.
    fn teardown(&mut self, run: &mut Run) {
        self.decode.close();
        self.encode.close();
        run.flow.reset();
        run.writer.discard();
    }

    fn report(&self, update: TranscodeProgress) {
        if let Some(tx) = &self.progress {
            // A dropped receiver just means nobody is watching.
            let _ = tx.send(update);
        }
    }
}
