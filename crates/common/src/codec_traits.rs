//! Codec backend abstraction.
//!
//! The decode and encode stages drive backends through these traits.
//! Submission is non-blocking; results come back later through a sink
//! as `(ticket, result)` completions. A backend may batch, delay or
//! reorder completions; the stages restore ticket order.

use crossbeam::channel::Sender;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::config::{DecoderConfig, EncoderConfig};
use crate::error::{DecodeError, EncodeError};
use crate::media::{Frame, ParameterSet, Sample};
use crate::types::{Resolution, SequenceIndex};

/// A decoded raster as produced by a decoder backend, before the stage
/// stamps timing onto it.
#[derive(Debug)]
pub struct DecodedImage {
    pub buffer: PooledBuffer,
    pub resolution: Resolution,
}

/// One compressed access unit as produced by an encoder backend.
#[derive(Debug)]
pub struct EncodedUnit {
    pub data: PooledBuffer,
    pub is_keyframe: bool,
}

/// A completion delivered by a backend.
pub type Completion<T, E> = (SequenceIndex, Result<T, E>);

/// Where a backend sends its results, and where it takes output buffers
/// from.
///
/// Sending after the owning stage has closed is not an error: the
/// completion (and its buffer) is dropped, which releases the buffer.
pub struct CompletionSink<T, E> {
    tx: Sender<Completion<T, E>>,
    pool: BufferPool,
}

impl<T, E> Clone for CompletionSink<T, E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<T, E> CompletionSink<T, E> {
    pub fn new(tx: Sender<Completion<T, E>>, pool: BufferPool) -> Self {
        Self { tx, pool }
    }

    /// Zero-filled output buffer from the stage's pool.
    pub fn acquire(&self, len: usize) -> PooledBuffer {
        self.pool.acquire(len)
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Deliver a successful result. Returns `false` if the stage is gone.
    pub fn complete(&self, ticket: SequenceIndex, output: T) -> bool {
        self.tx.send((ticket, Ok(output))).is_ok()
    }

    /// Deliver an error for one ticket.
    pub fn fail(&self, ticket: SequenceIndex, error: E) -> bool {
        self.tx.send((ticket, Err(error))).is_ok()
    }
}

pub type FrameSink = CompletionSink<DecodedImage, DecodeError>;
pub type ChunkSink = CompletionSink<EncodedUnit, EncodeError>;

/// Video decoder backend.
pub trait VideoDecoder: Send {
    /// Backend name (for logging).
    fn name(&self) -> &str;

    /// Prepare for decoding. Called once, before any `decode`.
    fn configure(&mut self, config: &DecoderConfig, sink: FrameSink) -> Result<(), DecodeError>;

    /// Queue one sample. Must not block on output; the frame arrives
    /// through the sink tagged with `ticket`.
    fn decode(&mut self, ticket: SequenceIndex, sample: &Sample) -> Result<(), DecodeError>;

    /// Emit everything still buffered. When this returns, every
    /// completion for previously queued work has been sent.
    fn flush(&mut self) -> Result<(), DecodeError>;

    /// Release codec resources. Must be idempotent.
    fn close(&mut self);

    /// Frames the backend may hold back until it receives more input.
    /// Backends that complete every sample on their own report 0.
    fn max_output_delay(&self) -> usize {
        0
    }
}

/// Video encoder backend.
pub trait VideoEncoder: Send {
    fn name(&self) -> &str;

    fn configure(&mut self, config: &EncoderConfig, sink: ChunkSink) -> Result<(), EncodeError>;

    /// Decoder configuration of the produced bitstream, available once
    /// configured.
    fn parameter_set(&self) -> Option<ParameterSet>;

    /// Queue one frame. The frame is only borrowed: anything the backend
    /// needs later must be copied before returning.
    fn encode(
        &mut self,
        ticket: SequenceIndex,
        frame: &Frame,
        keyframe: bool,
    ) -> Result<(), EncodeError>;

    /// Emit everything still buffered. When this returns, every
    /// completion for previously queued work has been sent.
    fn flush(&mut self) -> Result<(), EncodeError>;

    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn completion_after_receiver_dropped_releases_buffer() {
        let pool = BufferPool::new("sink", 2);
        let (tx, rx) = channel::unbounded();
        let sink: FrameSink = CompletionSink::new(tx, pool.clone());
        drop(rx);

        let image = DecodedImage {
            buffer: sink.acquire(12),
            resolution: Resolution::new(4, 2),
        };
        assert!(!sink.complete(SequenceIndex(0), image));
        assert!(pool.stats().is_balanced());
    }

    #[test]
    fn completions_keep_ticket() {
        let pool = BufferPool::new("sink", 2);
        let (tx, rx) = channel::unbounded();
        let sink: ChunkSink = CompletionSink::new(tx, pool.clone());
        let unit = EncodedUnit {
            data: sink.acquire(3),
            is_keyframe: true,
        };
        assert!(sink.complete(SequenceIndex(5), unit));
        assert!(sink.fail(SequenceIndex(6), EncodeError::fault(SequenceIndex(6), "boom")));

        let (ticket, result) = rx.recv().unwrap();
        assert_eq!(ticket, SequenceIndex(5));
        assert!(result.unwrap().is_keyframe);
        let (ticket, result) = rx.recv().unwrap();
        assert_eq!(ticket, SequenceIndex(6));
        assert!(result.is_err());
        assert!(pool.stats().is_balanced());
    }
}
