// Streaming decoder contract.
//
// The patch engine treats the decompressor as opaque. It only relies on the
// sink / poll / finish / reset cycle below, with a bounded internal buffer on
// the decoder side. `StoredDecoder` is the built-in passthrough
// implementation for patches whose stream is not compressed.

use std::collections::VecDeque;

use thiserror::Error;

use crate::error::PatchError;

// ---------------------------------------------------------------------------
// Decoder results
// ---------------------------------------------------------------------------

/// Reasons a decoder rejects input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Internal buffer is full and no input byte was consumed.
    #[error("out of space in internal buffer")]
    Full,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("decoder fault: {0}")]
    Fault(String),
}

/// Whether a decoder still holds decoded output after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// More output is ready; poll again.
    More,
    /// Output is drained; more input is needed.
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poll {
    pub written: usize,
    pub status: PollStatus,
}

/// Result of signalling end of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishStatus {
    Done,
    /// Buffered state remains; the decoder expected more input or polling.
    More,
}

// ---------------------------------------------------------------------------
// Decoder traits
// ---------------------------------------------------------------------------

/// A bounded-memory streaming decompressor.
pub trait StreamDecoder {
    /// Feed compressed bytes. Returns how many were accepted.
    fn sink(&mut self, input: &[u8]) -> Result<usize, SinkError>;

    /// Drain decoded bytes into `out`.
    fn poll(&mut self, out: &mut [u8]) -> Poll;

    /// Signal that no more input follows for the current unit.
    fn finish(&mut self) -> FinishStatus;

    /// Drop all buffered state so the next byte starts a fresh unit.
    fn reset(&mut self);
}

/// Tuning carried by the patch header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderParams {
    /// log2 of the decoder window.
    pub window_sz2: u8,
    /// log2 of the decoder lookahead.
    pub lookahead_sz2: u8,
}

impl Default for DecoderParams {
    fn default() -> Self {
        Self {
            window_sz2: 8,
            lookahead_sz2: 4,
        }
    }
}

/// Builds the decoder for a run once the header is known.
pub trait DecoderFactory {
    fn create(&self, params: &DecoderParams) -> Result<Box<dyn StreamDecoder>, PatchError>;
}

impl<F> DecoderFactory for F
where
    F: Fn(&DecoderParams) -> Result<Box<dyn StreamDecoder>, PatchError>,
{
    fn create(&self, params: &DecoderParams) -> Result<Box<dyn StreamDecoder>, PatchError> {
        self(params)
    }
}

// ---------------------------------------------------------------------------
// Stored (passthrough) decoder
// ---------------------------------------------------------------------------

/// Passthrough decoder with a fixed-capacity ring buffer.
///
/// Every sunk byte is emitted unchanged. The ring holds `1 << window_sz2`
/// bytes; sinking into a full ring fails with `SinkError::Full`.
#[derive(Debug, Clone)]
pub struct StoredDecoder {
    ring: VecDeque<u8>,
    capacity: usize,
}

impl StoredDecoder {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn from_params(params: &DecoderParams) -> Self {
        Self::new(1usize << params.window_sz2.min(30))
    }

    /// Bytes waiting to be polled.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }
}

impl StreamDecoder for StoredDecoder {
    fn sink(&mut self, input: &[u8]) -> Result<usize, SinkError> {
        let room = self.capacity - self.ring.len();
        if room == 0 && !input.is_empty() {
            return Err(SinkError::Full);
        }
        let n = room.min(input.len());
        self.ring.extend(&input[..n]);
        Ok(n)
    }

    fn poll(&mut self, out: &mut [u8]) -> Poll {
        let n = out.len().min(self.ring.len());
        for (dst, src) in out.iter_mut().zip(self.ring.drain(..n)) {
            *dst = src;
        }
        let status = if self.ring.is_empty() {
            PollStatus::Empty
        } else {
            PollStatus::More
        };
        Poll { written: n, status }
    }

    fn finish(&mut self) -> FinishStatus {
        if self.ring.is_empty() {
            FinishStatus::Done
        } else {
            FinishStatus::More
        }
    }

    fn reset(&mut self) {
        self.ring.clear();
    }
}

/// Factory for `StoredDecoder`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredFactory;

impl DecoderFactory for StoredFactory {
    fn create(&self, params: &DecoderParams) -> Result<Box<dyn StreamDecoder>, PatchError> {
        Ok(Box::new(StoredDecoder::from_params(params)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
