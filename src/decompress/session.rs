// Streaming decompressor adapter.
//
// Drives a `StreamDecoder` through Sink -> Poll -> Finish to produce exactly
// the requested number of decoded bytes from the patch region. Compressed
// input is pulled one byte at a time so the decoder never consumes bytes
// that belong to the next independently-encoded unit.

use log::trace;

use super::decoder::{FinishStatus, PollStatus, StreamDecoder};
use crate::engine::OffsetCursors;
use crate::error::PatchError;
use crate::storage::{Region, Storage};

/// Compressed bytes read from the patch region per sink step.
pub const INPUT_READ_SIZE: usize = 1;

/// Maximum decoded bytes pulled per poll call.
pub const POLL_READ_SIZE: usize = 256;

/// Where the adapter is in its feed/drain cycle for the current chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Read and sink more compressed input.
    Sink,
    /// Drain what the decoder has produced.
    Poll,
    /// Request satisfied; finalize the chunk.
    Finish,
}

/// Decoder instance plus per-chunk bookkeeping for one run.
pub struct DecompressionSession {
    decoder: Box<dyn StreamDecoder>,
    state: DecoderState,
    /// Bytes decoded into the current chunk.
    produced: usize,
    /// Compressed bytes sunk over the whole session.
    consumed: u64,
}

impl DecompressionSession {
    pub fn new(decoder: Box<dyn StreamDecoder>) -> Self {
        Self {
            decoder,
            state: DecoderState::Sink,
            produced: 0,
            consumed: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Compressed bytes consumed since the session was created.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Reset the decoder so the next chunk starts a new unit.
    pub fn reset(&mut self) {
        self.decoder.reset();
        self.state = DecoderState::Sink;
        self.produced = 0;
    }

    /// Decode up to `out.len()` bytes, reading compressed input from the patch
    /// region at `cursors.patch_pos`.
    ///
    /// Returns the number of bytes written into `out`.
    pub fn decode_chunk<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        cursors: &mut OffsetCursors,
        out: &mut [u8],
    ) -> Result<usize, PatchError> {
        if out.is_empty() {
            return Ok(0);
        }
        self.state = DecoderState::Sink;
        self.produced = 0;

        loop {
            match self.state {
                DecoderState::Sink => self.sink_step(storage, cursors)?,
                DecoderState::Poll => self.poll_step(out)?,
                DecoderState::Finish => return self.finish_step(out.len()),
            }
        }
    }

    fn sink_step<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        cursors: &mut OffsetCursors,
    ) -> Result<(), PatchError> {
        let mut input = [0u8; INPUT_READ_SIZE];
        storage
            .read(Region::Patch, &mut input)
            .map_err(PatchError::read(Region::Patch))?;

        cursors.patch_pos += INPUT_READ_SIZE as u64;
        storage
            .seek(cursors.old_pos, cursors.patch_pos, cursors.new_pos)
            .map_err(PatchError::seek)?;

        let accepted = self.decoder.sink(&input)?;
        if accepted == 0 {
            return Err(super::decoder::SinkError::Full.into());
        }
        self.consumed += accepted as u64;
        self.state = DecoderState::Poll;
        Ok(())
    }

    fn poll_step(&mut self, out: &mut [u8]) -> Result<(), PatchError> {
        loop {
            if self.produced == out.len() {
                self.state = DecoderState::Finish;
                return Ok(());
            }
            let end = out.len().min(self.produced + POLL_READ_SIZE);
            let poll = self.decoder.poll(&mut out[self.produced..end]);
            self.produced += poll.written;

            match poll.status {
                PollStatus::Empty => {
                    self.state = if self.produced == out.len() {
                        DecoderState::Finish
                    } else {
                        DecoderState::Sink
                    };
                    return Ok(());
                }
                PollStatus::More if poll.written == 0 => {
                    return Err(PatchError::Decode(
                        "decoder reported pending output but produced none".into(),
                    ));
                }
                PollStatus::More => {}
            }
        }
    }

    fn finish_step(&mut self, requested: usize) -> Result<usize, PatchError> {
        let status = self.decoder.finish();
        trace!(
            "decoded chunk: {} of {requested} bytes, finish = {status:?}",
            self.produced
        );
        // Finish status only matters when nothing was produced.
        if self.produced > 0 {
            return Ok(self.produced);
        }
        match status {
            FinishStatus::Done => Ok(0),
            FinishStatus::More => Err(PatchError::Decode(
                "decoder could not finish an empty chunk".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
