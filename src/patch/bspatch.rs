// bspatch interpreter.
//
// Consumes control triples and the decoded diff/extra bytes that follow
// them, combining diff bytes with old-image bytes and writing the result to
// the new image. Three cursors move independently: the old image (moved by
// the diff phase and by `seek_delta`), the patch stream (moved by the
// decompressor adapter) and the new image (moved by every write).
//
// All buffers are allocated once from `ApplyOptions` and never grow, so
// memory use is independent of image size.

use log::debug;

use super::control::{CONTROL_TRIPLE_LEN, ControlTriple};
use crate::decompress::session::DecompressionSession;
use crate::engine::{ApplyOptions, ApplyStats, OffsetCursors};
use crate::error::PatchError;
use crate::storage::{Region, Storage};

/// Patch applier with its fixed working buffers.
pub struct Bspatch {
    /// Shared decode buffer; holds one decoded chunk.
    chunk: Vec<u8>,
    chunk_pos: usize,
    chunk_len: usize,
    /// Old-image bytes for one step.
    old: Vec<u8>,
    /// Combined output bytes for one step.
    new: Vec<u8>,
}

impl Bspatch {
    /// Allocate the working buffers, rejecting sizes the apply loop cannot
    /// make progress with.
    pub fn new(options: &ApplyOptions) -> Result<Self, PatchError> {
        options.validate()?;
        Ok(Self {
            chunk: vec![0; options.chunk_size],
            chunk_pos: 0,
            chunk_len: 0,
            old: vec![0; options.step_size],
            new: vec![0; options.step_size],
        })
    }

    /// Total bytes held by the working buffers.
    pub fn buffer_footprint(&self) -> usize {
        self.chunk.len() + self.old.len() + self.new.len()
    }

    /// Apply the patch stream until `cursors.new_pos == cursors.target_size`.
    ///
    /// The storage must already be positioned at `cursors`; the patch cursor
    /// must point at the first control group.
    pub fn apply<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        session: &mut DecompressionSession,
        cursors: &mut OffsetCursors,
    ) -> Result<ApplyStats, PatchError> {
        let patch_start = cursors.patch_pos;
        let mut stats = ApplyStats {
            target_size: cursors.target_size,
            ..ApplyStats::default()
        };
        self.chunk_pos = 0;
        self.chunk_len = 0;

        storage
            .seek(cursors.old_pos, cursors.patch_pos, cursors.new_pos)
            .map_err(PatchError::seek)?;

        while cursors.new_pos < cursors.target_size {
            let ctrl = self.next_control(storage, session, cursors)?;
            debug!(
                "ctrl: diff = {}, extra = {}, seek = {}",
                ctrl.diff_len, ctrl.extra_len, ctrl.seek_delta
            );

            let (diff_len, extra_len) = check_lengths(&ctrl, cursors)?;

            self.diff_phase(storage, session, cursors, diff_len)?;

            if cursors
                .new_pos
                .checked_add(extra_len)
                .is_none_or(|end| end > cursors.target_size)
            {
                return Err(PatchError::Integrity(format!(
                    "extra block of {extra_len} bytes at {} exceeds target size {}",
                    cursors.new_pos, cursors.target_size
                )));
            }
            self.extra_phase(storage, session, cursors, extra_len)?;

            seek_phase(storage, cursors, ctrl.seek_delta)?;

            stats.control_triples += 1;
            stats.diff_bytes += diff_len;
            stats.extra_bytes += extra_len;
        }

        stats.patch_bytes = cursors.patch_pos - patch_start;
        Ok(stats)
    }

    fn pending(&self) -> usize {
        self.chunk_len - self.chunk_pos
    }

    fn refill<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        session: &mut DecompressionSession,
        cursors: &mut OffsetCursors,
        want: usize,
    ) -> Result<usize, PatchError> {
        let n = session.decode_chunk(storage, cursors, &mut self.chunk[..want])?;
        if n == 0 {
            return Err(PatchError::Decode(format!(
                "decoder produced no data at patch offset {}",
                cursors.patch_pos
            )));
        }
        self.chunk_pos = 0;
        self.chunk_len = n;
        Ok(n)
    }

    fn next_control<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        session: &mut DecompressionSession,
        cursors: &mut OffsetCursors,
    ) -> Result<ControlTriple, PatchError> {
        if self.pending() == 0 {
            session.reset();
            self.refill(storage, session, cursors, CONTROL_TRIPLE_LEN)?;
        }
        if self.pending() < CONTROL_TRIPLE_LEN {
            return Err(PatchError::Decode(format!(
                "truncated control group: {} of {CONTROL_TRIPLE_LEN} bytes",
                self.pending()
            )));
        }

        let mut buf = [0u8; CONTROL_TRIPLE_LEN];
        buf.copy_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + CONTROL_TRIPLE_LEN]);
        self.chunk_pos += CONTROL_TRIPLE_LEN;
        Ok(ControlTriple::decode(&buf))
    }

    /// Make sure decoded bytes for the current block are buffered.
    ///
    /// A chunk shorter than the buffer capacity ends its block, so the
    /// decoder is reset for the next independently-encoded unit.
    fn fill_block<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        session: &mut DecompressionSession,
        cursors: &mut OffsetCursors,
        remaining: u64,
    ) -> Result<(), PatchError> {
        if self.pending() > 0 {
            return Ok(());
        }
        let capacity = self.chunk.len();
        let want = usize::try_from(remaining).map_or(capacity, |r| r.min(capacity));
        let got = self.refill(storage, session, cursors, want)?;
        if got < capacity {
            session.reset();
        }
        Ok(())
    }

    fn diff_phase<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        session: &mut DecompressionSession,
        cursors: &mut OffsetCursors,
        diff_len: u64,
    ) -> Result<(), PatchError> {
        let mut remaining = diff_len;
        while remaining > 0 {
            self.fill_block(storage, session, cursors, remaining)?;
            let n = step_len(remaining, self.old.len(), self.pending());

            storage
                .read(Region::Old, &mut self.old[..n])
                .map_err(PatchError::read(Region::Old))?;

            let diff = &self.chunk[self.chunk_pos..self.chunk_pos + n];
            for ((out, &d), &o) in self.new[..n].iter_mut().zip(diff).zip(&self.old[..n]) {
                *out = d.wrapping_add(o);
            }
            self.chunk_pos += n;

            write_new(storage, cursors, &self.new[..n])?;
            remaining -= n as u64;
            cursors.old_pos += n as u64;
            storage
                .seek(cursors.old_pos, cursors.patch_pos, cursors.new_pos)
                .map_err(PatchError::seek)?;
        }
        Ok(())
    }

    fn extra_phase<S: Storage + ?Sized>(
        &mut self,
        storage: &mut S,
        session: &mut DecompressionSession,
        cursors: &mut OffsetCursors,
        extra_len: u64,
    ) -> Result<(), PatchError> {
        let mut remaining = extra_len;
        while remaining > 0 {
            self.fill_block(storage, session, cursors, remaining)?;
            let n = step_len(remaining, self.new.len(), self.pending());

            write_new(
                storage,
                cursors,
                &self.chunk[self.chunk_pos..self.chunk_pos + n],
            )?;
            self.chunk_pos += n;
            remaining -= n as u64;
        }
        Ok(())
    }
}

fn step_len(remaining: u64, step: usize, pending: usize) -> usize {
    usize::try_from(remaining).map_or(step, |r| r.min(step)).min(pending)
}

/// Validate a freshly decoded triple against the cursors.
fn check_lengths(ctrl: &ControlTriple, cursors: &OffsetCursors) -> Result<(u64, u64), PatchError> {
    let (Ok(diff_len), Ok(extra_len)) = (
        u64::try_from(ctrl.diff_len),
        u64::try_from(ctrl.extra_len),
    ) else {
        return Err(PatchError::Integrity(format!(
            "negative block length (diff = {}, extra = {})",
            ctrl.diff_len, ctrl.extra_len
        )));
    };
    if diff_len == 0 && extra_len == 0 {
        return Err(PatchError::Integrity(format!(
            "empty control triple at new offset {}",
            cursors.new_pos
        )));
    }
    if cursors
        .new_pos
        .checked_add(diff_len)
        .is_none_or(|end| end > cursors.target_size)
    {
        return Err(PatchError::Integrity(format!(
            "diff block of {diff_len} bytes at {} exceeds target size {}",
            cursors.new_pos, cursors.target_size
        )));
    }
    Ok((diff_len, extra_len))
}

/// Write at the new-image cursor, flushing on the write that completes the image.
fn write_new<S: Storage + ?Sized>(
    storage: &mut S,
    cursors: &mut OffsetCursors,
    bytes: &[u8],
) -> Result<(), PatchError> {
    let end = cursors.new_pos + bytes.len() as u64;
    let flush = end == cursors.target_size;
    storage
        .write(Region::New, bytes, flush)
        .map_err(PatchError::write)?;
    cursors.new_pos = end;
    Ok(())
}

fn seek_phase<S: Storage + ?Sized>(
    storage: &mut S,
    cursors: &mut OffsetCursors,
    seek_delta: i64,
) -> Result<(), PatchError> {
    let moved = i64::try_from(cursors.old_pos)
        .ok()
        .and_then(|pos| pos.checked_add(seek_delta))
        .ok_or_else(|| {
            PatchError::Integrity(format!(
                "seek of {seek_delta} from old offset {} overflows",
                cursors.old_pos
            ))
        })?;
    cursors.old_pos = u64::try_from(moved).map_err(|_| {
        PatchError::Integrity(format!(
            "seek of {seek_delta} moves old cursor before start (from {})",
            cursors.old_pos
        ))
    })?;
    storage
        .seek(cursors.old_pos, cursors.patch_pos, cursors.new_pos)
        .map_err(PatchError::seek)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
