// Storage capability consumed by the patch engine.
//
// The engine never interprets physical addresses. It tracks the three
// logical cursors (old image, patch stream, new image) and re-points the
// adapter with `seek` whenever one of them moves. Reads happen at the
// adapter's cursor for the selected region and do not advance it; writes
// go to the new-image cursor and advance it, like a buffered flash writer.

use std::fmt;
use std::io;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Region selector
// ---------------------------------------------------------------------------

/// One of the three independent address spaces touched by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// The image currently installed (bsdiff "old" file).
    Old,
    /// The slot receiving the reconstructed image.
    New,
    /// The region holding the encoded patch.
    Patch,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Old => "old image",
            Self::New => "new image",
            Self::Patch => "patch",
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Opaque failure reported by a storage adapter.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("access of {len} bytes at offset {offset} is outside the {region} region")]
    OutOfBounds {
        region: Region,
        offset: u64,
        len: usize,
    },

    #[error("{0} region is read-only")]
    ReadOnly(Region),

    /// Driver-specific status code passed through untouched.
    #[error("device error code {0}")]
    Device(i32),
}

// ---------------------------------------------------------------------------
// Storage trait
// ---------------------------------------------------------------------------

/// Block storage holding the old image, the new image and the patch.
pub trait Storage {
    /// Fill `buf` from `region` at its current cursor.
    fn read(&mut self, region: Region, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Write `buf` at the new-image cursor and advance it.
    ///
    /// `flush` is set on the write that completes the image; adapters that
    /// buffer writes must commit everything pending when they see it.
    fn write(&mut self, region: Region, buf: &[u8], flush: bool) -> Result<(), StorageError>;

    /// Erase `len` bytes of `region` starting at `offset`.
    fn erase(&mut self, region: Region, offset: u64, len: u64) -> Result<(), StorageError>;

    /// Re-point all three cursors.
    fn seek(&mut self, old_pos: u64, patch_pos: u64, new_pos: u64) -> Result<(), StorageError>;
}

impl<S: Storage + ?Sized> Storage for &mut S {
    fn read(&mut self, region: Region, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(region, buf)
    }

    fn write(&mut self, region: Region, buf: &[u8], flush: bool) -> Result<(), StorageError> {
        (**self).write(region, buf, flush)
    }

    fn erase(&mut self, region: Region, offset: u64, len: u64) -> Result<(), StorageError> {
        (**self).erase(region, offset, len)
    }

    fn seek(&mut self, old_pos: u64, patch_pos: u64, new_pos: u64) -> Result<(), StorageError> {
        (**self).seek(old_pos, patch_pos, new_pos)
    }
}

// ---------------------------------------------------------------------------
// In-memory storage
// ---------------------------------------------------------------------------

/// Byte value of erased flash.
pub const ERASED_BYTE: u8 = 0xFF;

/// Storage backed by three in-memory regions.
///
/// The new-image region has a fixed capacity chosen up front; writes past it
/// fail with `OutOfBounds` just as a flash slot would. Flushes and write calls
/// are counted so callers can observe the engine's I/O pattern.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    old: Vec<u8>,
    patch: Vec<u8>,
    new: Vec<u8>,
    new_len: usize,
    old_pos: u64,
    patch_pos: u64,
    new_pos: u64,
    writes: u64,
    flushes: u64,
    last_write_flushed: bool,
}

impl MemoryStorage {
    /// Create storage with `new_capacity` bytes available for the new image.
    pub fn new(old: Vec<u8>, patch: Vec<u8>, new_capacity: usize) -> Self {
        Self {
            old,
            patch,
            new: vec![ERASED_BYTE; new_capacity],
            new_len: 0,
            old_pos: 0,
            patch_pos: 0,
            new_pos: 0,
            writes: 0,
            flushes: 0,
            last_write_flushed: false,
        }
    }

    /// Bytes written to the new image so far (up to the highest write).
    pub fn new_image(&self) -> &[u8] {
        &self.new[..self.new_len]
    }

    /// Entire new-image region, including unwritten bytes.
    pub fn new_region(&self) -> &[u8] {
        &self.new
    }

    /// Number of `write` calls that succeeded.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    /// Number of writes that requested a flush.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Whether the most recent write requested a flush.
    pub fn last_write_flushed(&self) -> bool {
        self.last_write_flushed
    }

    /// Current `(old, patch, new)` cursors.
    pub fn cursors(&self) -> (u64, u64, u64) {
        (self.old_pos, self.patch_pos, self.new_pos)
    }

    fn range(
        region: Region,
        len_total: usize,
        offset: u64,
        len: usize,
    ) -> Result<std::ops::Range<usize>, StorageError> {
        let oob = || StorageError::OutOfBounds {
            region,
            offset,
            len,
        };
        let start = usize::try_from(offset).map_err(|_| oob())?;
        let end = start.checked_add(len).ok_or_else(oob)?;
        if end > len_total {
            return Err(oob());
        }
        Ok(start..end)
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self, region: Region, buf: &mut [u8]) -> Result<(), StorageError> {
        let (data, pos) = match region {
            Region::Old => (&self.old[..], self.old_pos),
            Region::Patch => (&self.patch[..], self.patch_pos),
            Region::New => (&self.new[..], self.new_pos),
        };
        let range = Self::range(region, data.len(), pos, buf.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    fn write(&mut self, region: Region, buf: &[u8], flush: bool) -> Result<(), StorageError> {
        if region != Region::New {
            return Err(StorageError::ReadOnly(region));
        }
        let range = Self::range(region, self.new.len(), self.new_pos, buf.len())?;
        let end = range.end;
        self.new[range].copy_from_slice(buf);
        self.new_pos = end as u64;
        self.new_len = self.new_len.max(end);
        self.writes += 1;
        self.flushes += u64::from(flush);
        self.last_write_flushed = flush;
        Ok(())
    }

    fn erase(&mut self, region: Region, offset: u64, len: u64) -> Result<(), StorageError> {
        if region != Region::New {
            return Err(StorageError::ReadOnly(region));
        }
        let len = usize::try_from(len).map_err(|_| StorageError::OutOfBounds {
            region,
            offset,
            len: usize::MAX,
        })?;
        let range = Self::range(region, self.new.len(), offset, len)?;
        self.new[range].fill(ERASED_BYTE);
        Ok(())
    }

    fn seek(&mut self, old_pos: u64, patch_pos: u64, new_pos: u64) -> Result<(), StorageError> {
        self.old_pos = old_pos;
        self.patch_pos = patch_pos;
        self.new_pos = new_pos;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_does_not_advance() {
        let mut storage = MemoryStorage::new(vec![1, 2, 3, 4], vec![9, 8], 4);
        let mut buf = [0u8; 2];
        storage.read(Region::Old, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        storage.read(Region::Old, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);

        storage.seek(2, 1, 0).unwrap();
        storage.read(Region::Old, &mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
        let mut one = [0u8; 1];
        storage.read(Region::Patch, &mut one).unwrap();
        assert_eq!(one, [8]);
    }

    #[test]
    fn read_past_end_is_out_of_bounds() {
        let mut storage = MemoryStorage::new(vec![1, 2], Vec::new(), 0);
        storage.seek(1, 0, 0).unwrap();
        let mut buf = [0u8; 2];
        let err = storage.read(Region::Old, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            StorageError::OutOfBounds {
                region: Region::Old,
                offset: 1,
                len: 2
            }
        ));
    }

    #[test]
    fn writes_append_and_track_flush() {
        let mut storage = MemoryStorage::new(Vec::new(), Vec::new(), 4);
        storage.write(Region::New, &[1, 2], false).unwrap();
        storage.write(Region::New, &[3, 4], true).unwrap();
        assert_eq!(storage.new_image(), &[1, 2, 3, 4]);
        assert_eq!(storage.write_count(), 2);
        assert_eq!(storage.flush_count(), 1);
        assert!(storage.last_write_flushed());
        assert_eq!(storage.cursors(), (0, 0, 4));

        let err = storage.write(Region::New, &[5], false).unwrap_err();
        assert!(matches!(err, StorageError::OutOfBounds { .. }));
    }

    #[test]
    fn only_new_region_is_writable() {
        let mut storage = MemoryStorage::new(vec![0; 4], vec![0; 4], 4);
        assert!(matches!(
            storage.write(Region::Old, &[1], false),
            Err(StorageError::ReadOnly(Region::Old))
        ));
        assert!(matches!(
            storage.erase(Region::Patch, 0, 1),
            Err(StorageError::ReadOnly(Region::Patch))
        ));
    }

    #[test]
    fn erase_resets_to_erased_byte() {
        let mut storage = MemoryStorage::new(Vec::new(), Vec::new(), 4);
        storage.write(Region::New, &[0, 0, 0, 0], false).unwrap();
        storage.erase(Region::New, 1, 2).unwrap();
        assert_eq!(storage.new_region(), &[0, ERASED_BYTE, ERASED_BYTE, 0]);
        assert!(storage.erase(Region::New, 3, 2).is_err());
    }
}
