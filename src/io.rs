// File-backed storage and file-level apply helper.
//
// `FileStorage` maps the three regions onto three files: the old image and
// the patch are read in place, the new image is written through a buffered
// writer bounded by a fixed capacity, the way a flash slot is. `apply_file()`
// wraps a full run over such storage. Optionally computes a streaming SHA-256
// of the new image (feature-gated behind `file-io`).

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

#[cfg(feature = "file-io")]
use sha2::Digest;
use thiserror::Error;

use crate::engine::{self, ApplyOptions, Outcome};
use crate::error::PatchError;
use crate::storage::{ERASED_BYTE, Region, Storage, StorageError};

const BUF_SIZE: usize = 64 * 1024; // 64 KiB

/// Default capacity of the new-image file.
pub const DEFAULT_MAX_OUTPUT_SIZE: u64 = 16 * 1024 * 1024; // 16 MiB

// ---------------------------------------------------------------------------
// FileStorage
// ---------------------------------------------------------------------------

/// A read-only input file with its length taken at open time.
struct Input {
    file: File,
    len: u64,
}

impl Input {
    fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

/// Storage over an old-image file, a patch file and a new-image file.
///
/// The old image and patch stay open for the lifetime of the storage. The
/// new image is written sequentially through a `BufWriter` that is flushed
/// whenever the engine requests it and when the storage is finished or
/// dropped. Writes and erases past `max_new_size` fail with `OutOfBounds`.
pub struct FileStorage {
    old: Input,
    patch: Input,
    new: BufWriter<File>,
    max_new_size: u64,
    /// Offset the writer will write to next.
    writer_pos: u64,
    old_pos: u64,
    patch_pos: u64,
    new_pos: u64,
    bytes_written: u64,
    #[cfg(feature = "file-io")]
    hasher: sha2::Sha256,
}

impl FileStorage {
    /// Open `old` and `patch` for reading and create (or truncate) `new`.
    ///
    /// The new image is capped at `DEFAULT_MAX_OUTPUT_SIZE`; see
    /// `with_max_new_size`.
    pub fn create(old: &Path, patch: &Path, new: &Path) -> io::Result<Self> {
        let old = Input::open(old)?;
        let patch = Input::open(patch)?;
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(new)?;
        Ok(Self {
            old,
            patch,
            new: BufWriter::with_capacity(BUF_SIZE, file),
            max_new_size: DEFAULT_MAX_OUTPUT_SIZE,
            writer_pos: 0,
            old_pos: 0,
            patch_pos: 0,
            new_pos: 0,
            bytes_written: 0,
            #[cfg(feature = "file-io")]
            hasher: sha2::Sha256::new(),
        })
    }

    /// Set the capacity of the new-image region.
    pub fn with_max_new_size(mut self, max_new_size: u64) -> Self {
        self.max_new_size = max_new_size;
        self
    }

    pub fn max_new_size(&self) -> u64 {
        self.max_new_size
    }

    /// Bytes passed to `write` so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush the new image and return the SHA-256 of everything written (if
    /// the `file-io` feature is enabled).
    ///
    /// The digest covers bytes in write order, which is file order for a
    /// bsdiff run.
    pub fn finish(mut self) -> io::Result<Option<[u8; 32]>> {
        self.new.flush()?;
        #[cfg(feature = "file-io")]
        return Ok(Some(self.hasher.finalize().into()));
        #[cfg(not(feature = "file-io"))]
        Ok(None)
    }

    fn position_writer(&mut self, offset: u64) -> io::Result<()> {
        if self.writer_pos != offset {
            // Seeking a BufWriter flushes it first.
            self.new.seek(SeekFrom::Start(offset))?;
            self.writer_pos = offset;
        }
        Ok(())
    }

    fn check_capacity(&self, offset: u64, len: u64) -> Result<(), StorageError> {
        if offset
            .checked_add(len)
            .is_none_or(|end| end > self.max_new_size)
        {
            return Err(StorageError::OutOfBounds {
                region: Region::New,
                offset,
                len: usize::try_from(len).unwrap_or(usize::MAX),
            });
        }
        Ok(())
    }
}

fn read_at(
    file: &mut File,
    available: u64,
    region: Region,
    offset: u64,
    buf: &mut [u8],
) -> Result<(), StorageError> {
    if offset
        .checked_add(buf.len() as u64)
        .is_none_or(|end| end > available)
    {
        return Err(StorageError::OutOfBounds {
            region,
            offset,
            len: buf.len(),
        });
    }
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)?;
    Ok(())
}

impl Storage for FileStorage {
    fn read(&mut self, region: Region, buf: &mut [u8]) -> Result<(), StorageError> {
        match region {
            Region::Old => read_at(&mut self.old.file, self.old.len, region, self.old_pos, buf),
            Region::Patch => read_at(
                &mut self.patch.file,
                self.patch.len,
                region,
                self.patch_pos,
                buf,
            ),
            Region::New => {
                self.new.flush()?;
                let offset = self.new_pos;
                let file = self.new.get_mut();
                let available = file.metadata()?.len();
                read_at(file, available, region, offset, buf)?;
                // The underlying file now sits just past the bytes read.
                self.writer_pos = offset + buf.len() as u64;
                Ok(())
            }
        }
    }

    fn write(&mut self, region: Region, buf: &[u8], flush: bool) -> Result<(), StorageError> {
        if region != Region::New {
            return Err(StorageError::ReadOnly(region));
        }
        self.check_capacity(self.new_pos, buf.len() as u64)?;
        self.position_writer(self.new_pos)?;
        self.new.write_all(buf)?;
        #[cfg(feature = "file-io")]
        self.hasher.update(buf);

        self.new_pos += buf.len() as u64;
        self.writer_pos = self.new_pos;
        self.bytes_written += buf.len() as u64;
        if flush {
            self.new.flush()?;
        }
        Ok(())
    }

    fn erase(&mut self, region: Region, offset: u64, len: u64) -> Result<(), StorageError> {
        if region != Region::New {
            return Err(StorageError::ReadOnly(region));
        }
        self.check_capacity(offset, len)?;
        self.position_writer(offset)?;
        let fill = [ERASED_BYTE; 4096];
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(fill.len() as u64) as usize;
            self.new.write_all(&fill[..n])?;
            remaining -= n as u64;
        }
        self.new.flush()?;
        self.writer_pos = offset + len;
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
// apply_file
// ---------------------------------------------------------------------------

/// Statistics returned by `apply_file()`.
#[derive(Debug, Clone)]
pub struct FileApplyStats {
    pub outcome: Outcome,
    /// Old image file size in bytes.
    pub old_size: u64,
    /// Patch file size in bytes.
    pub patch_size: u64,
    /// Bytes written to the output file.
    pub output_size: u64,
    /// SHA-256 of the output (if `file-io` feature is enabled and a patch
    /// was applied).
    pub output_sha256: Option<[u8; 32]>,
}

/// Error type for file-level operations.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("patch error: {0}")]
    Patch(#[from] PatchError),
}

/// Apply the patch in `patch_path` to `old_path`, writing the new image to
/// `output_path`, with the output capped at `DEFAULT_MAX_OUTPUT_SIZE`.
pub fn apply_file(
    old_path: &Path,
    patch_path: &Path,
    output_path: &Path,
    options: ApplyOptions,
) -> Result<FileApplyStats, IoError> {
    apply_file_with_limit(
        old_path,
        patch_path,
        output_path,
        options,
        DEFAULT_MAX_OUTPUT_SIZE,
    )
}

/// Like `apply_file()`, with an explicit capacity for the output file.
///
/// The output file is removed unless a patch was applied successfully, so
/// neither a `NoPatch` outcome nor a failed run leaves an image behind.
pub fn apply_file_with_limit(
    old_path: &Path,
    patch_path: &Path,
    output_path: &Path,
    options: ApplyOptions,
    max_output_size: u64,
) -> Result<FileApplyStats, IoError> {
    let old_size = std::fs::metadata(old_path)?.len();
    let patch_size = std::fs::metadata(patch_path)?.len();

    let storage = FileStorage::create(old_path, patch_path, output_path)?
        .with_max_new_size(max_output_size);
    let result = run_file(storage, options);

    let (outcome, output_size, digest) = match result {
        Ok(done) => done,
        Err(e) => {
            let _ = std::fs::remove_file(output_path);
            return Err(e);
        }
    };

    let output_sha256 = match outcome {
        Outcome::NoPatch => {
            std::fs::remove_file(output_path)?;
            None
        }
        Outcome::Applied(_) => digest,
    };

    Ok(FileApplyStats {
        outcome,
        old_size,
        patch_size,
        output_size,
        output_sha256,
    })
}

type FileRun = (Outcome, u64, Option<[u8; 32]>);

fn run_file(mut storage: FileStorage, options: ApplyOptions) -> Result<FileRun, IoError> {
    let outcome = engine::initialize(&mut storage, options)?.run()?;
    let output_size = storage.bytes_written();
    let digest = storage.finish()?;
    Ok((outcome, output_size, digest))
}

/// Lowercase hex rendering of a digest.
pub fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::patch::control::ControlTriple;
    use crate::patch::header::PatchHeader;

    fn write_temp_file(dir: &tempfile::TempDir, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    fn sample_patch() -> Vec<u8> {
        let mut patch = PatchHeader::new(6, 8, 4).encode().to_vec();
        let ctrl = ControlTriple {
            diff_len: 4,
            extra_len: 2,
            seek_delta: 0,
        };
        patch.extend_from_slice(&ctrl.encode());
        patch.extend_from_slice(&[1, 1, 1, 1]);
        patch.extend_from_slice(b"!!");
        patch
    }

    #[test]
    fn apply_file_writes_new_image() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", &[10, 20, 30, 40]);
        let patch = write_temp_file(&dir, "patch.bin", &sample_patch());
        let out = dir.path().join("new.bin");

        let stats = apply_file(&old, &patch, &out, ApplyOptions::default()).unwrap();
        assert!(matches!(stats.outcome, Outcome::Applied(_)));
        assert_eq!(stats.old_size, 4);
        assert_eq!(stats.output_size, 6);
        assert_eq!(std::fs::read(&out).unwrap(), [11, 21, 31, 41, b'!', b'!']);
    }

    #[cfg(feature = "file-io")]
    #[test]
    fn sha256_matches_output() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", &[10, 20, 30, 40]);
        let patch = write_temp_file(&dir, "patch.bin", &sample_patch());
        let out = dir.path().join("new.bin");

        let stats = apply_file(&old, &patch, &out, ApplyOptions::default()).unwrap();
        let expected: [u8; 32] = sha2::Sha256::digest(std::fs::read(&out).unwrap()).into();
        assert_eq!(stats.output_sha256, Some(expected));
    }

    #[test]
    fn no_patch_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", &[1, 2, 3]);
        let patch = write_temp_file(&dir, "patch.bin", &[0xFF; 32]);
        let out = dir.path().join("new.bin");

        let stats = apply_file(&old, &patch, &out, ApplyOptions::default()).unwrap();
        assert_eq!(stats.outcome, Outcome::NoPatch);
        assert_eq!(stats.output_sha256, None);
        assert!(!out.exists());
    }

    #[test]
    fn missing_old_image_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let patch = write_temp_file(&dir, "patch.bin", &sample_patch());
        let err = apply_file(
            &dir.path().join("absent.bin"),
            &patch,
            &dir.path().join("new.bin"),
            ApplyOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, IoError::Io(_)));
    }

    #[test]
    fn short_old_image_is_patch_error() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", &[10, 20]);
        let patch = write_temp_file(&dir, "patch.bin", &sample_patch());
        let err = apply_file(&old, &patch, &dir.path().join("new.bin"), ApplyOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            IoError::Patch(PatchError::Read {
                region: Region::Old,
                ..
            })
        ));
    }

    #[test]
    fn file_storage_reads_do_not_advance() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", b"abcdef");
        let patch = write_temp_file(&dir, "patch.bin", b"xyz");
        let mut storage = FileStorage::create(&old, &patch, &dir.path().join("new.bin")).unwrap();

        let mut buf = [0u8; 2];
        storage.seek(2, 1, 0).unwrap();
        storage.read(Region::Old, &mut buf).unwrap();
        assert_eq!(&buf, b"cd");
        storage.read(Region::Old, &mut buf).unwrap();
        assert_eq!(&buf, b"cd");
        storage.read(Region::Patch, &mut buf).unwrap();
        assert_eq!(&buf, b"yz");

        storage.seek(5, 0, 0).unwrap();
        assert!(matches!(
            storage.read(Region::Old, &mut buf),
            Err(StorageError::OutOfBounds {
                region: Region::Old,
                offset: 5,
                len: 2
            })
        ));
    }

    #[test]
    fn file_storage_erase_then_write() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", b"");
        let patch = write_temp_file(&dir, "patch.bin", b"");
        let out = dir.path().join("new.bin");
        let mut storage = FileStorage::create(&old, &patch, &out).unwrap();

        storage.erase(Region::New, 0, 4).unwrap();
        storage.write(Region::New, b"ab", true).unwrap();
        let mut back = [0u8; 2];
        storage.seek(0, 0, 0).unwrap();
        storage.read(Region::New, &mut back).unwrap();
        assert_eq!(&back, b"ab");
        assert!(matches!(
            storage.write(Region::Old, b"x", false),
            Err(StorageError::ReadOnly(Region::Old))
        ));
        storage.finish().unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), [b'a', b'b', ERASED_BYTE, ERASED_BYTE]);
    }

    #[test]
    fn oversized_header_does_not_drive_erase() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", &[0; 16]);
        let patch = write_temp_file(
            &dir,
            "patch.bin",
            &PatchHeader::new(64 * 1024 * 1024, 8, 4).encode(),
        );
        let out = dir.path().join("new.bin");
        let options = ApplyOptions {
            erase_target: true,
            ..ApplyOptions::default()
        };

        let err = apply_file_with_limit(&old, &patch, &out, options, 1024).unwrap_err();
        assert!(
            matches!(
                err,
                IoError::Patch(PatchError::Erase {
                    source: StorageError::OutOfBounds {
                        region: Region::New,
                        ..
                    },
                    ..
                })
            ),
            "{err}"
        );
        assert!(!out.exists());
    }

    #[test]
    fn failed_run_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", &[10, 20, 30, 40]);
        let mut body = sample_patch();
        body.truncate(body.len() - 1);
        let patch = write_temp_file(&dir, "patch.bin", &body);
        let out = dir.path().join("new.bin");

        let err = apply_file(&old, &patch, &out, ApplyOptions::default()).unwrap_err();
        assert!(matches!(err, IoError::Patch(PatchError::Read { .. })), "{err}");
        assert!(!out.exists());
    }

    #[test]
    fn writes_past_capacity_are_out_of_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", b"");
        let patch = write_temp_file(&dir, "patch.bin", b"");
        let mut storage = FileStorage::create(&old, &patch, &dir.path().join("new.bin"))
            .unwrap()
            .with_max_new_size(4);
        assert_eq!(storage.max_new_size(), 4);

        storage.write(Region::New, b"abc", false).unwrap();
        assert!(matches!(
            storage.write(Region::New, b"de", true),
            Err(StorageError::OutOfBounds {
                region: Region::New,
                offset: 3,
                len: 2
            })
        ));
        assert!(storage.erase(Region::New, 0, 5).is_err());
        assert_eq!(storage.bytes_written(), 3);
    }

    #[test]
    fn new_region_read_back_then_continue_writing() {
        let dir = tempfile::tempdir().unwrap();
        let old = write_temp_file(&dir, "old.bin", b"");
        let patch = write_temp_file(&dir, "patch.bin", b"");
        let out = dir.path().join("new.bin");
        let mut storage = FileStorage::create(&old, &patch, &out).unwrap();

        storage.write(Region::New, b"abcd", false).unwrap();
        let mut back = [0u8; 2];
        storage.seek(0, 0, 1).unwrap();
        storage.read(Region::New, &mut back).unwrap();
        assert_eq!(&back, b"bc");

        storage.seek(0, 0, 4).unwrap();
        storage.write(Region::New, b"ef", true).unwrap();
        storage.finish().unwrap();
        assert_eq!(std::fs::read(&out).unwrap(), b"abcdef");
    }

    #[test]
    fn hex_rendering() {
        assert_eq!(to_hex(&[0x00, 0xAB, 0x7f]), "00ab7f");
    }
}
