// Error types shared by the header validator, decompressor adapter, patch
// applier and run context.
//
// Every error is fatal to the current run. `MagicMismatch` is the only kind
// that callers treat as "nothing to do" rather than a failure.

use thiserror::Error;

use crate::backend::AlgorithmId;
use crate::decompress::decoder::SinkError;
use crate::storage::{Region, StorageError};

/// Error raised while validating or applying a patch.
#[derive(Debug, Error)]
pub enum PatchError {
    /// The patch region does not start with the expected magic.
    #[error("no patch present: magic mismatch (found {found:02X?})")]
    MagicMismatch { found: [u8; 8] },

    #[error("read failed in {region} region: {source}")]
    Read {
        region: Region,
        #[source]
        source: StorageError,
    },

    #[error("write failed in new image: {source}")]
    Write {
        #[source]
        source: StorageError,
    },

    #[error("erase failed in {region} region: {source}")]
    Erase {
        region: Region,
        #[source]
        source: StorageError,
    },

    #[error("seek failed: {source}")]
    Seek {
        #[source]
        source: StorageError,
    },

    /// The streaming decoder refused compressed input.
    #[error("decompressor sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("decompression failed: {0}")]
    Decode(String),

    /// A control triple violated the bounds of the run.
    #[error("patch integrity error: {0}")]
    Integrity(String),

    #[error("no backend registered for algorithm {0}")]
    UnsupportedAlgorithm(AlgorithmId),

    #[error("invalid patch header: {0}")]
    InvalidHeader(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("finalizing new image failed: {0}")]
    Finalize(String),
}

impl PatchError {
    /// True when the error only means "no update pending".
    pub fn is_no_patch(&self) -> bool {
        matches!(self, Self::MagicMismatch { .. })
    }

    pub(crate) fn read(region: Region) -> impl FnOnce(StorageError) -> Self {
        move |source| Self::Read { region, source }
    }

    pub(crate) fn write(source: StorageError) -> Self {
        Self::Write { source }
    }

    pub(crate) fn seek(source: StorageError) -> Self {
        Self::Seek { source }
    }
}
