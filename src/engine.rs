// Patch run context: ties header validation to the registered backends.
//
// Provides the high-level entry points used by bootloaders and tools:
//   - `initialize` validates options and positions the storage at the start
//   - `PatchContext::run` detects a patch and dispatches to its backend
//   - `apply_and_finalize` runs both and marks the new image bootable

use log::{error, info};

use crate::backend::{AlgorithmId, BackendRegistry, PatchRun};
use crate::decompress::decoder::{DecoderFactory, StoredFactory};
use crate::error::PatchError;
use crate::patch::control::CONTROL_TRIPLE_LEN;
use crate::patch::header::{self, PatchHeader, SizeWidth};
use crate::storage::{Region, Storage};

/// Default capacity of the shared decode buffer.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;
/// Default bytes combined and written per storage call.
pub const DEFAULT_STEP_SIZE: usize = 256;
/// Largest accepted decode buffer.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Cursors
// ---------------------------------------------------------------------------

/// Logical positions of a run in each region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OffsetCursors {
    pub old_pos: u64,
    pub new_pos: u64,
    pub patch_pos: u64,
    /// Declared size of the new image; zero until the header is validated.
    pub target_size: u64,
}

// ---------------------------------------------------------------------------
// Apply options
// ---------------------------------------------------------------------------

/// Configuration for patch application.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Capacity of the shared decode buffer. Must hold one control group.
    pub chunk_size: usize,
    /// Bytes combined and written per storage call.
    pub step_size: usize,
    /// How the header's size field is decoded.
    pub size_width: SizeWidth,
    /// Erase the target range of the new-image region before writing.
    pub erase_target: bool,
    /// Backend to dispatch to after the header is validated.
    pub algorithm: AlgorithmId,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            step_size: DEFAULT_STEP_SIZE,
            size_width: SizeWidth::Full,
            erase_target: false,
            algorithm: AlgorithmId::BSDIFF,
        }
    }
}

impl ApplyOptions {
    pub fn validate(&self) -> Result<(), PatchError> {
        if !(CONTROL_TRIPLE_LEN..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(PatchError::InvalidOptions(format!(
                "chunk size {} outside {CONTROL_TRIPLE_LEN}..={MAX_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if !(1..=self.chunk_size).contains(&self.step_size) {
            return Err(PatchError::InvalidOptions(format!(
                "step size {} outside 1..={}",
                self.step_size, self.chunk_size
            )));
        }
        Ok(())
    }

    /// Working memory held by the applier for these options.
    pub fn buffer_footprint(&self) -> usize {
        self.chunk_size + 2 * self.step_size
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Counters collected by a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub control_triples: u64,
    pub diff_bytes: u64,
    pub extra_bytes: u64,
    /// Compressed bytes consumed after the header.
    pub patch_bytes: u64,
    pub target_size: u64,
}

/// What a run found in the patch region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The patch region holds no valid patch.
    NoPatch,
    Applied(ApplyStats),
}

impl Outcome {
    pub fn stats(&self) -> Option<&ApplyStats> {
        match self {
            Self::NoPatch => None,
            Self::Applied(stats) => Some(stats),
        }
    }
}

/// Marks a freshly written image as the one to boot.
pub trait ImageFinalizer {
    fn mark_bootable(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<F> ImageFinalizer for F
where
    F: FnMut() -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
{
    fn mark_bootable(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self()
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// State of one patch run over a storage adapter.
pub struct PatchContext<'s> {
    storage: &'s mut dyn Storage,
    cursors: OffsetCursors,
    options: ApplyOptions,
    decoders: Box<dyn DecoderFactory>,
    registry: BackendRegistry,
    header: Option<PatchHeader>,
}

/// Validate `options`, zero the cursors and point the storage at the start of
/// every region.
pub fn initialize(
    storage: &mut dyn Storage,
    options: ApplyOptions,
) -> Result<PatchContext<'_>, PatchError> {
    options.validate()?;
    storage.seek(0, 0, 0).map_err(PatchError::seek)?;
    Ok(PatchContext {
        storage,
        cursors: OffsetCursors::default(),
        options,
        decoders: Box::new(StoredFactory),
        registry: BackendRegistry::default(),
        header: None,
    })
}

impl<'s> PatchContext<'s> {
    /// Use `decoders` to build the stream decoder instead of the stored one.
    pub fn with_decoders(mut self, decoders: impl DecoderFactory + 'static) -> Self {
        self.decoders = Box::new(decoders);
        self
    }

    pub fn with_registry(mut self, registry: BackendRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> &ApplyOptions {
        &self.options
    }

    pub fn cursors(&self) -> &OffsetCursors {
        &self.cursors
    }

    /// Header found by the last `run`, if it got that far.
    pub fn header(&self) -> Option<&PatchHeader> {
        self.header.as_ref()
    }

    /// Detect a patch and, if one is present, apply it.
    ///
    /// A magic mismatch is not an error: it yields `Outcome::NoPatch` with no
    /// writes. Any other failure is fatal and may leave the new image
    /// partially written.
    pub fn run(&mut self) -> Result<Outcome, PatchError> {
        let header = match header::validate(
            &mut *self.storage,
            &mut self.cursors,
            self.options.size_width,
        ) {
            Ok(h) => h,
            Err(e) if e.is_no_patch() => return Ok(Outcome::NoPatch),
            Err(e) => {
                error!("patch header rejected: {e}");
                return Err(e);
            }
        };
        self.header = Some(header);
        self.cursors.target_size = header.target_size;

        let backend = self.registry.get(self.options.algorithm).inspect_err(|e| {
            error!("{e}");
        })?;

        if self.options.erase_target {
            self.storage
                .erase(Region::New, 0, header.target_size)
                .map_err(|source| PatchError::Erase {
                    region: Region::New,
                    source,
                })?;
        }

        let mut job = PatchRun {
            storage: &mut *self.storage,
            cursors: &mut self.cursors,
            header: &header,
            options: &self.options,
            decoders: self.decoders.as_ref(),
        };
        let stats = backend.patch(&mut job).inspect_err(|e| {
            error!("{} patch failed: {e}", backend.name());
        })?;

        info!(
            "patch applied: {} bytes from {} control triples ({} patch bytes)",
            stats.target_size, stats.control_triples, stats.patch_bytes
        );
        Ok(Outcome::Applied(stats))
    }
}

/// Apply a pending patch and, if one was applied, mark the new image bootable.
pub fn apply_and_finalize(
    storage: &mut dyn Storage,
    options: ApplyOptions,
    finalizer: &mut dyn ImageFinalizer,
) -> Result<Outcome, PatchError> {
    let mut ctx = initialize(storage, options)?;
    let outcome = ctx.run()?;
    match outcome {
        Outcome::NoPatch => info!("no patch pending, keeping current image"),
        Outcome::Applied(_) => {
            finalizer.mark_bootable().map_err(|e| {
                error!("marking new image bootable failed: {e}");
                PatchError::Finalize(e.to_string())
            })?;
            info!("new image marked bootable");
        }
    }
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
