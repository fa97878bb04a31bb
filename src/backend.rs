// Patch algorithm backends.
//
// A run validates the header, then hands the positioned storage to the
// backend registered for the configured algorithm. Only bsdiff ships with
// the crate; other algorithms plug in through `PatchBackend` without
// touching the run context.
//
// Built-in IDs:
//   1 = bsdiff (control triples + diff/extra blocks)

use std::fmt;

use crate::decompress::decoder::DecoderFactory;
use crate::decompress::session::DecompressionSession;
use crate::engine::{ApplyOptions, ApplyStats, OffsetCursors};
use crate::error::PatchError;
use crate::patch::bspatch::Bspatch;
use crate::patch::header::PatchHeader;
use crate::storage::Storage;

// ---------------------------------------------------------------------------
// Algorithm identifier
// ---------------------------------------------------------------------------

/// Identifier of a patch algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlgorithmId(pub u8);

impl AlgorithmId {
    pub const BSDIFF: Self = Self(1);

    /// Short name of a built-in algorithm.
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::BSDIFF => Some("bsdiff"),
            _ => None,
        }
    }
}

impl Default for AlgorithmId {
    fn default() -> Self {
        Self::BSDIFF
    }
}

impl fmt::Display for AlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name} ({})", self.0),
            None => write!(f, "#{}", self.0),
        }
    }
}

// ---------------------------------------------------------------------------
// PatchBackend trait
// ---------------------------------------------------------------------------

/// Everything a backend needs for one run.
///
/// The header has already been validated; `cursors.patch_pos` points at the
/// first byte after it and the storage has been re-pointed accordingly.
pub struct PatchRun<'a> {
    pub storage: &'a mut dyn Storage,
    pub cursors: &'a mut OffsetCursors,
    pub header: &'a PatchHeader,
    pub options: &'a ApplyOptions,
    pub decoders: &'a dyn DecoderFactory,
}

/// A pluggable patch algorithm.
///
/// # Example
///
/// ```
/// use oxipatch::backend::{AlgorithmId, PatchBackend, PatchRun};
/// use oxipatch::engine::ApplyStats;
/// use oxipatch::error::PatchError;
///
/// struct Rejecting;
///
/// impl PatchBackend for Rejecting {
///     fn id(&self) -> AlgorithmId {
///         AlgorithmId(42)
///     }
///     fn patch(&self, _run: &mut PatchRun<'_>) -> Result<ApplyStats, PatchError> {
///         Err(PatchError::Integrity("not supported on this device".into()))
///     }
/// }
/// ```
pub trait PatchBackend: Send + Sync {
    /// Algorithm handled by this backend.
    fn id(&self) -> AlgorithmId;

    /// Human-readable name, used in logs.
    fn name(&self) -> &str {
        self.id().name().unwrap_or("custom")
    }

    /// Reconstruct the new image from the patch stream.
    fn patch(&self, run: &mut PatchRun<'_>) -> Result<ApplyStats, PatchError>;
}

/// The bsdiff interpreter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BsdiffBackend;

impl PatchBackend for BsdiffBackend {
    fn id(&self) -> AlgorithmId {
        AlgorithmId::BSDIFF
    }

    fn patch(&self, run: &mut PatchRun<'_>) -> Result<ApplyStats, PatchError> {
        let mut bspatch = Bspatch::new(run.options)?;
        let decoder = run.decoders.create(&run.header.decoder_params())?;
        let mut session = DecompressionSession::new(decoder);
        run.cursors.target_size = run.header.target_size;
        bspatch.apply(&mut *run.storage, &mut session, run.cursors)
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Backends available to a run, keyed by algorithm ID.
pub struct BackendRegistry {
    backends: Vec<Box<dyn PatchBackend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(BsdiffBackend));
        registry
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

impl BackendRegistry {
    /// Registry with no backends at all.
    pub fn empty() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Add a backend, replacing any existing one with the same ID.
    ///
    /// Returns the replaced backend, if any.
    pub fn register(&mut self, backend: Box<dyn PatchBackend>) -> Option<Box<dyn PatchBackend>> {
        let id = backend.id();
        match self.backends.iter_mut().find(|b| b.id() == id) {
            Some(slot) => Some(std::mem::replace(slot, backend)),
            None => {
                self.backends.push(backend);
                None
            }
        }
    }

    /// Look up the backend for `id`.
    pub fn get(&self, id: AlgorithmId) -> Result<&dyn PatchBackend, PatchError> {
        self.backends
            .iter()
            .find(|b| b.id() == id)
            .map(|b| b.as_ref())
            .ok_or(PatchError::UnsupportedAlgorithm(id))
    }

    /// IDs of all registered backends, in registration order.
    pub fn ids(&self) -> impl Iterator<Item = AlgorithmId> + '_ {
        self.backends.iter().map(|b| b.id())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
