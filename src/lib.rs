//! Oxipatch: bounded-memory bsdiff patch application for firmware images.
//!
//! The crate provides:
//! - A streaming bsdiff interpreter whose working memory is fixed by
//!   `ApplyOptions`, independent of image size (`patch`)
//! - A pluggable streaming decompressor contract (`decompress`)
//! - A storage abstraction over old image, new image and patch (`storage`)
//! - The run context and boot-finalization entry points (`engine`)
//! - File-backed storage and helpers (`io`)
//! - An optional CLI (`cli` feature)
//!
//! # Quick Start
//!
//! ```no_run
//! use oxipatch::engine::{self, ApplyOptions, Outcome};
//! use oxipatch::storage::MemoryStorage;
//!
//! let old = std::fs::read("old.bin").unwrap();
//! let patch = std::fs::read("update.patch").unwrap();
//! let mut storage = MemoryStorage::new(old, patch, 1 << 20);
//!
//! let mut ctx = engine::initialize(&mut storage, ApplyOptions::default()).unwrap();
//! match ctx.run().unwrap() {
//!     Outcome::NoPatch => println!("nothing to do"),
//!     Outcome::Applied(stats) => println!("wrote {} bytes", stats.target_size),
//! }
//! ```

pub mod backend;
pub mod decompress;
pub mod engine;
pub mod error;
pub mod io;
pub mod patch;
pub mod storage;

#[cfg(feature = "cli")]
pub mod cli;

pub use engine::{ApplyOptions, ApplyStats, Outcome, apply_and_finalize, initialize};
pub use error::PatchError;
pub use storage::{MemoryStorage, Region, Storage, StorageError};
