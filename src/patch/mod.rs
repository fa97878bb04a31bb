// bsdiff patch format.
//
// - `header`  : 18-byte patch header and its validation against storage
// - `control` : sign-magnitude control integers and control triples
// - `bspatch` : the applier that interprets control triples

pub mod bspatch;
pub mod control;
pub mod header;

// Re-export key types for convenience.
pub use bspatch::Bspatch;
pub use control::{ControlTriple, decode_int64, encode_int64};
pub use header::{HEADER_LEN, PATCH_MAGIC, PatchHeader, SizeWidth};
