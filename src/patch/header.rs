// Patch header validation.
//
// Layout (18 bytes):
//   0..8   magic "BSDIFFHS"
//   8..16  target image size
//   16     decoder window parameter (log2 of window size)
//   17     decoder lookahead parameter (log2 of lookahead size)

use log::{debug, info};

use crate::decompress::decoder::DecoderParams;
use crate::engine::OffsetCursors;
use crate::error::PatchError;
use crate::patch::control::{CONTROL_INT_LEN, decode_int64, encode_int64};
use crate::storage::{Region, Storage};

pub const PATCH_MAGIC: [u8; 8] = *b"BSDIFFHS";

/// Total encoded header length; the control stream starts right after it.
pub const HEADER_LEN: usize = 18;

const SIZE_OFFSET: usize = 8;
const WINDOW_OFFSET: usize = 16;
const LOOKAHEAD_OFFSET: usize = 17;

pub const MIN_WINDOW_SZ2: u8 = 4;
pub const MAX_WINDOW_SZ2: u8 = 15;
pub const MIN_LOOKAHEAD_SZ2: u8 = 3;

// ---------------------------------------------------------------------------
// Size field width
// ---------------------------------------------------------------------------

/// How the 8-byte target size field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SizeWidth {
    /// Decode all 8 bytes as a control integer.
    #[default]
    Full,
    /// Decode only bytes 8..10 as a little-endian `u16`, as deployed
    /// bootloaders do. Images of 64 KiB or more wrap.
    Legacy16,
}

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Parsed patch header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchHeader {
    pub magic: [u8; 8],
    pub target_size: u64,
    pub window_sz2: u8,
    pub lookahead_sz2: u8,
}

impl PatchHeader {
    pub fn new(target_size: u64, window_sz2: u8, lookahead_sz2: u8) -> Self {
        Self {
            magic: PATCH_MAGIC,
            target_size,
            window_sz2,
            lookahead_sz2,
        }
    }

    /// Decoder tuning carried by the header.
    pub fn decoder_params(&self) -> DecoderParams {
        DecoderParams {
            window_sz2: self.window_sz2,
            lookahead_sz2: self.lookahead_sz2,
        }
    }

    /// Encode the header; the size field is written as a control integer.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..SIZE_OFFSET].copy_from_slice(&self.magic);
        let size = i64::try_from(self.target_size).unwrap_or(i64::MAX);
        out[SIZE_OFFSET..SIZE_OFFSET + CONTROL_INT_LEN].copy_from_slice(&encode_int64(size));
        out[WINDOW_OFFSET] = self.window_sz2;
        out[LOOKAHEAD_OFFSET] = self.lookahead_sz2;
        out
    }

    /// Parse an encoded header without touching storage.
    pub fn parse(buf: &[u8; HEADER_LEN], width: SizeWidth) -> Result<Self, PatchError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[..SIZE_OFFSET]);
        if magic != PATCH_MAGIC {
            return Err(PatchError::MagicMismatch { found: magic });
        }

        let target_size = match width {
            SizeWidth::Legacy16 => {
                u64::from(u16::from_le_bytes([buf[SIZE_OFFSET], buf[SIZE_OFFSET + 1]]))
            }
            SizeWidth::Full => {
                let mut field = [0u8; CONTROL_INT_LEN];
                field.copy_from_slice(&buf[SIZE_OFFSET..SIZE_OFFSET + CONTROL_INT_LEN]);
                let size = decode_int64(&field);
                u64::try_from(size).map_err(|_| {
                    PatchError::InvalidHeader(format!("negative target size {size}"))
                })?
            }
        };

        let window_sz2 = buf[WINDOW_OFFSET];
        let lookahead_sz2 = buf[LOOKAHEAD_OFFSET];
        if !(MIN_WINDOW_SZ2..=MAX_WINDOW_SZ2).contains(&window_sz2) {
            return Err(PatchError::InvalidHeader(format!(
                "window_sz2 {window_sz2} outside {MIN_WINDOW_SZ2}..={MAX_WINDOW_SZ2}"
            )));
        }
        if !(MIN_LOOKAHEAD_SZ2..window_sz2).contains(&lookahead_sz2) {
            return Err(PatchError::InvalidHeader(format!(
                "lookahead_sz2 {lookahead_sz2} outside {MIN_LOOKAHEAD_SZ2}..{window_sz2}"
            )));
        }

        Ok(Self {
            magic,
            target_size,
            window_sz2,
            lookahead_sz2,
        })
    }
}

// ---------------------------------------------------------------------------
// Validation against storage
// ---------------------------------------------------------------------------

/// Read and validate the header at the start of the patch region.
///
/// On success the patch cursor is moved past the header and the storage is
/// re-pointed, so control decoding starts at the right byte. No image region
/// is touched.
pub fn validate<S: Storage + ?Sized>(
    storage: &mut S,
    cursors: &mut OffsetCursors,
    width: SizeWidth,
) -> Result<PatchHeader, PatchError> {
    storage
        .seek(cursors.old_pos, 0, cursors.new_pos)
        .map_err(PatchError::seek)?;

    let mut buf = [0u8; HEADER_LEN];
    storage
        .read(Region::Patch, &mut buf)
        .map_err(PatchError::read(Region::Patch))?;

    let header = match PatchHeader::parse(&buf, width) {
        Ok(h) => h,
        Err(e @ PatchError::MagicMismatch { .. }) => {
            info!("no valid patch in patch region (magic mismatch)");
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    cursors.patch_pos = HEADER_LEN as u64;
    storage
        .seek(cursors.old_pos, cursors.patch_pos, cursors.new_pos)
        .map_err(PatchError::seek)?;

    debug!(
        "window_sz2 = {}, lookahead_sz2 = {}",
        header.window_sz2, header.lookahead_sz2
    );
    info!(
        "valid patch detected, target size = {} bytes",
        header.target_size
    );
    Ok(header)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
