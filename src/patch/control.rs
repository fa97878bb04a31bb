// bsdiff control integers and control triples.
//
// Integers are 8 bytes, little-endian magnitude in the low 63 bits, with
// bit 7 of the last byte acting as a sign flag over the whole magnitude.
// This is sign-magnitude, not two's complement.

/// Encoded width of one control integer.
pub const CONTROL_INT_LEN: usize = 8;

/// Encoded width of one `(diff_len, extra_len, seek_delta)` group.
pub const CONTROL_TRIPLE_LEN: usize = 3 * CONTROL_INT_LEN;

const SIGN_BIT: u8 = 0x80;

// ---------------------------------------------------------------------------
// Integer codec
// ---------------------------------------------------------------------------

/// Decode a sign-magnitude control integer.
///
/// Never fails: whatever the bit pattern encodes is returned. A set sign bit
/// over a zero magnitude yields 0.
#[inline]
pub fn decode_int64(buf: &[u8; CONTROL_INT_LEN]) -> i64 {
    let mut y = i64::from(buf[7] & !SIGN_BIT);
    for &b in buf[..7].iter().rev() {
        y = y * 256 + i64::from(b);
    }
    if buf[7] & SIGN_BIT != 0 { -y } else { y }
}

/// Encode a control integer in the same sign-magnitude layout.
///
/// `i64::MIN` has no sign-magnitude representation; it is encoded as
/// `-i64::MAX`.
#[inline]
pub fn encode_int64(value: i64) -> [u8; CONTROL_INT_LEN] {
    let mut out = value.unsigned_abs().min(i64::MAX as u64).to_le_bytes();
    if value < 0 {
        out[7] |= SIGN_BIT;
    }
    out
}

// ---------------------------------------------------------------------------
// Control triple
// ---------------------------------------------------------------------------

/// One unit of patch application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlTriple {
    /// Bytes reconstructed by adding decoded delta bytes to old-image bytes.
    pub diff_len: i64,
    /// Literal bytes copied straight to the new image.
    pub extra_len: i64,
    /// Signed adjustment of the old-image cursor after both phases.
    pub seek_delta: i64,
}

impl ControlTriple {
    /// Decode three consecutive control integers.
    pub fn decode(buf: &[u8; CONTROL_TRIPLE_LEN]) -> Self {
        let field = |i: usize| {
            let mut b = [0u8; CONTROL_INT_LEN];
            b.copy_from_slice(&buf[i * CONTROL_INT_LEN..(i + 1) * CONTROL_INT_LEN]);
            decode_int64(&b)
        };
        Self {
            diff_len: field(0),
            extra_len: field(1),
            seek_delta: field(2),
        }
    }

    pub fn encode(&self) -> [u8; CONTROL_TRIPLE_LEN] {
        let mut out = [0u8; CONTROL_TRIPLE_LEN];
        for (i, v) in [self.diff_len, self.extra_len, self.seek_delta]
            .into_iter()
            .enumerate()
        {
            out[i * CONTROL_INT_LEN..(i + 1) * CONTROL_INT_LEN].copy_from_slice(&encode_int64(v));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
