// Shared helpers for building stored (uncompressed) bsdiff patches.
//
// With the stored decoder the patch stream is the header followed by
// `ctrl || diff || extra` for every control triple, so tests can produce
// valid patches without a bsdiff encoder.

#![allow(dead_code)]

use oxipatch::patch::control::ControlTriple;
use oxipatch::patch::header::PatchHeader;

/// One planned control triple: bytes diffed against the old image, literal
/// bytes, and the old-image offset to continue from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub diff_len: usize,
    pub extra_len: usize,
    pub next_old: usize,
}

/// Encode a patch turning `old` into `new` following `plan`.
///
/// The plan must cover `new` exactly and keep every diff run inside `old`.
pub fn build_patch(old: &[u8], new: &[u8], plan: &[Block]) -> Vec<u8> {
    let mut out = PatchHeader::new(new.len() as u64, 8, 4).encode().to_vec();
    let mut old_pos = 0usize;
    let mut new_pos = 0usize;

    for block in plan {
        let after_diff = old_pos + block.diff_len;
        let ctrl = ControlTriple {
            diff_len: block.diff_len as i64,
            extra_len: block.extra_len as i64,
            seek_delta: block.next_old as i64 - after_diff as i64,
        };
        out.extend_from_slice(&ctrl.encode());

        for (n, o) in new[new_pos..new_pos + block.diff_len]
            .iter()
            .zip(&old[old_pos..after_diff])
        {
            out.push(n.wrapping_sub(*o));
        }
        new_pos += block.diff_len;

        out.extend_from_slice(&new[new_pos..new_pos + block.extra_len]);
        new_pos += block.extra_len;
        old_pos = block.next_old;
    }
    assert_eq!(new_pos, new.len(), "plan does not cover the new image");
    out
}

/// Derive a valid plan from a list of arbitrary numbers.
pub fn plan_from_choices(old_len: usize, new_len: usize, choices: &[u16]) -> Vec<Block> {
    let mut i = 0usize;
    let mut next = || {
        let v = if choices.is_empty() {
            1
        } else {
            usize::from(choices[i % choices.len()])
        };
        i += 1;
        v
    };

    let mut plan = Vec::new();
    let mut old_pos = 0usize;
    let mut new_pos = 0usize;
    while new_pos < new_len {
        let remaining = new_len - new_pos;
        let max_diff = remaining.min(old_len - old_pos);
        let diff_len = next() % (max_diff + 1);
        let rest = remaining - diff_len;
        let mut extra_len = next() % (rest + 1);
        if diff_len + extra_len == 0 {
            extra_len = 1;
        }
        let next_old = next() % (old_len + 1);

        plan.push(Block {
            diff_len,
            extra_len,
            next_old,
        });
        new_pos += diff_len + extra_len;
        old_pos = next_old;
    }
    plan
}

/// Single triple diffing the common prefix, then literal bytes.
pub fn simple_plan(old_len: usize, new_len: usize) -> Vec<Block> {
    if new_len == 0 {
        return Vec::new();
    }
    let diff_len = old_len.min(new_len);
    vec![Block {
        diff_len,
        extra_len: new_len - diff_len,
        next_old: 0,
    }]
}
