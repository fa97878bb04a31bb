#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipatch::engine::{self, ApplyOptions, Outcome};
use oxipatch::patch::control::ControlTriple;
use oxipatch::patch::header::PatchHeader;
use oxipatch::storage::MemoryStorage;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First byte picks the diff/extra split.
    let flags = data[0];
    let payload = &data[1..];
    let split = payload.len() / 2;
    let (old, new) = payload.split_at(split);

    // Diff against the shared prefix, literal for the rest.
    let diff_len = (flags as usize % (split + 1)).min(new.len());
    let diff: Vec<u8> = new[..diff_len]
        .iter()
        .zip(old)
        .map(|(n, o)| n.wrapping_sub(*o))
        .collect();
    let extra = &new[diff_len..];

    let mut patch = PatchHeader::new(new.len() as u64, 8, 4).encode().to_vec();
    if !new.is_empty() {
        let ctrl = ControlTriple {
            diff_len: diff_len as i64,
            extra_len: extra.len() as i64,
            seek_delta: 0,
        };
        patch.extend_from_slice(&ctrl.encode());
        patch.extend_from_slice(&diff);
        patch.extend_from_slice(extra);
    }

    let mut storage = MemoryStorage::new(old.to_vec(), patch, new.len());
    let mut ctx = engine::initialize(&mut storage, ApplyOptions::default()).unwrap();
    let outcome = ctx.run().unwrap();
    assert!(matches!(outcome, Outcome::Applied(_)));
    drop(ctx);
    assert_eq!(storage.new_image(), new);
});
