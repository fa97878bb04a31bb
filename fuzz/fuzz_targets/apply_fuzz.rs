#![no_main]
use libfuzzer_sys::fuzz_target;
use oxipatch::engine::{self, ApplyOptions};
use oxipatch::patch::header::PatchHeader;
use oxipatch::storage::MemoryStorage;

const MAX_TARGET: usize = 1 << 16;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes as the patch region. The engine must never panic,
    // only return errors.
    let mut storage = MemoryStorage::new(Vec::new(), data.to_vec(), MAX_TARGET);
    if let Ok(mut ctx) = engine::initialize(&mut storage, ApplyOptions::default()) {
        let _ = ctx.run();
    }

    // Behind a valid header, so the control stream itself gets exercised.
    if data.len() < 4 {
        return;
    }
    let target_size = u16::from_le_bytes([data[0], data[1]]) as u64;
    let split = (data[2] as usize).min(data.len() - 3);
    let (old, body) = data[3..].split_at(split);

    let mut patch = PatchHeader::new(target_size, 8, 4).encode().to_vec();
    patch.extend_from_slice(body);
    let mut storage = MemoryStorage::new(old.to_vec(), patch, MAX_TARGET);
    let options = ApplyOptions {
        chunk_size: 64,
        step_size: 16,
        ..ApplyOptions::default()
    };
    if let Ok(mut ctx) = engine::initialize(&mut storage, options) {
        let _ = ctx.run();
        assert!(ctx.cursors().new_pos <= target_size);
    }
});
