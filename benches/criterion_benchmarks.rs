use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use oxipatch::engine::{self, ApplyOptions};
use oxipatch::patch::control::ControlTriple;
use oxipatch::patch::header::PatchHeader;
use oxipatch::storage::MemoryStorage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn gen_data(size: usize, seed: u64) -> Vec<u8> {
    let mut out = vec![0u8; size];
    StdRng::seed_from_u64(seed).fill(&mut out[..]);
    out
}

fn mutate(base: &[u8], stride: usize) -> Vec<u8> {
    let mut out = base.to_vec();
    for i in (0..out.len()).step_by(stride.max(1)) {
        out[i] = out[i].wrapping_add(1);
    }
    out
}

/// Stored patch of `blocks` diff runs, each followed by a short literal.
fn make_patch(old: &[u8], new: &[u8], blocks: usize) -> Vec<u8> {
    let mut out = PatchHeader::new(new.len() as u64, 8, 4).encode().to_vec();
    let per_block = new.len() / blocks;
    let mut pos = 0usize;
    for i in 0..blocks {
        let end = if i + 1 == blocks { new.len() } else { pos + per_block };
        let extra_len = ((end - pos) / 64).min(16);
        let diff_len = end - pos - extra_len;
        let ctrl = ControlTriple {
            diff_len: diff_len as i64,
            extra_len: extra_len as i64,
            seek_delta: extra_len as i64,
        };
        out.extend_from_slice(&ctrl.encode());
        out.extend(
            new[pos..pos + diff_len]
                .iter()
                .zip(&old[pos..pos + diff_len])
                .map(|(n, o)| n.wrapping_sub(*o)),
        );
        out.extend_from_slice(&new[pos + diff_len..end]);
        pos = end;
    }
    out
}

fn apply(old: &[u8], patch: &[u8], target_len: usize, options: ApplyOptions) -> MemoryStorage {
    let mut storage = MemoryStorage::new(old.to_vec(), patch.to_vec(), target_len);
    engine::initialize(&mut storage, options)
        .and_then(|mut ctx| ctx.run())
        .unwrap();
    storage
}

fn bench_apply_speed(c: &mut Criterion) {
    let mut g = c.benchmark_group("apply_speed_mb_s");
    for size in [64 * 1024usize, 1024 * 1024, 8 * 1024 * 1024] {
        let old = gen_data(size, 1);
        let new = mutate(&old, 1024);
        let patch = make_patch(&old, &new, 64);
        g.throughput(Throughput::Bytes(size as u64));
        g.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let out = apply(
                    black_box(&old),
                    black_box(&patch),
                    new.len(),
                    ApplyOptions::default(),
                );
                black_box(out.write_count());
            });
        });
    }
    g.finish();
}

fn bench_chunk_size(c: &mut Criterion) {
    let mut g = c.benchmark_group("apply_vs_chunk_size");
    let old = gen_data(1024 * 1024, 2);
    let new = mutate(&old, 2048);
    let patch = make_patch(&old, &new, 64);
    g.throughput(Throughput::Bytes(new.len() as u64));
    for chunk_size in [64usize, 512, 2048, 16 * 1024, 64 * 1024] {
        let options = ApplyOptions {
            chunk_size,
            step_size: chunk_size.min(1024),
            ..ApplyOptions::default()
        };
        g.bench_with_input(BenchmarkId::from_parameter(chunk_size), &chunk_size, |b, _| {
            b.iter(|| {
                let out = apply(&old, &patch, new.len(), options.clone());
                black_box(out.flush_count());
            });
        });
    }
    g.finish();
}

fn bench_step_size(c: &mut Criterion) {
    let mut g = c.benchmark_group("apply_vs_step_size");
    let old = gen_data(1024 * 1024, 3);
    let new = mutate(&old, 4096);
    let patch = make_patch(&old, &new, 16);
    g.throughput(Throughput::Bytes(new.len() as u64));
    for step_size in [16usize, 64, 256, 1024, 2048] {
        let options = ApplyOptions {
            step_size,
            ..ApplyOptions::default()
        };
        g.bench_with_input(BenchmarkId::from_parameter(step_size), &step_size, |b, _| {
            b.iter(|| {
                let out = apply(&old, &patch, new.len(), options.clone());
                black_box(out.write_count());
            });
        });
    }
    g.finish();
}

fn bench_control_heavy(c: &mut Criterion) {
    let mut g = c.benchmark_group("apply_vs_triple_count");
    let old = gen_data(256 * 1024, 4);
    let new = mutate(&old, 512);
    for blocks in [1usize, 64, 1024, 8192] {
        let patch = make_patch(&old, &new, blocks);
        g.throughput(Throughput::Bytes(patch.len() as u64));
        g.bench_with_input(BenchmarkId::from_parameter(blocks), &blocks, |b, _| {
            b.iter(|| {
                let out = apply(&old, black_box(&patch), new.len(), ApplyOptions::default());
                black_box(out.write_count());
            });
        });
    }
    g.finish();
}

criterion_group!(
    benches,
    bench_apply_speed,
    bench_chunk_size,
    bench_step_size,
    bench_control_heavy
);
criterion_main!(benches);
