//! Benchmarks for Garden Sync transfer and replica operations
//!
//! Run with: cargo bench -p gardensync-core
//!
//! These benchmarks establish baselines for:
//! - Archiving and compressing a garden
//! - Chunking and reassembling an archive
//! - Live document edits and remote update application

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gardensync_core::files::{split_chunks, ChunkAssembly};
use gardensync_core::store::archive::{pack, unpack, ArchiveEntry};
use gardensync_core::{DocKey, DocumentReplica};

fn garden(files: usize, file_size: usize) -> Vec<ArchiveEntry> {
    (0..files)
        .map(|i| ArchiveEntry {
            path: format!("notes/note-{}.md", i),
            data: format!("# Note {}\n{}", i, "lorem ipsum ".repeat(file_size / 12)).into_bytes(),
        })
        .collect()
}

// ============================================================================
// Archive Benchmarks
// ============================================================================

fn bench_archive(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive");

    for files in [10, 100, 1000] {
        let entries = garden(files, 2048);
        let raw: u64 = entries.iter().map(|e| e.data.len() as u64).sum();
        group.throughput(Throughput::Bytes(raw));

        group.bench_with_input(BenchmarkId::new("pack", files), &entries, |b, entries| {
            b.iter(|| black_box(pack(entries, 3).unwrap()))
        });

        let packed = pack(&entries, 3).unwrap();
        group.bench_with_input(BenchmarkId::new("unpack", files), &packed, |b, packed| {
            b.iter(|| black_box(unpack(packed).unwrap()))
        });
    }

    group.finish();
}

// ============================================================================
// Chunk Benchmarks
// ============================================================================

fn bench_chunk_reassembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_reassembly");
    let archive = vec![7u8; 4 * 1024 * 1024];
    group.throughput(Throughput::Bytes(archive.len() as u64));

    for chunk_size in [16 * 1024, 64 * 1024, 256 * 1024] {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            &chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let chunks = split_chunks(&archive, chunk_size);
                    let mut assembly =
                        ChunkAssembly::new(chunks.len() as u32, archive.len() as u64);
                    // reverse order is the worst case for an index-addressed buffer
                    for (i, chunk) in chunks.iter().enumerate().rev() {
                        assembly.insert(i as u32, chunk.to_vec()).unwrap();
                    }
                    black_box(assembly.assemble().unwrap())
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Replica Benchmarks
// ============================================================================

fn bench_replica_edit(c: &mut Criterion) {
    let mut group = c.benchmark_group("replica_edit");
    let key = DocKey::new("notes", "today.md");

    for size in [1_000, 10_000, 100_000] {
        let base = "a".repeat(size);
        group.bench_with_input(BenchmarkId::new("append_line", size), &base, |b, base| {
            b.iter_batched(
                || DocumentReplica::seeded(key.clone(), base).unwrap(),
                |mut replica| {
                    let edited = format!("{}\nnew line", base);
                    black_box(replica.replace_text(&edited).unwrap())
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_remote_apply(c: &mut Criterion) {
    let key = DocKey::new("notes", "today.md");
    let mut host = DocumentReplica::seeded(key.clone(), &"b".repeat(10_000)).unwrap();
    let snapshot = host.snapshot();
    let update = host.replace_text(&format!("{}\nhost edit", "b".repeat(10_000))).unwrap();

    c.bench_function("apply_remote_update", |b| {
        b.iter_batched(
            || {
                let mut follower = DocumentReplica::empty(key.clone());
                follower.apply(&snapshot).unwrap();
                follower
            },
            |mut follower| black_box(follower.apply(&update).unwrap()),
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_archive,
    bench_chunk_reassembly,
    bench_replica_edit,
    bench_remote_apply,
);
criterion_main!(benches);
