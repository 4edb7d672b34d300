//! Performance benchmarks for the codec and the version store.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tempfile::TempDir;
use unpako::{Codec, Store, StoreConfig, VersionPolicy};

fn create_store(dir: &TempDir) -> Store {
    Store::create(StoreConfig {
        path: dir.path().join("store"),
        ..Default::default()
    })
    .unwrap()
}

fn sample_text(size: usize) -> String {
    "The quick brown fox jumps over the lazy dog. "
        .chars()
        .cycle()
        .take(size)
        .collect()
}

/// Benchmark encoding content into a share URL
fn bench_share_url(c: &mut Criterion) {
    let mut group = c.benchmark_group("share_url");
    let codec = Codec::default();

    for size in [1_000, 10_000, 100_000] {
        let text = sample_text(size);
        group.bench_with_input(BenchmarkId::new("bytes", size), &text, |b, text| {
            b.iter(|| black_box(codec.share_url(text, "bench/notes.txt").unwrap()));
        });
    }

    group.finish();
}

/// Benchmark parsing and inflating a share URL
fn bench_parse_url(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_url");
    let codec = Codec::default();

    for size in [1_000, 10_000, 100_000] {
        let url = codec.share_url(&sample_text(size), "bench/notes.txt").unwrap();
        group.bench_with_input(BenchmarkId::new("bytes", size), &url, |b, url| {
            b.iter(|| {
                let payload = codec.from_url(url).unwrap();
                black_box(codec.decode(&payload).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark appending versions with a persisted store
fn bench_add_version(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_version");

    for existing in [0, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("existing_versions", existing),
            &existing,
            |b, &existing| {
                let dir = TempDir::new().unwrap();
                let store = create_store(&dir);
                for i in 0..existing {
                    store
                        .versions()
                        .save_text(&format!("file{}.txt", i % 10), &i.to_string(), VersionPolicy::Always)
                        .unwrap();
                }

                let mut i = 0u64;
                b.iter(|| {
                    i += 1;
                    black_box(
                        store
                            .versions()
                            .save_text("bench.txt", &i.to_string(), VersionPolicy::Always)
                            .unwrap(),
                    );
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the unchanged-content check
fn bench_unchanged_content(c: &mut Criterion) {
    let dir = TempDir::new().unwrap();
    let store = create_store(&dir);
    let text = sample_text(10_000);
    store
        .versions()
        .save_text("same.txt", &text, VersionPolicy::Always)
        .unwrap();

    c.bench_function("add_version_unchanged", |b| {
        b.iter(|| {
            black_box(
                store
                    .versions()
                    .save_text("same.txt", &text, VersionPolicy::IfChanged)
                    .unwrap(),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_share_url,
    bench_parse_url,
    bench_add_version,
    bench_unchanged_content,
);

criterion_main!(benches);
