//! Upload pipeline benchmarks
//!
//! Hashing and size limiting on their own, then a full local upload.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use upload_destination::destination::limit::HardLimitReader;
use upload_destination::destination::multi_hash::HashingReader;
use upload_destination::destination::{self, UploadOpts};

const SIZES: [usize; 3] = [64 * 1024, 1024 * 1024, 8 * 1024 * 1024];

fn benchmark_hashing(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hashing_reader");

    for size in SIZES {
        let data = vec![0xa5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.to_async(&rt).iter(|| async {
                let mut reader = HashingReader::new(&data[..]);
                let mut sink = tokio::io::sink();
                tokio::io::copy(&mut reader, &mut sink).await.unwrap();
                black_box(reader.finish())
            });
        });
    }

    group.finish();
}

fn benchmark_hard_limit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("hard_limit_reader");

    let size = 1024 * 1024;
    let data = vec![0u8; size];
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("under_limit", |b| {
        b.to_async(&rt).iter(|| async {
            let mut reader = HardLimitReader::new(&data[..], size as i64);
            let mut buf = Vec::with_capacity(size);
            black_box(reader.read_to_end(&mut buf).await.unwrap())
        });
    });

    group.finish();
}

fn benchmark_local_upload(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let mut group = c.benchmark_group("local_upload");
    group.measurement_time(Duration::from_secs(10));

    for size in SIZES {
        let data = vec![0x5au8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.to_async(&rt).iter(|| async {
                let scope = CancellationToken::new();
                let opts = UploadOpts::local(
                    dir.path(),
                    "bench",
                    tokio::time::Instant::now() + Duration::from_secs(60),
                );
                let fh = destination::upload(&scope, &data[..], data.len() as i64, &opts)
                    .await
                    .unwrap();
                scope.cancel();
                black_box(fh)
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_hashing,
    benchmark_hard_limit,
    benchmark_local_upload
);
criterion_main!(benches);
