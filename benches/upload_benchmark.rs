//! Upload benchmarks

use b2_uploadr::upload::checksum::sha1_hex;
use b2_uploadr::upload::chunker::{produce, PartSizer};
use b2_uploadr::upload::part_size::part_size;
use b2_uploadr::upload::{PartLimits, UploadSource};
use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use futures::StreamExt;

fn benchmark_part_size(c: &mut Criterion) {
    let limits = PartLimits::default();
    c.bench_function("part_size", |b| {
        b.iter(|| {
            for total in [0u64, 1 << 20, 200 << 20, 1 << 40] {
                black_box(part_size(Some(black_box(total)), &limits));
            }
        });
    });
}

fn benchmark_sha1(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha1");

    for size in [64 * 1024, 1024 * 1024, 5 * 1024 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(format!("{}_bytes", size), size, |b, &size| {
            let data = vec![7u8; size];
            b.iter(|| black_box(sha1_hex(&data)));
        });
    }

    group.finish();
}

fn benchmark_chunker(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("chunker");
    let size = 16 * 1024 * 1024;
    group.throughput(Throughput::Bytes(size as u64));

    let data = Bytes::from(vec![1u8; size]);
    group.bench_function("buffer", |b| {
        b.to_async(&runtime).iter(|| async {
            let parts = produce(
                UploadSource::from(data.clone()),
                PartSizer::new(1024 * 1024, 1024 * 1024, false),
            );
            black_box(parts.count().await)
        });
    });

    group.bench_function("stream_varied", |b| {
        b.to_async(&runtime).iter(|| async {
            let chunks = futures::stream::iter(
                (0..size / (64 * 1024)).map(|i| {
                    let start = i * 64 * 1024;
                    Ok(data.slice(start..start + 64 * 1024))
                }),
            );
            let parts = produce(
                UploadSource::sized_stream(chunks.boxed(), size as u64),
                PartSizer::new(1024 * 1024, 512 * 1024, true),
            );
            black_box(parts.count().await)
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_part_size, benchmark_sha1, benchmark_chunker);
criterion_main!(benches);
