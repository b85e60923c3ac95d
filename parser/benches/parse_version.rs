use std::str::from_utf8;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use riptide_parser::h1::request::{Limits, Request};

const VERSIONS: [&[u8]; 2] = [b"HTTP/1.1", b"HTTP/1.0"];

fn request_with_version(version: &[u8]) -> Vec<u8> {
    let mut line = b"GET /api/v1.0/weather/forecast ".to_vec();
    line.extend_from_slice(version);
    line.extend_from_slice(b"\r\nHost: example.org\r\n\r\n");
    line
}

fn benchmark(c: &mut Criterion) {
    let limits = Limits::default();
    let mut group = c.benchmark_group("version");
    for version in VERSIONS {
        let req = request_with_version(version);
        group.bench_with_input(
            BenchmarkId::new("request_line", from_utf8(version).unwrap()),
            &req,
            |b, i| {
                b.iter(|| {
                    let mut parsed = Request::new();
                    let _ = parsed.advance(black_box(i), &limits);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
