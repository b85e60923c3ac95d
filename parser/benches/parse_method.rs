use std::str::from_utf8;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use riptide_parser::Method;

const METHODS: [&[u8]; 8] = [
    b"GET", b"PUT", b"POST", b"HEAD", b"TRACE", b"DELETE", b"CONNECT", b"OPTIONS",
];

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("method");
    for method in METHODS {
        group.bench_with_input(
            BenchmarkId::new("try_from", from_utf8(method).unwrap()),
            black_box(&method),
            |b, i| {
                b.iter(|| {
                    let _ = Method::try_from(i);
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
