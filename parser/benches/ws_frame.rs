use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use riptide_parser::ws::{decode_header, encode_frame, OpCode};
use riptide_parser::RawRequest;

const PAYLOAD_SIZES: [usize; 4] = [16, 256, 4096, 65536];

fn masked_frame(payload_len: usize) -> Vec<u8> {
    let payload = vec![b'x'; payload_len];
    let mut frame = encode_frame(OpCode::Binary, &payload);
    // `encode_frame` produces an unmasked server-side frame; stamp in a
    // mask bit and key so the decoder takes the same path a client frame
    // would (masking is mandatory on frames arriving at a server).
    frame[1] |= 0x80;
    frame.splice(frame.len() - payload_len..frame.len() - payload_len, [0u8; 4]);
    frame
}

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ws_frame");
    for size in PAYLOAD_SIZES {
        let frame = masked_frame(size);
        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::new("decode_header", size), &frame, |b, i| {
            b.iter(|| {
                let mut cursor = RawRequest::new(i);
                let _ = decode_header(&mut cursor, true, 16 * 1024 * 1024);
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
