use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use riptide_parser::h1::request::{Limits, Request};

const TARGETS: [&[u8]; 4] = [
    b"/",
    b"/api/v1.0/weather/forecast/days/16",
    b"/wp-content/uploads/2010/03/hello-kitty-darth-vader-pink.jpg",
    b"/nvidia_web_services/controller.gfeclientcontent.php/com.nvidia.services.GFEClientContent.getShieldReady/{\"gcV\":\"2.2.2.0\",\"dID\":\"1341\",\"osC\":\"6.20\",\"is6\":\"1\",\"lg\":\"1033\",\"GFPV\":\"389.08\",\"isO\":\"1\",\"sM\":\"16777216\"}"
];

fn request_line(target: &[u8]) -> Vec<u8> {
    let mut line = b"GET ".to_vec();
    line.extend_from_slice(target);
    line.extend_from_slice(b" HTTP/1.1\r\nHost: example.org\r\n\r\n");
    line
}

fn benchmark(c: &mut Criterion) {
    let limits = Limits::default();
    let mut group = c.benchmark_group("target");
    for target in TARGETS {
        let req = request_line(target);
        group.throughput(Throughput::Bytes(target.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("request_line", target.len()),
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
