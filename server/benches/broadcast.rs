//! Measures end-to-end broadcast fan-out latency: one connected
//! WebSocket client sends a message, and the bench waits for every other
//! connected client to receive it. Runs against a real [`Server`]
//! over loopback TCP rather than calling crate-internal fan-out
//! machinery directly, since [`riptide_server::broadcast::websocket_each`]
//! is `pub(crate)` and reachable only through a live connection.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use riptide_server::config::{ListenConfig, UpgradeConfig};
use riptide_server::server::Server;
use riptide_server::websocket::WebSocket;

const PORT: u16 = 17845;
const FAN_OUTS: [usize; 3] = [2, 8, 32];

fn start_server() {
    let on_message = Arc::new(|ws: &WebSocket, data: &[u8], is_text: bool| {
        let payload = data.to_vec();
        ws.broadcast(
            move |peer: &WebSocket| peer.write(&payload, is_text),
            None::<fn(riptide_server::conn::ConnHandle)>,
        );
    });

    let on_request = Arc::new(move |ctx: riptide_server::server::RequestContext| {
        if ctx.is_upgrade_requested() {
            let config = UpgradeConfig::new(Arc::clone(&on_message));
            let _ = ctx.websocket_upgrade(config);
        }
    });

    let config = ListenConfig::new(PORT, on_request);
    thread::spawn(move || {
        let _ = Server::listen(config);
    });
    thread::sleep(Duration::from_millis(200));
}

fn connect_client() -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", PORT)).expect("server should be listening");
    stream.set_nodelay(true).ok();
    let mut stream = stream;
    stream
        .write_all(
            b"GET / HTTP/1.1\r\n\
              Host: localhost\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap();

    let mut seen = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let n = stream.read(&mut chunk).unwrap();
        seen.extend_from_slice(&chunk[..n]);
        if seen.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    stream
}

fn masked_text_frame(payload: &[u8]) -> Vec<u8> {
    let key = [0x12, 0x34, 0x56, 0x78];
    let mut out = vec![0x81];
    let len = payload.len();
    if len <= 125 {
        out.push(0x80 | len as u8);
    } else {
        out.push(0x80 | 126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    }
    out.extend_from_slice(&key);
    let mut masked = payload.to_vec();
    for (i, b) in masked.iter_mut().enumerate() {
        *b ^= key[i % 4];
    }
    out.extend_from_slice(&masked);
    out
}

fn benchmark(c: &mut Criterion) {
    start_server();

    let mut group = c.benchmark_group("broadcast");
    group.sample_size(10);
    for &fan_out in &FAN_OUTS {
        let mut clients: Vec<TcpStream> = (0..fan_out).map(|_| connect_client()).collect();
        for peer in clients.iter_mut().skip(1) {
            peer.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        }
        let frame = masked_text_frame(b"ping");

        group.bench_with_input(BenchmarkId::new("fan_out", fan_out), &frame, |b, frame| {
            b.iter(|| {
                clients[0].write_all(frame).unwrap();
                for peer in clients.iter_mut().skip(1) {
                    let mut reply = [0u8; 16];
                    let _ = peer.read(&mut reply);
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark);
criterion_main!(benches);
