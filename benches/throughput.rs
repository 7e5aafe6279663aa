//! Throughput Benchmark for BoltServe
//!
//! Measures handler dispatch in isolation and full request/response round
//! trips over a loopback connection.

use boltserve::{echo_handler, ResponseTable, TcpServer};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};

/// Benchmark handler dispatch without any networking
fn bench_dispatch(c: &mut Criterion) {
    let table = ResponseTable::new("unknown command")
        .with("ping", "pong")
        .with("hello", "world");
    let echo = echo_handler();
    let payload = vec![0x42u8; 1024];

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("table_hit", |b| {
        b.iter(|| black_box(table.reply(black_box(b"ping"))));
    });

    group.bench_function("table_miss", |b| {
        b.iter(|| black_box(table.reply(black_box(b"no such command"))));
    });

    group.bench_function("echo_1k", |b| {
        b.iter(|| black_box(echo(black_box(&payload))));
    });

    group.finish();
}

/// Benchmark full round trips against a running server
fn bench_round_trip(c: &mut Criterion) {
    let mut server = TcpServer::new(0, echo_handler()).unwrap();
    server.start(2).unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], server.local_addr().port()));

    let mut group = c.benchmark_group("round_trip");
    group.throughput(Throughput::Elements(1));

    group.bench_function("echo_small", |b| {
        let mut socket = TcpStream::connect(addr).unwrap();
        socket.set_nodelay(true).unwrap();
        let mut reply = [0u8; 64];
        b.iter(|| {
            socket.write_all(b"ping").unwrap();
            let n = socket.read(&mut reply).unwrap();
            black_box(&reply[..n]);
        });
    });

    group.bench_function("echo_1k", |b| {
        let mut socket = TcpStream::connect(addr).unwrap();
        socket.set_nodelay(true).unwrap();
        let request = vec![0x42u8; 1024];
        let mut reply = vec![0u8; 2048];
        b.iter(|| {
            socket.write_all(&request).unwrap();
            // The response may arrive in several chunks.
            let mut total = 0;
            while total < request.len() {
                total += socket.read(&mut reply[total..]).unwrap();
            }
            black_box(&reply[..total]);
        });
    });

    group.finish();
    server.stop();
}

criterion_group!(benches, bench_dispatch, bench_round_trip);
criterion_main!(benches);
