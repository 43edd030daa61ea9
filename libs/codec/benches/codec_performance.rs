//! Hot-path codec benchmarks
//!
//! Steady state for a connection: acquire from a warm pool, unmarshal a
//! received frame, marshal a response, release.

use bytes::Bytes;
use coap_codec::{DatagramPool, StreamPool, Type};
use coap_types::{Body, CoapMessage, Code, Context, OptionId};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn sample_datagram(pool: &DatagramPool, payload: usize) -> Vec<u8> {
    let mut msg = pool.acquire(Context::background());
    msg.set_message_type(Type::Confirmable);
    msg.set_message_id(0x1234);
    msg.set_code(Code::CONTENT);
    msg.set_token(Some(Bytes::from_static(&[1, 2, 3, 4])));
    msg.base_mut().set_path("/sensors/temperature").unwrap();
    msg.base_mut().set_content_format(50).unwrap();
    msg.set_body(Some(Body::from(vec![0x42; payload])));
    let wire = msg.marshal().unwrap().to_vec();
    pool.release(msg);
    wire
}

fn bench_datagram(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram");
    let pool = DatagramPool::new(64);
    let small = sample_datagram(&pool, 16);
    let large = sample_datagram(&pool, 1024);

    group.bench_function("unmarshal_small", |b| {
        b.iter(|| {
            let mut msg = pool.acquire(Context::background());
            black_box(msg.unmarshal(black_box(&small)).unwrap());
            pool.release(msg);
        });
    });

    group.bench_function("unmarshal_large", |b| {
        b.iter(|| {
            let mut msg = pool.acquire(Context::background());
            black_box(msg.unmarshal(black_box(&large)).unwrap());
            pool.release(msg);
        });
    });

    group.bench_function("round_trip_small", |b| {
        b.iter(|| {
            let mut msg = pool.acquire(Context::background());
            msg.unmarshal(black_box(&small)).unwrap();
            black_box(msg.marshal().unwrap().len());
            pool.release(msg);
        });
    });

    group.finish();
}

fn bench_stream(c: &mut Criterion) {
    let mut group = c.benchmark_group("stream");
    let pool = StreamPool::new(64);

    let wire = {
        let mut msg = pool.acquire(Context::background());
        msg.set_code(Code::POST);
        msg.base_mut().add_option(OptionId::URI_PATH, "upload").unwrap();
        msg.set_body(Some(Body::from(vec![7u8; 512])));
        let wire = msg.marshal().unwrap().to_vec();
        pool.release(msg);
        wire
    };

    group.bench_function("unmarshal", |b| {
        b.iter(|| {
            let mut msg = pool.acquire(Context::background());
            black_box(msg.unmarshal(black_box(&wire)).unwrap());
            pool.release(msg);
        });
    });

    group.bench_function("frame_length", |b| {
        b.iter(|| black_box(coap_codec::frame_length(black_box(&wire)).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_datagram, bench_stream);
criterion_main!(benches);
