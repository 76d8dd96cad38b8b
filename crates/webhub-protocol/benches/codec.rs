//! Codec benchmarks for webhub-protocol.

use bytes::BytesMut;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use webhub_protocol::codec::{self, DEFAULT_MAX_PAYLOAD};
use webhub_protocol::{Frame, Push};

fn bench_encode(c: &mut Criterion) {
    let push = Push::property("temperature", serde_json::json!(21.5));
    let payload = push.encode().unwrap();

    c.bench_function("encode_property_push", |b| {
        b.iter(|| codec::encode_text(black_box(payload.clone())))
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_masked");

    for size in [10usize, 200, 100_000] {
        let frame = Frame::text(vec![b'x'; size]);
        let encoded = codec::encode_masked(&frame, [1, 2, 3, 4]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}_bytes"), |b| {
            b.iter(|| {
                let mut buf = BytesMut::from(&encoded[..]);
                codec::decode_from(black_box(&mut buf), DEFAULT_MAX_PAYLOAD).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
