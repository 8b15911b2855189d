//! Codec benchmarks for chatline-protocol.

use chatline_protocol::{codec, ClientEvent, ServerEvent};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

fn sample_message() -> ServerEvent {
    ServerEvent::MessageReceive(json!({
        "_id": "65f1c0ffee",
        "chat": "chat-42",
        "sender": "user-7",
        "content": "x".repeat(200),
        "type": "text",
    }))
}

fn bench_json(c: &mut Criterion) {
    let event = sample_message();
    let text = codec::encode_json(&event).unwrap();

    let mut group = c.benchmark_group("json");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("encode_message", |b| {
        b.iter(|| codec::encode_json(black_box(&event)))
    });
    group.bench_function("decode_typing", |b| {
        let typing = codec::encode_json(&ClientEvent::typing_start("chat-42", "user-7", "Ana"))
            .unwrap();
        b.iter(|| codec::decode_json::<ClientEvent>(black_box(&typing)))
    });
    group.finish();
}

fn bench_msgpack(c: &mut Criterion) {
    let event = sample_message();
    let encoded = codec::encode(&event).unwrap();

    let mut group = c.benchmark_group("msgpack");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode_message", |b| b.iter(|| codec::encode(black_box(&event))));
    group.bench_function("decode_message", |b| {
        b.iter(|| codec::decode::<ServerEvent>(black_box(&encoded)))
    });
    group.finish();
}

criterion_group!(benches, bench_json, bench_msgpack);
criterion_main!(benches);
