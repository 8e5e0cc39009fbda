//! Codec benchmarks for avb-bridge-protocol.

use avb_bridge_protocol::{codec, datastore_url, ClientId, ResourcePath, ServerMessage};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;

fn bench_decode_update(c: &mut Criterion) {
    let text = r#"{"ext/ibankDisplayOrder": "2:1:0", "mix/chan/0/matrix/fader": 0.75}"#;

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("update_small", |b| {
        b.iter(|| codec::decode_update(black_box(text)))
    });
    group.finish();
}

fn bench_encode_payload(c: &mut Criterion) {
    let payload: serde_json::Map<String, serde_json::Value> = (0..64)
        .map(|i| (format!("mix/chan/{i}/matrix/fader"), json!(0.5)))
        .collect();
    let message = ServerMessage::update(payload.into());

    c.bench_function("encode_payload_64_keys", |b| {
        b.iter(|| codec::encode(black_box(&message)).unwrap())
    });
}

fn bench_resource_url(c: &mut Criterion) {
    c.bench_function("target_to_url", |b| {
        b.iter(|| {
            let path = ResourcePath::from_target(black_box("/datastore/mixer/1")).unwrap();
            datastore_url("http://localhost:8888", &path, ClientId::new(42))
        })
    });
}

criterion_group!(
    benches,
    bench_decode_update,
    bench_encode_payload,
    bench_resource_url
);
criterion_main!(benches);
