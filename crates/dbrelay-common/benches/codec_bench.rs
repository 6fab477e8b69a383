//! Value codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dbrelay_common::envelope::{decode_row, encode_row};
use dbrelay_common::{DataField, Value, ValueCodec};

fn encode_cached_benchmark(c: &mut Criterion) {
    let codec = ValueCodec::new();
    let value = Value::from(42i64);
    codec.encode(&value).unwrap();

    c.bench_function("encode_i64_cached", |b| {
        b.iter(|| black_box(codec.encode(&value).unwrap()))
    });
}

fn encode_json_benchmark(c: &mut Criterion) {
    let codec = ValueCodec::new();
    let value = Value::from(serde_json::json!({"id": 1, "tags": ["a", "b"]}));

    c.bench_function("encode_json_fallback", |b| {
        b.iter(|| black_box(codec.encode(&value).unwrap()))
    });
}

fn row_round_trip_benchmark(c: &mut Criterion) {
    let codec = ValueCodec::new();
    let row: Vec<DataField> = (0..16)
        .map(|i| {
            DataField::new(
                format!("col{}", i),
                "TEXT",
                Some(Value::from(format!("value-{}", i))),
            )
        })
        .collect();

    c.bench_function("row_16_fields_round_trip", |b| {
        b.iter(|| {
            let envelopes = encode_row(&row, &codec);
            black_box(decode_row(&envelopes, &codec).len())
        })
    });
}

criterion_group!(
    benches,
    encode_cached_benchmark,
    encode_json_benchmark,
    row_round_trip_benchmark
);
criterion_main!(benches);
