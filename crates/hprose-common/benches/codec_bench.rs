// Criterion benchmarks for the hprose-common codec
//
// Run benchmarks with:
//   cargo bench -p hprose-common
//
// For detailed output with plots:
//   cargo bench -p hprose-common -- --save-baseline main

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use hprose_common::io::{read_raw_value, ByteBuffer, Reader, Writer};
use hprose_common::{List, Map, Object, Value};
use uuid::Uuid;

fn user(id: i32) -> Value {
    Value::Object(Object::new(
        "User",
        vec![
            ("id".into(), Value::Integer(id)),
            ("name".into(), Value::from(format!("user-{}", id))),
            ("guid".into(), Value::Guid(Uuid::new_v4())),
            ("score".into(), Value::Double(id as f64 * 1.5)),
        ],
    ))
}

fn user_list(n: i32) -> Value {
    Value::List(List::new((0..n).map(user).collect()))
}

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");

    group.bench_function("small_integer", |b| {
        b.iter(|| {
            let mut writer = Writer::new(false);
            writer.serialize(black_box(&Value::Integer(7)));
            writer.into_bytes()
        });
    });

    group.bench_function("string", |b| {
        let s = Value::from("the quick brown fox jumps over the lazy dog");
        b.iter(|| {
            let mut writer = Writer::new(false);
            writer.serialize(black_box(&s));
            writer.into_bytes()
        });
    });

    for size in [10, 100, 1000] {
        let users = user_list(size);
        group.bench_with_input(BenchmarkId::new("objects", size), &users, |b, users| {
            b.iter(|| {
                let mut writer = Writer::new(false);
                writer.serialize(black_box(users));
                writer.into_bytes()
            });
        });
    }

    let shared = Map::default();
    shared.insert("k".into(), Value::from("shared value"));
    let repeated = Value::List(List::new(vec![Value::Map(shared); 1000]));
    group.bench_function("shared_references_1000", |b| {
        b.iter(|| {
            let mut writer = Writer::new(false);
            writer.serialize(black_box(&repeated));
            writer.into_bytes()
        });
    });

    group.finish();
}

fn bench_unserialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("unserialize");

    for size in [10, 100, 1000] {
        let mut writer = Writer::new(false);
        writer.serialize(&user_list(size));
        let bytes = writer.into_bytes();
        group.bench_with_input(BenchmarkId::new("objects", size), &bytes, |b, bytes| {
            b.iter(|| Reader::new(black_box(bytes.clone()), false).unserialize());
        });
        group.bench_with_input(BenchmarkId::new("raw_copy", size), &bytes, |b, bytes| {
            b.iter(|| read_raw_value(&mut ByteBuffer::from(black_box(bytes.clone()))));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_serialize, bench_unserialize);
criterion_main!(benches);
