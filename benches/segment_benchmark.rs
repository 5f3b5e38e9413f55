use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use rand::Rng;
use rtsegment::core::config::SegmentConfig;
use rtsegment::core::types::{DataType, FieldSpec, Row, Schema, Value};
use rtsegment::memory::manager::MemoryManager;
use rtsegment::segment::mutable::MutableSegment;
use std::sync::Arc;

fn bench_schema() -> Schema {
    Schema::new(vec![
        FieldSpec::dimension("host", DataType::String),
        FieldSpec::dimension("shard", DataType::Int),
        FieldSpec::metric("count", DataType::Long),
        FieldSpec::time("ts", DataType::Long),
    ])
    .unwrap()
}

fn make_row(rng: &mut impl Rng, i: u64) -> Row {
    let mut row = Row::new();
    row.set("host", Value::String(format!("host_{}", rng.gen_range(0..100))));
    row.set("shard", Value::Int(rng.gen_range(0..16)));
    row.set("count", Value::Long(rng.gen_range(0..1000)));
    row.set("ts", Value::Long(1_700_000_000_000 + i as i64));
    row
}

/// Ingestion throughput, with and without metric aggregation
fn bench_index(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_row");

    for aggregate in [false, true] {
        group.bench_with_input(
            BenchmarkId::from_parameter(if aggregate { "aggregated" } else { "append" }),
            &aggregate,
            |b, &aggregate| {
                let manager = Arc::new(MemoryManager::off_heap());
                let mut config =
                    SegmentConfig::new("bench_seg", "events", bench_schema(), 50_000_000)
                        .with_off_heap(manager)
                        .with_inverted_index_columns(&["host"])
                        .with_no_dictionary_columns(&["count"]);
                if aggregate {
                    config = config.with_aggregate_metrics();
                }
                let segment = MutableSegment::new(config).unwrap();
                let mut rng = rand::thread_rng();
                let mut i = 0u64;

                b.iter(|| {
                    let row = make_row(&mut rng, i);
                    i += 1;
                    segment.index(black_box(&row), None).unwrap()
                });
            },
        );
    }
    group.finish();
}

/// Row reconstruction from the forward indexes
fn bench_record(c: &mut Criterion) {
    let manager = Arc::new(MemoryManager::off_heap());
    let segment = MutableSegment::new(
        SegmentConfig::new("bench_seg", "events", bench_schema(), 100_000)
            .with_off_heap(manager)
            .with_no_dictionary_columns(&["count"]),
    )
    .unwrap();

    let mut rng = rand::thread_rng();
    for i in 0..10_000u64 {
        segment.index(&make_row(&mut rng, i), None).unwrap();
    }

    c.bench_function("record", |b| {
        let mut reuse = Row::new();
        let mut doc = 0u32;
        b.iter(|| {
            segment.record(doc % 10_000, &mut reuse).unwrap();
            doc += 1;
            black_box(&reuse);
        });
    });
}

/// Sorted docId permutation over a dictionary + inverted column
fn bench_sorted_iteration(c: &mut Criterion) {
    let segment = MutableSegment::new(
        SegmentConfig::new("bench_seg", "events", bench_schema(), 100_000)
            .with_inverted_index_columns(&["host"])
            .with_no_dictionary_columns(&["count"]),
    )
    .unwrap();

    let mut rng = rand::thread_rng();
    for i in 0..50_000u64 {
        segment.index(&make_row(&mut rng, i), None).unwrap();
    }

    c.bench_function("sorted_doc_id_iteration", |b| {
        b.iter(|| black_box(segment.sorted_doc_id_iteration("host").unwrap()));
    });
}

criterion_group!(benches, bench_index, bench_record, bench_sorted_iteration);
criterion_main!(benches);
