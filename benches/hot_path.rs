//! Hot path benchmarks.
//!
//! Measurement recording is called from application code on every request,
//! so it must stay cheap under contention and as attribute sets grow.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use meterline::{
    Aggregation, Context, Criteria, InstrumentKind, KeyValue, ManualReader, MeterProvider,
    MetricReader, ResourceMetrics, Stream, View,
};
use std::sync::Arc;
use std::time::Duration;

fn provider() -> (MeterProvider, Arc<ManualReader>) {
    let reader = Arc::new(ManualReader::builder().build());
    let provider = MeterProvider::builder().with_reader(reader.clone()).build();
    (provider, reader)
}

fn bench_counter_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_add");
    let (provider, _reader) = provider();
    let counter = provider.meter("bench").counter::<i64>("requests");

    group.bench_function("no_attributes", |b| {
        b.iter(|| counter.add(black_box(1), &[]));
    });

    for n in [1usize, 4, 8] {
        let attrs: Vec<KeyValue> = (0..n)
            .map(|i| KeyValue::new(format!("key{}", i), format!("value{}", i)))
            .collect();
        group.bench_with_input(BenchmarkId::new("attributes", n), &attrs, |b, attrs| {
            b.iter(|| counter.add(black_box(1), attrs));
        });
    }

    group.finish();
}

fn bench_histogram_record(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram_record");

    let (provider, _reader) = provider();
    let explicit = provider.meter("bench").histogram::<f64>("latency");
    group.bench_function("explicit_buckets", |b| {
        let mut v = 0.0;
        b.iter(|| {
            v = (v + 7.3) % 10_000.0;
            explicit.record(black_box(v), &[KeyValue::new("route", "/")]);
        });
    });

    let reader = Arc::new(ManualReader::builder().build());
    let view = View::new(
        Criteria::new().with_kind(InstrumentKind::Histogram),
        Stream::new().aggregation(Aggregation::default_exponential_histogram()),
    )
    .unwrap();
    let provider = MeterProvider::builder()
        .with_reader(reader)
        .with_view(view)
        .build();
    let exponential = provider.meter("bench").histogram::<f64>("latency");
    group.bench_function("exponential", |b| {
        let mut v = 0.001;
        b.iter(|| {
            v = (v * 1.7) % 1.0e6 + 0.001;
            exponential.record(black_box(v), &[KeyValue::new("route", "/")]);
        });
    });

    group.finish();
}

fn bench_contended_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_add");
    group.measurement_time(Duration::from_secs(5));

    let (provider, _reader) = provider();
    let counter = provider.meter("bench").counter::<i64>("requests");
    let threads = std::thread::available_parallelism().map_or(4, |n| n.get());

    group.bench_function(BenchmarkId::new("threads", threads), |b| {
        b.iter(|| {
            std::thread::scope(|s| {
                for t in 0..threads {
                    let counter = &counter;
                    s.spawn(move || {
                        let attrs = [KeyValue::new("worker", t as i64)];
                        for _ in 0..1_000 {
                            counter.add(1, &attrs);
                        }
                    });
                }
            });
        });
    });

    group.finish();
}

fn bench_collect(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    for sets in [10i64, 1_000] {
        let (provider, reader) = provider();
        let counter = provider.meter("bench").counter::<i64>("requests");
        for i in 0..sets {
            counter.add(1, &[KeyValue::new("id", i)]);
        }

        group.bench_with_input(BenchmarkId::new("attribute_sets", sets), &sets, |b, _| {
            let mut rm = ResourceMetrics::default();
            b.iter(|| {
                runtime
                    .block_on(reader.collect(&Context::new(), &mut rm))
                    .unwrap();
                black_box(rm.metric_count());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_counter_add,
    bench_histogram_record,
    bench_contended_add,
    bench_collect
);
criterion_main!(benches);
