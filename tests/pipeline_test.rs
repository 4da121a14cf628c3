//! End-to-end measurement and collection through a manual reader.

mod common;

use common::{collect, f64_histogram_points, i64_sum_points, i64_sum_total};
use meterline::view::DEFAULT_HISTOGRAM_BOUNDARIES;
use meterline::{
    Aggregation, Context, Criteria, ExemplarFilter, InstrumentConfig, InstrumentKind, KeyValue,
    ManualReader, MeterProvider, SpanContext, SpanId, Stream, Temporality, TraceId, Value, View,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn provider_with(reader: Arc<ManualReader>) -> MeterProvider {
    MeterProvider::builder().with_reader(reader).build()
}

#[tokio::test]
async fn test_cumulative_counter() {
    let reader = Arc::new(ManualReader::builder().build());
    let provider = provider_with(reader.clone());
    let counter = provider.meter("e2e").counter::<i64>("requests");

    counter.add(3, &[]);
    counter.add(5, &[]);

    let rm = collect(reader.as_ref()).await;
    let points = i64_sum_points(&rm, "requests");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 8);
    assert!(points[0].attributes.is_empty());

    // Cumulative keeps reporting the running total
    let rm = collect(reader.as_ref()).await;
    assert_eq!(i64_sum_total(&rm, "requests"), 8);
}

#[tokio::test]
async fn test_delta_counter() {
    let reader = Arc::new(
        ManualReader::builder()
            .with_temporality(Temporality::Delta)
            .build(),
    );
    let provider = provider_with(reader.clone());
    let counter = provider.meter("e2e").counter::<i64>("requests");

    counter.add(3, &[]);
    counter.add(5, &[]);

    let rm = collect(reader.as_ref()).await;
    assert_eq!(i64_sum_total(&rm, "requests"), 8);

    let rm = collect(reader.as_ref()).await;
    assert_eq!(i64_sum_total(&rm, "requests"), 0);
}

#[tokio::test]
async fn test_monotonic_counter_drops_negative_and_nan() {
    let reader = Arc::new(ManualReader::builder().build());
    let provider = provider_with(reader.clone());
    let meter = provider.meter("e2e");
    let counter = meter.counter::<f64>("bytes");
    let updown = meter.up_down_counter::<i64>("inflight");

    counter.add(2.0, &[]);
    counter.add(-1.0, &[]);
    counter.add(f64::NAN, &[]);
    updown.add(4, &[]);
    updown.add(-3, &[]);

    let rm = collect(reader.as_ref()).await;
    let bytes = rm.metric("bytes").unwrap().data.as_f64().unwrap().as_sum().unwrap();
    assert_eq!(bytes.data_points[0].value, 2.0);
    assert!(bytes.is_monotonic);
    assert_eq!(i64_sum_total(&rm, "inflight"), 1);
}

#[tokio::test]
async fn test_attribute_sets_are_order_independent() {
    let reader = Arc::new(ManualReader::builder().build());
    let provider = provider_with(reader.clone());
    let counter = provider.meter("e2e").counter::<i64>("requests");

    counter.add(1, &[KeyValue::new("method", "GET"), KeyValue::new("code", 200)]);
    counter.add(1, &[KeyValue::new("code", 200), KeyValue::new("method", "GET")]);
    counter.add(1, &[KeyValue::new("method", "POST"), KeyValue::new("code", 200)]);

    let rm = collect(reader.as_ref()).await;
    let mut values: Vec<i64> = i64_sum_points(&rm, "requests").iter().map(|dp| dp.value).collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2]);
}

#[tokio::test]
async fn test_default_histogram() {
    let reader = Arc::new(ManualReader::builder().build());
    let provider = provider_with(reader.clone());
    let histogram = provider
        .meter("e2e")
        .histogram::<f64>(InstrumentConfig::new("latency").with_unit("ms"));

    for v in [1.0, 5.0, 7.0, 12_000.0] {
        histogram.record(v, &[]);
    }

    let rm = collect(reader.as_ref()).await;
    assert_eq!(rm.metric("latency").unwrap().unit, "ms");
    let points = f64_histogram_points(&rm, "latency");
    let dp = &points[0];
    assert_eq!(dp.bounds, DEFAULT_HISTOGRAM_BOUNDARIES.to_vec());
    assert_eq!(dp.count, 4);
    assert_eq!(dp.bucket_counts.len(), DEFAULT_HISTOGRAM_BOUNDARIES.len() + 1);
    // 1 and 5 fall in (0, 5], 7 in (5, 10], 12000 past the last bound
    assert_eq!(dp.bucket_counts[1], 2);
    assert_eq!(dp.bucket_counts[2], 1);
    assert_eq!(dp.bucket_counts[15], 1);
    assert_eq!(dp.min, Some(1.0));
    assert_eq!(dp.max, Some(12_000.0));
    assert_eq!(dp.sum, Some(12_013.0));
}

#[tokio::test]
async fn test_view_selects_exponential_histogram() {
    let reader = Arc::new(ManualReader::builder().build());
    let view = View::new(
        Criteria::new().with_kind(InstrumentKind::Histogram),
        Stream::new().aggregation(Aggregation::Base2ExponentialHistogram {
            max_size: 4,
            max_scale: 20,
            record_min_max: true,
        }),
    )
    .unwrap();
    let provider = MeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(view)
        .build();
    let histogram = provider.meter("e2e").histogram::<f64>("payload");

    for v in [1.0, 2.0, 4.0, 0.0] {
        histogram.record(v, &[]);
    }

    let rm = collect(reader.as_ref()).await;
    let data = rm.metric("payload").unwrap().data.as_f64().unwrap();
    let dp = &data.as_exponential_histogram().unwrap().data_points[0];
    assert_eq!(dp.count, 4);
    assert_eq!(dp.zero_count, 1);
    assert_eq!(dp.scale, 0);
    assert_eq!(dp.positive_bucket.offset, -1);
    assert_eq!(dp.positive_bucket.counts, vec![1, 1, 1]);
    assert_eq!(dp.sum, Some(7.0));
}

#[tokio::test]
async fn test_attribute_filter_and_exemplars() {
    let reader = Arc::new(ManualReader::builder().build());
    let view = View::new(
        Criteria::new().with_name("requests"),
        Stream::new().allowed_attribute_keys(["route"]),
    )
    .unwrap();
    let provider = MeterProvider::builder()
        .with_reader(reader.clone())
        .with_view(view)
        .with_exemplar_filter(ExemplarFilter::TraceBased)
        .build();
    let counter = provider.meter("e2e").counter::<i64>("requests");

    let trace_id = TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap();
    let span_id = SpanId::from_hex("00f067aa0ba902b7").unwrap();
    let sampled = Context::new().with_span(SpanContext::new(trace_id, span_id, true));
    let attrs = [KeyValue::new("route", "/cart"), KeyValue::new("user", "u-42")];

    counter.add_with_context(&sampled, 2, &attrs);
    // Not sampled: aggregated but not offered as an exemplar
    counter.add(3, &attrs);

    let rm = collect(reader.as_ref()).await;
    let points = i64_sum_points(&rm, "requests");
    assert_eq!(points.len(), 1);
    let dp = &points[0];
    assert_eq!(dp.value, 5);
    assert_eq!(dp.attributes.len(), 1);
    assert_eq!(dp.attributes.get("route"), Some(&Value::from("/cart")));

    assert_eq!(dp.exemplars.len(), 1);
    let exemplar = &dp.exemplars[0];
    assert_eq!(exemplar.value, 2);
    assert_eq!(exemplar.trace_id, Some(trace_id));
    assert_eq!(exemplar.span_id, Some(span_id));
    assert_eq!(exemplar.filtered_attributes, vec![KeyValue::new("user", "u-42")]);
}

#[tokio::test]
async fn test_cardinality_overflow() {
    let reader = Arc::new(ManualReader::builder().build());
    let provider = MeterProvider::builder()
        .with_reader(reader.clone())
        .with_cardinality_limit(4)
        .build();
    let counter = provider.meter("e2e").counter::<i64>("requests");

    for i in 0..10 {
        counter.add(1, &[KeyValue::new("id", i64::from(i))]);
    }

    let rm = collect(reader.as_ref()).await;
    let points = i64_sum_points(&rm, "requests");
    assert_eq!(points.len(), 4);
    assert_eq!(points.iter().map(|dp| dp.value).sum::<i64>(), 10);

    let overflow = points
        .iter()
        .find(|dp| dp.attributes.get("otel.metric.overflow").is_some())
        .unwrap();
    assert_eq!(overflow.value, 7);
}

#[tokio::test]
async fn test_observable_gauge_reports_current_observations() {
    let reader = Arc::new(ManualReader::builder().build());
    let provider = provider_with(reader.clone());
    let meter = provider.meter("e2e");
    let gauge = meter.observable_gauge::<i64>("queue.depth");

    let registration = {
        let gauge = gauge.clone();
        meter.register_callback(move |_ctx| {
            gauge.observe(12, &[KeyValue::new("queue", "jobs")]);
            Ok(())
        })
    };

    let rm = collect(reader.as_ref()).await;
    let data = rm.metric("queue.depth").unwrap().data.as_i64().unwrap();
    let points = &data.as_gauge().unwrap().data_points;
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].value, 12);

    registration.unregister();
    let rm = collect(reader.as_ref()).await;
    assert!(rm.metric("queue.depth").is_none());
}

#[tokio::test]
async fn test_delta_gauge_keeps_last_value() {
    let reader = Arc::new(
        ManualReader::builder()
            .with_temporality(Temporality::Delta)
            .build(),
    );
    let provider = provider_with(reader.clone());
    let gauge = provider.meter("e2e").gauge::<i64>("temperature");
    gauge.record(5, &[]);

    for _ in 0..2 {
        let rm = collect(reader.as_ref()).await;
        let data = rm.metric("temperature").unwrap().data.as_i64().unwrap();
        let points = &data.as_gauge().unwrap().data_points;
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].value, 5);
    }
}

#[tokio::test]
async fn test_readers_are_independent() {
    let cumulative = Arc::new(ManualReader::builder().build());
    let delta = Arc::new(
        ManualReader::builder()
            .with_temporality(Temporality::Delta)
            .build(),
    );
    let provider = MeterProvider::builder()
        .with_reader(cumulative.clone())
        .with_reader(delta.clone())
        .build();
    let counter = provider.meter("e2e").counter::<i64>("requests");

    counter.add(4, &[]);
    assert_eq!(i64_sum_total(&collect(delta.as_ref()).await, "requests"), 4);
    counter.add(1, &[]);

    assert_eq!(i64_sum_total(&collect(delta.as_ref()).await, "requests"), 1);
    assert_eq!(i64_sum_total(&collect(cumulative.as_ref()).await, "requests"), 5);
}
