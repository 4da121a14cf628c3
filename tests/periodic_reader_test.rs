//! Periodic reader scheduling, flush and shutdown behavior.

mod common;

use common::{i64_sum_total, InMemoryExporter};
use meterline::core::config::ReaderConfig;
use meterline::{Context, MeterProvider, MetricsError, PeriodicReader};
use std::sync::Arc;
use std::time::Duration;

fn reader(exporter: &InMemoryExporter, interval: Duration) -> Arc<PeriodicReader> {
    Arc::new(
        PeriodicReader::builder(exporter.clone())
            .with_config(&ReaderConfig {
                interval,
                timeout: Duration::from_secs(5),
            })
            .build()
            .unwrap(),
    )
}

#[tokio::test]
async fn test_exports_on_interval() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder()
        .with_reader(reader(&exporter, Duration::from_millis(50)))
        .build();
    provider.meter("periodic").counter::<i64>("ticks").add(2, &[]);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let snapshots = exporter.snapshots();
    assert!(snapshots.len() >= 2, "expected repeated exports, got {}", snapshots.len());
    for rm in &snapshots {
        assert_eq!(i64_sum_total(rm, "ticks"), 2);
    }

    provider.shutdown(&Context::new()).await.unwrap();
}

#[tokio::test]
async fn test_force_flush_exports_immediately() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder()
        .with_reader(reader(&exporter, Duration::from_secs(3600)))
        .build();
    provider.meter("periodic").counter::<i64>("requests").add(7, &[]);

    provider.force_flush(&Context::new()).await.unwrap();

    assert_eq!(exporter.export_count(), 1);
    assert_eq!(exporter.flush_count(), 1);
    assert_eq!(i64_sum_total(&exporter.snapshots()[0], "requests"), 7);
}

#[tokio::test]
async fn test_force_flush_returns_export_error() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder()
        .with_reader(reader(&exporter, Duration::from_secs(3600)))
        .build();
    provider.meter("periodic").counter::<i64>("requests").add(1, &[]);
    exporter.fail_exports(true);

    let err = provider.force_flush(&Context::new()).await.unwrap_err();
    assert!(matches!(err, MetricsError::Export(_)));
}

#[tokio::test]
async fn test_shutdown_flushes_then_stops() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder()
        .with_reader(reader(&exporter, Duration::from_secs(3600)))
        .build();
    let counter = provider.meter("periodic").counter::<i64>("requests");
    counter.add(3, &[]);

    let ctx = Context::new();
    provider.shutdown(&ctx).await.unwrap();

    assert!(exporter.is_shutdown());
    assert_eq!(exporter.export_count(), 1);
    assert_eq!(i64_sum_total(&exporter.snapshots()[0], "requests"), 3);

    // Everything after shutdown is rejected and nothing more is exported
    counter.add(1, &[]);
    assert!(matches!(provider.force_flush(&ctx).await, Err(MetricsError::ReaderShutdown)));
    assert!(matches!(provider.shutdown(&ctx).await, Err(MetricsError::ReaderShutdown)));
    assert_eq!(exporter.export_count(), 1);
}

#[tokio::test]
async fn test_cancelled_flush_reports_context_error() {
    let exporter = InMemoryExporter::new();
    let provider = MeterProvider::builder()
        .with_reader(reader(&exporter, Duration::from_secs(3600)))
        .build();
    provider.meter("periodic").counter::<i64>("requests").add(1, &[]);

    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let ctx = Context::new().with_cancellation(token);

    let err = provider.force_flush(&ctx).await.unwrap_err();
    assert!(err.is_context_error());
    assert_eq!(exporter.export_count(), 0);

    // The aborted cycle leaves nothing behind for the next one
    provider.force_flush(&Context::new()).await.unwrap();
    assert_eq!(i64_sum_total(&exporter.snapshots()[0], "requests"), 1);
}
