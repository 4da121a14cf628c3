//! Common test utilities and fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use meterline::data::{DataPoint, HistogramDataPoint};
use meterline::{Context, MetricReader, MetricsError, PushExporter, ResourceMetrics, Result};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Push exporter keeping every snapshot in memory
#[derive(Clone, Default)]
pub struct InMemoryExporter {
    snapshots: Arc<Mutex<Vec<ResourceMetrics>>>,
    flushes: Arc<AtomicUsize>,
    shutdown: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl InMemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later export fail
    pub fn fail_exports(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn snapshots(&self) -> Vec<ResourceMetrics> {
        self.snapshots.lock().clone()
    }

    pub fn export_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushExporter for InMemoryExporter {
    async fn export(&self, _ctx: &Context, rm: &ResourceMetrics) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MetricsError::export("in-memory exporter set to fail"));
        }
        self.snapshots.lock().push(rm.clone());
        Ok(())
    }

    async fn force_flush(&self, _ctx: &Context) -> Result<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self, _ctx: &Context) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Collects one snapshot from `reader`
pub async fn collect(reader: &dyn MetricReader) -> ResourceMetrics {
    let mut rm = ResourceMetrics::default();
    reader.collect(&Context::new(), &mut rm).await.unwrap();
    rm
}

/// Data points of the integer sum `name`
pub fn i64_sum_points<'a>(rm: &'a ResourceMetrics, name: &str) -> &'a [DataPoint<i64>] {
    let metric = rm
        .metric(name)
        .unwrap_or_else(|| panic!("metric {} not collected", name));
    &metric
        .data
        .as_i64()
        .and_then(|d| d.as_sum())
        .unwrap_or_else(|| panic!("metric {} is not an integer sum", name))
        .data_points
}

/// Total of the integer sum `name` over all attribute sets
pub fn i64_sum_total(rm: &ResourceMetrics, name: &str) -> i64 {
    i64_sum_points(rm, name).iter().map(|dp| dp.value).sum()
}

/// Data points of the float histogram `name`
pub fn f64_histogram_points<'a>(rm: &'a ResourceMetrics, name: &str) -> &'a [HistogramDataPoint<f64>] {
    let metric = rm
        .metric(name)
        .unwrap_or_else(|| panic!("metric {} not collected", name));
    &metric
        .data
        .as_f64()
        .and_then(|d| d.as_histogram())
        .unwrap_or_else(|| panic!("metric {} is not a float histogram", name))
        .data_points
}

/// Installs an error handler recording every reported error
pub fn capture_errors() -> Arc<Mutex<Vec<String>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    meterline::core::set_error_handler(move |err| sink.lock().push(err.to_string()));
    seen
}
