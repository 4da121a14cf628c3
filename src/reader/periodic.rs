//! Timer-driven collection and export.
//!
//! A [`PeriodicReader`] owns one background task. Every interval the task
//! collects a snapshot from the pipeline and hands it to the exporter. Export
//! cycles from the timer, from [`force_flush`](MetricReader::force_flush) and
//! from shutdown are serialized on the reader's snapshot buffer, so a flush
//! never races a tick.

use super::{merge_producers, MetricProducer, MetricReader, PushExporter, ReaderState};
use crate::core::config::ReaderConfig;
use crate::core::diagnostics::handle_error;
use crate::core::{Context, MetricsError, Result};
use crate::data::{ResourceMetrics, Temporality};
use crate::instrument::InstrumentKind;
use crate::pipeline::Pipeline;
use crate::view::Aggregation;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

type Selector<T> = Arc<dyn Fn(InstrumentKind) -> T + Send + Sync>;

/// Collects and exports on a fixed interval
pub struct PeriodicReader {
    inner: Arc<Inner>,
    worker: Mutex<Option<Worker>>,
    cancel: CancellationToken,
}

struct Inner {
    state: ReaderState,
    exporter: Arc<dyn PushExporter>,
    producers: Vec<Arc<dyn MetricProducer>>,
    temporality: Option<Selector<Temporality>>,
    aggregation: Option<Selector<Aggregation>>,
    timeout: Duration,
    // Serializes export cycles and is reused between them.
    buffer: tokio::sync::Mutex<ResourceMetrics>,
}

struct Worker {
    handle: JoinHandle<()>,
}

impl fmt::Debug for PeriodicReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicReader")
            .field("timeout", &self.inner.timeout)
            .field("shutdown", &self.inner.state.is_shutdown())
            .finish()
    }
}

impl PeriodicReader {
    pub fn builder<E: PushExporter>(exporter: E) -> PeriodicReaderBuilder {
        PeriodicReaderBuilder::new(Arc::new(exporter))
    }
}

/// Configures a [`PeriodicReader`]
pub struct PeriodicReaderBuilder {
    exporter: Arc<dyn PushExporter>,
    interval: Duration,
    timeout: Duration,
    producers: Vec<Arc<dyn MetricProducer>>,
    temporality: Option<Selector<Temporality>>,
    aggregation: Option<Selector<Aggregation>>,
}

impl PeriodicReaderBuilder {
    fn new(exporter: Arc<dyn PushExporter>) -> Self {
        let defaults = ReaderConfig::default();
        PeriodicReaderBuilder {
            exporter,
            interval: defaults.interval,
            timeout: defaults.timeout,
            producers: Vec::new(),
            temporality: None,
            aggregation: None,
        }
    }

    /// Takes the interval and timeout from configuration
    pub fn with_config(mut self, config: &ReaderConfig) -> Self {
        self.interval = config.interval;
        self.timeout = config.timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Bound on each collect+export cycle
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_producer(mut self, producer: impl MetricProducer + 'static) -> Self {
        self.producers.push(Arc::new(producer));
        self
    }

    /// Overrides the exporter's temporality preference
    pub fn with_temporality_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(InstrumentKind) -> Temporality + Send + Sync + 'static,
    {
        self.temporality = Some(Arc::new(selector));
        self
    }

    /// Overrides the exporter's aggregation preference
    pub fn with_aggregation_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(InstrumentKind) -> Aggregation + Send + Sync + 'static,
    {
        self.aggregation = Some(Arc::new(selector));
        self
    }

    /// Starts the background task on the current tokio runtime.
    ///
    /// Fails outside a runtime or when the interval or timeout is zero.
    pub fn build(self) -> Result<PeriodicReader> {
        if self.interval.is_zero() {
            return Err(MetricsError::config("periodic reader interval must be greater than 0"));
        }
        if self.timeout.is_zero() {
            return Err(MetricsError::config("periodic reader timeout must be greater than 0"));
        }
        let runtime = Handle::try_current().map_err(|e| {
            MetricsError::config(format!("periodic reader requires a tokio runtime: {}", e))
        })?;

        let inner = Arc::new(Inner {
            state: ReaderState::new(),
            exporter: self.exporter,
            producers: self.producers,
            temporality: self.temporality,
            aggregation: self.aggregation,
            timeout: self.timeout,
            buffer: tokio::sync::Mutex::new(ResourceMetrics::default()),
        });

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(run(Arc::clone(&inner), self.interval, cancel.clone()));
        tracing::debug!(interval = ?self.interval, timeout = ?self.timeout, "started periodic reader");

        Ok(PeriodicReader {
            inner,
            worker: Mutex::new(Some(Worker { handle })),
            cancel,
        })
    }
}

async fn run(inner: Arc<Inner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {},
        }

        let pipeline = match inner.state.pipeline() {
            Ok(pipeline) => pipeline,
            Err(MetricsError::ReaderNotRegistered) => {
                tracing::debug!("periodic reader not registered yet, skipping tick");
                continue;
            },
            Err(_) => break,
        };

        let ctx = Context::new().with_timeout(inner.timeout);
        if let Err(e) = inner.export_cycle(&pipeline, &ctx).await {
            handle_error(e);
        }
    }
    tracing::debug!("periodic reader task stopped");
}

impl Inner {
    /// Collects into the shared buffer and exports it. Producer failures are
    /// reported after the export, which goes ahead with whatever data the
    /// pipeline and the other producers gave.
    async fn export_cycle(&self, pipeline: &Pipeline, ctx: &Context) -> Result<()> {
        let mut rm = self.buffer.lock().await;
        pipeline.produce(ctx, &mut rm)?;
        let produced = merge_producers(ctx, &self.producers, &mut rm);

        tracing::debug!(metrics = rm.metric_count(), "exporting snapshot");
        // The buffer keeps its data so the next cycle can refill it in place
        let exported = ctx.run(self.exporter.export(ctx, &rm)).await;

        let errors: Vec<MetricsError> = [produced.err(), exported.err()]
            .into_iter()
            .flatten()
            .collect();
        MetricsError::join(errors)
    }
}

#[async_trait]
impl MetricReader for PeriodicReader {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        self.inner.state.register(pipeline);
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        match &self.inner.temporality {
            Some(select) => select(kind),
            None => self.inner.exporter.temporality(kind),
        }
    }

    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        match &self.inner.aggregation {
            Some(select) => select(kind),
            None => self.inner.exporter.aggregation(kind),
        }
    }

    async fn collect(&self, ctx: &Context, rm: &mut ResourceMetrics) -> Result<()> {
        let pipeline = self.inner.state.pipeline()?;
        pipeline.produce(ctx, rm)?;
        merge_producers(ctx, &self.inner.producers, rm)
    }

    /// Runs one collect+export cycle now and flushes the exporter, returning
    /// any failure to the caller
    async fn force_flush(&self, ctx: &Context) -> Result<()> {
        let pipeline = self.inner.state.pipeline()?;
        let ctx = ctx.clone().with_timeout(self.inner.timeout);
        self.inner.export_cycle(&pipeline, &ctx).await?;
        ctx.run(self.inner.exporter.force_flush(&ctx)).await
    }

    /// Stops the timer, waits for a cycle in progress, then exports one last
    /// snapshot and shuts the exporter down
    async fn shutdown(&self, ctx: &Context) -> Result<()> {
        if self.inner.state.is_shutdown() {
            return Err(MetricsError::ReaderShutdown);
        }

        self.cancel.cancel();
        let worker = self.worker.lock().take();
        let mut errors = Vec::new();
        if let Some(worker) = worker {
            if let Err(e) = worker.handle.await {
                errors.push(MetricsError::Join(e.to_string()));
            }
        }

        let pipeline = self.inner.state.shutdown()?;
        let ctx = ctx.clone().with_timeout(self.inner.timeout);
        if let Some(pipeline) = pipeline {
            if let Err(e) = self.inner.export_cycle(&pipeline, &ctx).await {
                errors.push(e);
            }
        }
        if let Err(e) = ctx.run(self.inner.exporter.shutdown(&ctx)).await {
            errors.push(e);
        }
        MetricsError::join(errors)
    }
}

impl Drop for PeriodicReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        exports: AtomicUsize,
        shutdowns: AtomicUsize,
    }

    #[async_trait]
    impl PushExporter for Arc<Counting> {
        async fn export(&self, _ctx: &Context, _rm: &ResourceMetrics) -> Result<()> {
            self.exports.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn force_flush(&self, _ctx: &Context) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self, _ctx: &Context) -> Result<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = PeriodicReader::builder(Arc::new(Counting::default()))
            .build()
            .unwrap_err();
        assert!(matches!(err, MetricsError::Config(_)));
    }

    #[tokio::test]
    async fn test_rejects_zero_interval() {
        let err = PeriodicReader::builder(Arc::new(Counting::default()))
            .with_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        assert!(matches!(err, MetricsError::Config(_)));
    }

    #[tokio::test]
    async fn test_unregistered_flush_fails() {
        let reader = PeriodicReader::builder(Arc::new(Counting::default()))
            .build()
            .unwrap();
        let err = reader.force_flush(&Context::new()).await.unwrap_err();
        assert!(matches!(err, MetricsError::ReaderNotRegistered));
    }

    #[tokio::test]
    async fn test_shutdown_twice() {
        let exporter = Arc::new(Counting::default());
        let reader = PeriodicReader::builder(Arc::clone(&exporter))
            .with_interval(Duration::from_millis(10))
            .build()
            .unwrap();
        let ctx = Context::new();

        reader.shutdown(&ctx).await.unwrap();
        assert!(matches!(reader.shutdown(&ctx).await, Err(MetricsError::ReaderShutdown)));
        assert_eq!(exporter.shutdowns.load(Ordering::SeqCst), 1);
        // Never registered, so nothing was exported
        assert_eq!(exporter.exports.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exporter_selectors_used_unless_overridden() {
        let reader = PeriodicReader::builder(Arc::new(Counting::default()))
            .build()
            .unwrap();
        assert_eq!(reader.temporality(InstrumentKind::Counter), Temporality::Cumulative);

        let reader = PeriodicReader::builder(Arc::new(Counting::default()))
            .with_temporality_selector(super::super::delta_temporality)
            .build()
            .unwrap();
        assert_eq!(reader.temporality(InstrumentKind::Counter), Temporality::Delta);
    }
}
