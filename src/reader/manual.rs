use super::{
    cumulative_temporality, merge_producers, AggregationSelector, MetricProducer, MetricReader,
    ReaderState, TemporalitySelector,
};
use crate::core::{Context, MetricsError, Result};
use crate::data::{ResourceMetrics, Temporality};
use crate::instrument::InstrumentKind;
use crate::pipeline::Pipeline;
use crate::view::{default_aggregation, Aggregation};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Weak};

/// A reader that collects only when asked to
///
/// `collect` runs one sweep of the pipeline on the caller's task.
pub struct ManualReader {
    state: ReaderState,
    temporality: TemporalitySelector,
    aggregation: AggregationSelector,
    producers: Vec<Arc<dyn MetricProducer>>,
}

impl fmt::Debug for ManualReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualReader")
            .field("shutdown", &self.state.is_shutdown())
            .field("producers", &self.producers.len())
            .finish()
    }
}

impl ManualReader {
    pub fn builder() -> ManualReaderBuilder {
        ManualReaderBuilder::default()
    }
}

/// Configures a [`ManualReader`]
pub struct ManualReaderBuilder {
    temporality: TemporalitySelector,
    aggregation: AggregationSelector,
    producers: Vec<Arc<dyn MetricProducer>>,
}

impl Default for ManualReaderBuilder {
    fn default() -> Self {
        ManualReaderBuilder {
            temporality: Arc::new(cumulative_temporality),
            aggregation: Arc::new(default_aggregation),
            producers: Vec::new(),
        }
    }
}

impl ManualReaderBuilder {
    /// Uses `temporality` for every instrument kind
    pub fn with_temporality(self, temporality: Temporality) -> Self {
        self.with_temporality_selector(move |_| temporality)
    }

    pub fn with_temporality_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(InstrumentKind) -> Temporality + Send + Sync + 'static,
    {
        self.temporality = Arc::new(selector);
        self
    }

    pub fn with_aggregation_selector<F>(mut self, selector: F) -> Self
    where
        F: Fn(InstrumentKind) -> Aggregation + Send + Sync + 'static,
    {
        self.aggregation = Arc::new(selector);
        self
    }

    /// Adds an external source whose data is appended to every collection
    pub fn with_producer(mut self, producer: impl MetricProducer + 'static) -> Self {
        self.producers.push(Arc::new(producer));
        self
    }

    pub fn build(self) -> ManualReader {
        ManualReader {
            state: ReaderState::new(),
            temporality: self.temporality,
            aggregation: self.aggregation,
            producers: self.producers,
        }
    }
}

#[async_trait]
impl MetricReader for ManualReader {
    fn register_pipeline(&self, pipeline: Weak<Pipeline>) {
        self.state.register(pipeline);
    }

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        (self.temporality)(kind)
    }

    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        (self.aggregation)(kind)
    }

    async fn collect(&self, ctx: &Context, rm: &mut ResourceMetrics) -> Result<()> {
        let pipeline = self.state.pipeline()?;
        pipeline.produce(ctx, rm)?;
        merge_producers(ctx, &self.producers, rm)
    }

    async fn force_flush(&self, _ctx: &Context) -> Result<()> {
        if self.state.is_shutdown() {
            return Err(MetricsError::ReaderShutdown);
        }
        Ok(())
    }

    async fn shutdown(&self, _ctx: &Context) -> Result<()> {
        self.state.shutdown().map(|_| ())
    }
}
