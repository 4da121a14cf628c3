//! Readers pull aggregated data out of a pipeline.
//!
//! [`ManualReader`] collects on demand. [`PeriodicReader`] collects on a
//! timer and hands each snapshot to a [`PushExporter`]. Both can merge data
//! from external [`MetricProducer`]s into what the SDK produced.

mod manual;
mod periodic;

pub use manual::{ManualReader, ManualReaderBuilder};
pub use periodic::{PeriodicReader, PeriodicReaderBuilder};

use crate::core::diagnostics::handle_error;
use crate::core::{Context, MetricsError, Result};
use crate::data::{ResourceMetrics, ScopeMetrics, Temporality};
use crate::instrument::InstrumentKind;
use crate::pipeline::Pipeline;
use crate::view::{default_aggregation, Aggregation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// Chooses the temporality of each instrument kind
pub type TemporalitySelector = Arc<dyn Fn(InstrumentKind) -> Temporality + Send + Sync>;

/// Chooses the default aggregation of each instrument kind
pub type AggregationSelector = Arc<dyn Fn(InstrumentKind) -> Aggregation + Send + Sync>;

/// Cumulative for every kind
pub fn cumulative_temporality(_kind: InstrumentKind) -> Temporality {
    Temporality::Cumulative
}

/// Delta for counters and histograms. Up-down counters and gauges stay
/// cumulative; a gauge reports its last value either way.
pub fn delta_temporality(kind: InstrumentKind) -> Temporality {
    match kind {
        InstrumentKind::Counter
        | InstrumentKind::Histogram
        | InstrumentKind::ObservableCounter => Temporality::Delta,
        InstrumentKind::UpDownCounter
        | InstrumentKind::ObservableUpDownCounter
        | InstrumentKind::Gauge
        | InstrumentKind::ObservableGauge => Temporality::Cumulative,
    }
}

/// Pulls aggregated data from the pipeline it is registered with
#[async_trait]
pub trait MetricReader: fmt::Debug + Send + Sync + 'static {
    /// Binds the reader to its pipeline. Called once by the provider; later
    /// calls are reported and ignored.
    fn register_pipeline(&self, pipeline: Weak<Pipeline>);

    fn temporality(&self, kind: InstrumentKind) -> Temporality;

    fn aggregation(&self, kind: InstrumentKind) -> Aggregation;

    /// Replaces the contents of `rm` with a fresh snapshot
    async fn collect(&self, ctx: &Context, rm: &mut ResourceMetrics) -> Result<()>;

    async fn force_flush(&self, ctx: &Context) -> Result<()>;

    /// Stops the reader. Every later call, including another shutdown,
    /// fails with [`MetricsError::ReaderShutdown`].
    async fn shutdown(&self, ctx: &Context) -> Result<()>;
}

/// A source of already-aggregated data merged into every collection
pub trait MetricProducer: Send + Sync {
    fn produce(&self, ctx: &Context) -> Result<Vec<ScopeMetrics>>;
}

/// Destination for periodic snapshots
#[async_trait]
pub trait PushExporter: Send + Sync + 'static {
    async fn export(&self, ctx: &Context, rm: &ResourceMetrics) -> Result<()>;

    async fn force_flush(&self, ctx: &Context) -> Result<()>;

    async fn shutdown(&self, ctx: &Context) -> Result<()>;

    fn temporality(&self, kind: InstrumentKind) -> Temporality {
        cumulative_temporality(kind)
    }

    fn aggregation(&self, kind: InstrumentKind) -> Aggregation {
        default_aggregation(kind)
    }
}

enum State {
    Unregistered,
    Registered(Weak<Pipeline>),
    Shutdown,
}

/// Registration and shutdown state shared by the built-in readers
pub(crate) struct ReaderState {
    state: Mutex<State>,
}

impl ReaderState {
    pub(crate) fn new() -> Self {
        ReaderState {
            state: Mutex::new(State::Unregistered),
        }
    }

    pub(crate) fn register(&self, pipeline: Weak<Pipeline>) {
        let duplicate = {
            let mut state = self.state.lock();
            match *state {
                State::Unregistered => {
                    *state = State::Registered(pipeline);
                    false
                },
                State::Registered(_) => true,
                State::Shutdown => {
                    tracing::debug!("ignoring pipeline registration on a shutdown reader");
                    false
                },
            }
        };
        if duplicate {
            handle_error(MetricsError::config(
                "reader is already registered with a pipeline, ignoring duplicate registration",
            ));
        }
    }

    /// The registered pipeline, if the reader is live
    pub(crate) fn pipeline(&self) -> Result<Arc<Pipeline>> {
        match &*self.state.lock() {
            State::Unregistered => Err(MetricsError::ReaderNotRegistered),
            State::Shutdown => Err(MetricsError::ReaderShutdown),
            State::Registered(weak) => weak.upgrade().ok_or(MetricsError::ReaderShutdown),
        }
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        matches!(*self.state.lock(), State::Shutdown)
    }

    /// Moves to the shutdown state, returning the pipeline that was
    /// registered. Fails if already shut down.
    pub(crate) fn shutdown(&self) -> Result<Option<Arc<Pipeline>>> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, State::Shutdown) {
            State::Shutdown => Err(MetricsError::ReaderShutdown),
            State::Unregistered => Ok(None),
            State::Registered(weak) => Ok(weak.upgrade()),
        }
    }
}

/// Appends the data of every producer to `rm`, returning their joined
/// errors. Data from producers that succeed is kept either way.
pub(crate) fn merge_producers(
    ctx: &Context,
    producers: &[Arc<dyn MetricProducer>],
    rm: &mut ResourceMetrics,
) -> Result<()> {
    let mut errors = Vec::new();
    for producer in producers {
        match producer.produce(ctx) {
            Ok(scope_metrics) => rm.scope_metrics.extend(scope_metrics),
            Err(e) => errors.push(match e {
                MetricsError::Producer(_) => e,
                other => MetricsError::producer(other.to_string()),
            }),
        }
    }
    MetricsError::join(errors)
}
