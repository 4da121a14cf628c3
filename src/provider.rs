//! Entry point for instrumented code.
//!
//! A [`MeterProvider`] owns one pipeline per reader. [`Meter`]s handed out by
//! the provider create instruments whose measurements flow into every
//! pipeline.

use crate::aggregate::{Measure, Number};
use crate::core::config::{Config, DEFAULT_CARDINALITY_LIMIT};
use crate::core::diagnostics::handle_error;
use crate::core::{Context, InstrumentationScope, MetricsError, Resource, Result};
use crate::exemplar::ExemplarFilter;
use crate::instrument::{
    validate_name, Counter, Gauge, Histogram, Instrument, InstrumentConfig, InstrumentKind,
    Observable, UpDownCounter,
};
use crate::pipeline::{Pipelines, Registration};
use crate::reader::MetricReader;
use crate::view::View;
use std::fmt;
use std::sync::Arc;

/// Creates meters and fans lifecycle calls out to every reader
#[derive(Clone)]
pub struct MeterProvider {
    pipelines: Arc<Pipelines>,
}

impl fmt::Debug for MeterProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeterProvider")
            .field("readers", &self.pipelines.iter().count())
            .finish()
    }
}

impl Default for MeterProvider {
    /// A provider without readers; its instruments record nothing
    fn default() -> Self {
        MeterProvider::builder().build()
    }
}

impl MeterProvider {
    pub fn builder() -> MeterProviderBuilder {
        MeterProviderBuilder::default()
    }

    /// A meter for the named instrumentation scope
    pub fn meter(&self, name: impl Into<String>) -> Meter {
        self.meter_with_scope(InstrumentationScope::new(name))
    }

    pub fn meter_with_scope(&self, scope: InstrumentationScope) -> Meter {
        Meter {
            scope,
            pipelines: Arc::clone(&self.pipelines),
        }
    }

    /// Flushes every reader, joining their errors
    pub async fn force_flush(&self, ctx: &Context) -> Result<()> {
        let mut errors = Vec::new();
        for pipeline in self.pipelines.iter() {
            if let Err(e) = pipeline.reader().force_flush(ctx).await {
                errors.push(e);
            }
        }
        MetricsError::join(errors)
    }

    /// Shuts down every reader, joining their errors
    pub async fn shutdown(&self, ctx: &Context) -> Result<()> {
        let mut errors = Vec::new();
        for pipeline in self.pipelines.iter() {
            if let Err(e) = pipeline.reader().shutdown(ctx).await {
                errors.push(e);
            }
        }
        MetricsError::join(errors)
    }
}

/// Configures a [`MeterProvider`]
pub struct MeterProviderBuilder {
    resource: Resource,
    readers: Vec<Arc<dyn MetricReader>>,
    views: Vec<View>,
    exemplar_filter: ExemplarFilter,
    cardinality_limit: usize,
}

impl Default for MeterProviderBuilder {
    fn default() -> Self {
        MeterProviderBuilder {
            resource: Resource::default(),
            readers: Vec::new(),
            views: Vec::new(),
            exemplar_filter: ExemplarFilter::default(),
            cardinality_limit: DEFAULT_CARDINALITY_LIMIT,
        }
    }
}

impl MeterProviderBuilder {
    /// Adds a reader. Each reader gets its own pipeline and sees every
    /// instrument independently of the others.
    pub fn with_reader(mut self, reader: Arc<dyn MetricReader>) -> Self {
        self.readers.push(reader);
        self
    }

    /// Adds a view. Views apply in the order they were added.
    pub fn with_view(mut self, view: View) -> Self {
        self.views.push(view);
        self
    }

    pub fn with_resource(mut self, resource: Resource) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_exemplar_filter(mut self, filter: ExemplarFilter) -> Self {
        self.exemplar_filter = filter;
        self
    }

    /// Default distinct attribute sets per stream, 0 for unlimited
    pub fn with_cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = limit;
        self
    }

    /// Applies the exemplar filter and cardinality limit from `config`
    pub fn with_config(self, config: &Config) -> Self {
        self.with_exemplar_filter(config.exemplar.filter)
            .with_cardinality_limit(config.cardinality_limit)
    }

    pub fn build(self) -> MeterProvider {
        tracing::debug!(
            readers = self.readers.len(),
            views = self.views.len(),
            "building meter provider"
        );
        MeterProvider {
            pipelines: Arc::new(Pipelines::new(
                self.resource,
                self.readers,
                self.views,
                self.exemplar_filter,
                self.cardinality_limit,
            )),
        }
    }
}

/// Creates instruments for one instrumentation scope
///
/// Creating an instrument never fails. Problems found while resolving it
/// (an invalid name, an aggregation that does not fit the instrument kind,
/// a conflicting stream definition) are reported through the error handler
/// and the instrument records into whatever streams did resolve.
#[derive(Clone)]
pub struct Meter {
    scope: InstrumentationScope,
    pipelines: Arc<Pipelines>,
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter").field("scope", &self.scope).finish()
    }
}

impl Meter {
    pub fn scope(&self) -> &InstrumentationScope {
        &self.scope
    }

    fn resolve<N: Number>(
        &self,
        config: impl Into<InstrumentConfig>,
        kind: InstrumentKind,
    ) -> (String, Vec<Measure<N>>) {
        let config = config.into();
        if let Err(msg) = validate_name(&config.name) {
            handle_error(MetricsError::InvalidInstrument(msg));
        }

        let inst = Instrument {
            name: config.name,
            description: config.description,
            kind,
            unit: config.unit,
            scope: self.scope.clone(),
        };
        let (measures, result) = self.pipelines.resolve::<N>(&inst);
        if let Err(e) = result {
            handle_error(e);
        }
        tracing::debug!(
            instrument = %inst.name,
            kind = ?kind,
            number = N::NAME,
            streams = measures.len(),
            "created instrument"
        );
        (inst.name, measures)
    }

    pub fn counter<N: Number>(&self, config: impl Into<InstrumentConfig>) -> Counter<N> {
        let (name, measures) = self.resolve::<N>(config, InstrumentKind::Counter);
        Counter::new(&name, true, measures)
    }

    pub fn up_down_counter<N: Number>(&self, config: impl Into<InstrumentConfig>) -> UpDownCounter<N> {
        let (name, measures) = self.resolve::<N>(config, InstrumentKind::UpDownCounter);
        UpDownCounter::new(&name, false, measures)
    }

    /// A histogram; negative values are dropped
    pub fn histogram<N: Number>(&self, config: impl Into<InstrumentConfig>) -> Histogram<N> {
        let (name, measures) = self.resolve::<N>(config, InstrumentKind::Histogram);
        Histogram::new(&name, true, measures)
    }

    pub fn gauge<N: Number>(&self, config: impl Into<InstrumentConfig>) -> Gauge<N> {
        let (name, measures) = self.resolve::<N>(config, InstrumentKind::Gauge);
        Gauge::new(&name, false, measures)
    }

    /// An observable counter. Observe it from a callback registered with
    /// [`Meter::register_callback`]; observations are cumulative totals.
    pub fn observable_counter<N: Number>(&self, config: impl Into<InstrumentConfig>) -> Observable<N> {
        self.observable(config, InstrumentKind::ObservableCounter)
    }

    pub fn observable_up_down_counter<N: Number>(
        &self,
        config: impl Into<InstrumentConfig>,
    ) -> Observable<N> {
        self.observable(config, InstrumentKind::ObservableUpDownCounter)
    }

    pub fn observable_gauge<N: Number>(&self, config: impl Into<InstrumentConfig>) -> Observable<N> {
        self.observable(config, InstrumentKind::ObservableGauge)
    }

    fn observable<N: Number>(
        &self,
        config: impl Into<InstrumentConfig>,
        kind: InstrumentKind,
    ) -> Observable<N> {
        let (name, measures) = self.resolve::<N>(config, kind);
        Observable::new(&name, kind, measures)
    }

    /// Registers a callback run at the start of every collection, on every
    /// reader
    pub fn register_callback<F>(&self, callback: F) -> Registration
    where
        F: Fn(&Context) -> Result<()> + Send + Sync + 'static,
    {
        self.pipelines.register_callback(Arc::new(callback))
    }
}

/// Process-wide default provider
pub mod global {
    use super::{Meter, MeterProvider};
    use once_cell::sync::Lazy;
    use parking_lot::RwLock;

    static PROVIDER: Lazy<RwLock<MeterProvider>> = Lazy::new(|| RwLock::new(MeterProvider::default()));

    /// Installs `provider` as the process default, returning the previous one
    pub fn set_meter_provider(provider: MeterProvider) -> MeterProvider {
        std::mem::replace(&mut *PROVIDER.write(), provider)
    }

    /// The process default provider. Until one is set, a provider without
    /// readers.
    pub fn meter_provider() -> MeterProvider {
        PROVIDER.read().clone()
    }

    pub fn meter(name: impl Into<String>) -> Meter {
        meter_provider().meter(name)
    }
}
