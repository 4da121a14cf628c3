//! Per-reader pipelines: instrument resolution, aggregator caching and the
//! collection sweep.
//!
//! A [`Pipeline`] exists for every registered reader. Creating an instrument
//! resolves it against the pipeline's views into zero or more streams, each
//! backed by one cached aggregator. Collecting runs the registered callbacks
//! and then asks every aggregator for its data, in registration order.

mod cache;
mod conflict;

pub(crate) use conflict::ConflictTracker;

use crate::aggregate::{AggregateBuilder, ComputeAggregation, Measure, Number};
use crate::core::diagnostics::handle_error;
use crate::core::{Context, InstrumentationScope, MetricsError, Resource, Result};
use crate::data::{Metric, ResourceMetrics, ScopeMetrics};
use crate::exemplar::{default_reservoir, ExemplarFilter, ExemplarSettings};
use crate::instrument::{Instrument, InstrumentKind};
use crate::reader::MetricReader;
use crate::view::{default_aggregation, Aggregation, Stream, View};
use cache::Cache;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A multi-instrument callback run at the start of every collection
pub type Callback = Arc<dyn Fn(&Context) -> Result<()> + Send + Sync>;

/// Identity of an output stream within one pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StreamId {
    pub(crate) scope: InstrumentationScope,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) unit: String,
    pub(crate) kind: InstrumentKind,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (kind={:?}, unit={:?}, description={:?})",
            self.scope.name, self.name, self.kind, self.unit, self.description
        )
    }
}

/// Collection-side handle of one stream
#[derive(Clone)]
struct InstrumentSync {
    name: String,
    description: String,
    unit: String,
    compute: Arc<dyn ComputeAggregation>,
}

struct ScopeInstruments {
    scope: InstrumentationScope,
    instruments: Vec<InstrumentSync>,
}

#[derive(Default)]
struct Registry {
    scopes: Vec<ScopeInstruments>,
    callbacks: Vec<(u64, Callback)>,
}

/// Aggregators shared across instruments resolving to the same stream.
/// `None` records a stream whose aggregation is `Drop`.
type AggregatorSlot = Option<Arc<dyn Any + Send + Sync>>;

/// The instruments, streams and callbacks feeding one reader
pub struct Pipeline {
    resource: Resource,
    reader: Arc<dyn MetricReader>,
    views: Arc<[View]>,
    exemplar_filter: ExemplarFilter,
    cardinality_limit: usize,
    aggregators: Cache<StreamId, AggregatorSlot>,
    registry: Mutex<Registry>,
    collect_lock: Mutex<()>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("resource", &self.resource)
            .field("reader", &self.reader)
            .field("views", &self.views.len())
            .finish()
    }
}

impl Pipeline {
    pub(crate) fn new(
        resource: Resource,
        reader: Arc<dyn MetricReader>,
        views: Arc<[View]>,
        exemplar_filter: ExemplarFilter,
        cardinality_limit: usize,
    ) -> Self {
        Pipeline {
            resource,
            reader,
            views,
            exemplar_filter,
            cardinality_limit,
            aggregators: Cache::new(),
            registry: Mutex::new(Registry::default()),
            collect_lock: Mutex::new(()),
        }
    }

    pub(crate) fn reader(&self) -> &Arc<dyn MetricReader> {
        &self.reader
    }

    /// Resolves `inst` into the measures of every stream it feeds.
    ///
    /// Streams that fail to resolve are skipped and their errors joined into
    /// the returned result; the measures of the streams that did resolve are
    /// returned regardless.
    pub(crate) fn instrument<N: Number>(
        &self,
        inst: &Instrument,
        conflicts: &ConflictTracker,
    ) -> (Vec<Measure<N>>, Result<()>) {
        let mut seen = FxHashSet::default();
        let mut measures = Vec::new();
        let mut errors = Vec::new();
        let mut matched = false;

        for view in self.views.iter() {
            let Some(stream) = view.matches(inst) else {
                continue;
            };
            matched = true;
            match self.cached_aggregator::<N>(inst, &stream, &mut seen, conflicts) {
                Ok(Some(measure)) => measures.push(measure),
                Ok(None) => {},
                Err(e) => errors.push(e),
            }
        }

        if !matched {
            match self.cached_aggregator::<N>(inst, &Stream::default(), &mut seen, conflicts) {
                Ok(Some(measure)) => measures.push(measure),
                Ok(None) => {},
                Err(e) => errors.push(e),
            }
        }

        (measures, MetricsError::join(errors))
    }

    /// The resolved aggregation for a stream: the view's choice, else the
    /// reader's choice for the kind, else the kind's default
    fn aggregation(&self, kind: InstrumentKind, stream: &Stream) -> Aggregation {
        match &stream.aggregation {
            Some(aggregation) if *aggregation != Aggregation::Default => aggregation.clone(),
            _ => match self.reader.aggregation(kind) {
                Aggregation::Default => default_aggregation(kind),
                aggregation => aggregation,
            },
        }
    }

    fn cached_aggregator<N: Number>(
        &self,
        inst: &Instrument,
        stream: &Stream,
        seen: &mut FxHashSet<StreamId>,
        conflicts: &ConflictTracker,
    ) -> Result<Option<Measure<N>>> {
        let aggregation = self.aggregation(inst.kind, stream);
        aggregation.validate()?;
        if !aggregation.is_compatible_with(inst.kind) {
            return Err(MetricsError::IncompatibleAggregation {
                name: inst.name.clone(),
                kind: inst.kind,
                aggregation: aggregation.name().to_string(),
            });
        }

        let id = StreamId {
            scope: inst.scope.clone(),
            name: stream.name.clone().unwrap_or_else(|| inst.name.clone()),
            description: stream
                .description
                .clone()
                .unwrap_or_else(|| inst.description.clone()),
            unit: stream.unit.clone().unwrap_or_else(|| inst.unit.clone()),
            kind: inst.kind,
        };
        if !seen.insert(id.clone()) {
            return Ok(None);
        }

        conflicts.check(&id, N::NAME);

        // Selectors are user code and run before the cache lock is taken
        let reservoir = match &stream.exemplar_reservoir {
            Some(select) => select(&aggregation),
            None => default_reservoir(&aggregation),
        };
        let builder = AggregateBuilder::new(
            self.reader.temporality(inst.kind),
            stream.attribute_filter(),
            ExemplarSettings::new(self.exemplar_filter, reservoir),
            stream.cardinality_limit.unwrap_or(self.cardinality_limit),
        );

        let slot = self.aggregators.lookup(id.clone(), || {
            self.build_aggregator::<N>(&builder, inst.kind, &aggregation, &id)
        });
        match slot {
            None => Ok(None),
            Some(any) => any
                .downcast_ref::<Measure<N>>()
                .cloned()
                .map(Some)
                .ok_or_else(|| MetricsError::NumberTypeConflict(id.to_string())),
        }
    }

    fn build_aggregator<N: Number>(
        &self,
        builder: &AggregateBuilder,
        kind: InstrumentKind,
        aggregation: &Aggregation,
        id: &StreamId,
    ) -> AggregatorSlot {
        let (measure, compute) = match aggregation {
            Aggregation::Drop | Aggregation::Default => return None,
            Aggregation::Sum if kind.is_precomputed() => {
                builder.precomputed_sum::<N>(kind.is_monotonic())
            },
            Aggregation::Sum => builder.sum::<N>(kind.is_monotonic()),
            Aggregation::LastValue if kind.is_precomputed() => {
                builder.precomputed_last_value::<N>()
            },
            Aggregation::LastValue => builder.last_value::<N>(),
            Aggregation::ExplicitBucketHistogram {
                boundaries,
                record_min_max,
            } => builder.explicit_bucket_histogram::<N>(
                boundaries.clone(),
                *record_min_max,
                kind.has_histogram_sum(),
            ),
            Aggregation::Base2ExponentialHistogram {
                max_size,
                max_scale,
                record_min_max,
            } => builder.exponential_histogram::<N>(
                *max_size,
                *max_scale,
                *record_min_max,
                kind.has_histogram_sum(),
            ),
        };

        self.add_sync(
            &id.scope,
            InstrumentSync {
                name: id.name.clone(),
                description: id.description.clone(),
                unit: id.unit.clone(),
                compute,
            },
        );
        Some(Arc::new(measure))
    }

    fn add_sync(&self, scope: &InstrumentationScope, inst: InstrumentSync) {
        let mut registry = self.registry.lock();
        match registry.scopes.iter_mut().find(|s| s.scope == *scope) {
            Some(entry) => entry.instruments.push(inst),
            None => registry.scopes.push(ScopeInstruments {
                scope: scope.clone(),
                instruments: vec![inst],
            }),
        }
    }

    pub(crate) fn add_callback(&self, id: u64, callback: Callback) {
        self.registry.lock().callbacks.push((id, callback));
    }

    pub(crate) fn remove_callback(&self, id: u64) {
        self.registry.lock().callbacks.retain(|(cid, _)| *cid != id);
    }

    /// Runs every callback, then fills `rm` with the data of every stream.
    ///
    /// Callback failures are reported through the error handler and do not
    /// stop the sweep. If `ctx` is cancelled or expires part way through,
    /// `rm` is cleared and the context error returned. Streams with no data
    /// points are left out, as are scopes with no streams left.
    pub fn produce(&self, ctx: &Context, rm: &mut ResourceMetrics) -> Result<()> {
        if let Some(e) = ctx.err() {
            rm.clear();
            return Err(e);
        }
        let _collecting = self.collect_lock.lock();

        let (callbacks, scopes) = {
            let registry = self.registry.lock();
            let callbacks: Vec<Callback> = registry
                .callbacks
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect();
            let scopes: Vec<(InstrumentationScope, Vec<InstrumentSync>)> = registry
                .scopes
                .iter()
                .map(|s| (s.scope.clone(), s.instruments.clone()))
                .collect();
            (callbacks, scopes)
        };

        for callback in callbacks {
            if let Err(e) = callback(ctx) {
                handle_error(e);
            }
            if let Some(e) = ctx.err() {
                rm.clear();
                return Err(e);
            }
        }

        rm.resource = self.resource.clone();
        // Streams keep their order between sweeps, so the previous snapshot
        // is matched in order and its allocations handed back to the streams
        let mut previous = std::mem::take(&mut rm.scope_metrics).into_iter().peekable();
        for (scope, instruments) in scopes {
            let mut reusable = previous
                .next_if(|sm| sm.scope == scope)
                .map(|sm| sm.metrics)
                .unwrap_or_default()
                .into_iter()
                .peekable();
            let mut metrics = Vec::with_capacity(instruments.len());
            for inst in instruments {
                if let Some(e) = ctx.err() {
                    rm.clear();
                    return Err(e);
                }
                let mut data = reusable.next_if(|m| m.name == inst.name).map(|m| m.data);
                if inst.compute.compute(&mut data) == 0 {
                    continue;
                }
                if let Some(data) = data {
                    metrics.push(Metric {
                        name: inst.name,
                        description: inst.description,
                        unit: inst.unit,
                        data,
                    });
                }
            }
            if !metrics.is_empty() {
                rm.scope_metrics.push(ScopeMetrics { scope, metrics });
            }
        }

        Ok(())
    }
}

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a registered callback
#[derive(Debug)]
pub struct Registration {
    id: u64,
    pipelines: Vec<Weak<Pipeline>>,
}

impl Registration {
    /// Removes the callback from every pipeline; later collections no longer
    /// run it
    pub fn unregister(self) {
        for pipeline in self.pipelines.iter().filter_map(Weak::upgrade) {
            pipeline.remove_callback(self.id);
        }
    }
}

/// Every pipeline of one provider
pub(crate) struct Pipelines {
    pipelines: Vec<Arc<Pipeline>>,
    conflicts: ConflictTracker,
}

impl Pipelines {
    pub(crate) fn new(
        resource: Resource,
        readers: Vec<Arc<dyn MetricReader>>,
        views: Vec<View>,
        exemplar_filter: ExemplarFilter,
        cardinality_limit: usize,
    ) -> Self {
        let views: Arc<[View]> = views.into();
        let pipelines = readers
            .into_iter()
            .map(|reader| {
                let pipeline = Arc::new(Pipeline::new(
                    resource.clone(),
                    Arc::clone(&reader),
                    Arc::clone(&views),
                    exemplar_filter,
                    cardinality_limit,
                ));
                reader.register_pipeline(Arc::downgrade(&pipeline));
                pipeline
            })
            .collect();

        Pipelines {
            pipelines,
            conflicts: ConflictTracker::new(),
        }
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Pipeline>> {
        self.pipelines.iter()
    }

    /// Resolves `inst` in every pipeline
    pub(crate) fn resolve<N: Number>(&self, inst: &Instrument) -> (Vec<Measure<N>>, Result<()>) {
        let mut measures = Vec::new();
        let mut errors = Vec::new();
        for pipeline in &self.pipelines {
            let (found, result) = pipeline.instrument::<N>(inst, &self.conflicts);
            measures.extend(found);
            if let Err(e) = result {
                errors.push(e);
            }
        }
        (measures, MetricsError::join(errors))
    }

    pub(crate) fn register_callback(&self, callback: Callback) -> Registration {
        let id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
        for pipeline in &self.pipelines {
            pipeline.add_callback(id, Arc::clone(&callback));
        }
        Registration {
            id,
            pipelines: self.pipelines.iter().map(Arc::downgrade).collect(),
        }
    }
}
