//! Aggregators: per-stream state that turns raw measurements into data
//! points.
//!
//! Every aggregator is split into two capabilities that share one state:
//! a [`Measure`] held by instrument handles (the hot path) and a
//! [`ComputeAggregation`] held by the pipeline (the collection path). For an
//! attribute set already in the map, recording takes only a read lock on the
//! map and updates per-set state with atomics or a per-set lock.

mod exponential_histogram;
mod histogram;
mod last_value;
mod number;
mod sum;
mod value_map;

pub use number::{AtomicF64, AtomicTracker, Number};

use crate::core::{AttributeSet, Context, KeyValue};
use crate::data::{AggregatedMetrics, Exemplar, MetricData, Temporality};
use crate::exemplar::ExemplarSettings;
use crate::view::AttributeFilter;
use std::sync::Arc;

/// Measurement and collection behavior of one stream
pub(crate) trait Aggregator<N>: Send + Sync + 'static {
    /// Folds a measurement into the state for `attrs`. `dropped` holds the
    /// attributes removed by the stream's filter, kept for exemplars.
    fn aggregate(&self, ctx: &Context, value: N, attrs: &AttributeSet, dropped: &[KeyValue]);

    /// Writes the current data into `dest`, reusing its allocation when it
    /// already holds data of the same shape, and returns the number of data
    /// points written. Delta aggregators reset their state here.
    fn collect(&self, dest: &mut Option<MetricData<N>>) -> usize;
}

/// Hot-path handle to one stream's aggregator
pub(crate) struct Measure<N> {
    aggregator: Arc<dyn Aggregator<N>>,
    filter: Option<AttributeFilter>,
}

impl<N> Clone for Measure<N> {
    fn clone(&self) -> Self {
        Measure {
            aggregator: Arc::clone(&self.aggregator),
            filter: self.filter.clone(),
        }
    }
}

impl<N: Number> Measure<N> {
    pub(crate) fn record(&self, ctx: &Context, value: N, attrs: &AttributeSet) {
        match &self.filter {
            None => self.aggregator.aggregate(ctx, value, attrs, &[]),
            Some(filter) => {
                let (kept, dropped) = attrs.split(|kv| filter.keeps(kv));
                self.aggregator.aggregate(ctx, value, &kept, &dropped);
            },
        }
    }
}

/// Exemplar buffers of the points a previous collection left in the
/// destination, handed back out in order so reservoirs refill them in place
pub(super) struct SpareExemplars<N>(Vec<Vec<Exemplar<N>>>);

impl<N> Default for SpareExemplars<N> {
    fn default() -> Self {
        SpareExemplars(Vec::new())
    }
}

impl<N> SpareExemplars<N> {
    pub(super) fn take<P>(points: &mut Vec<P>, buffer: impl FnMut(P) -> Vec<Exemplar<N>>) -> Self {
        let mut spare: Vec<_> = points.drain(..).map(buffer).collect();
        spare.reverse();
        SpareExemplars(spare)
    }

    pub(super) fn next(&mut self) -> Vec<Exemplar<N>> {
        self.0.pop().unwrap_or_default()
    }
}

/// Collection-path handle with the number type erased
pub(crate) trait ComputeAggregation: Send + Sync {
    fn compute(&self, dest: &mut Option<AggregatedMetrics>) -> usize;
}

struct Collector<N>(Arc<dyn Aggregator<N>>);

impl<N: Number> ComputeAggregation for Collector<N> {
    fn compute(&self, dest: &mut Option<AggregatedMetrics>) -> usize {
        let mut data = dest.take().and_then(N::unwrap);
        let count = self.0.collect(&mut data);
        *dest = data.map(N::wrap);
        count
    }
}

/// Stream-level settings shared by every aggregator kind
#[derive(Debug, Clone)]
pub(crate) struct AggregateBuilder {
    temporality: Temporality,
    filter: Option<AttributeFilter>,
    exemplars: ExemplarSettings,
    cardinality_limit: usize,
}

pub(crate) type Built<N> = (Measure<N>, Arc<dyn ComputeAggregation>);

impl AggregateBuilder {
    pub(crate) fn new(
        temporality: Temporality,
        filter: Option<AttributeFilter>,
        exemplars: ExemplarSettings,
        cardinality_limit: usize,
    ) -> Self {
        AggregateBuilder {
            temporality,
            filter,
            exemplars,
            cardinality_limit,
        }
    }

    fn finish<N: Number>(&self, aggregator: impl Aggregator<N>) -> Built<N> {
        let aggregator: Arc<dyn Aggregator<N>> = Arc::new(aggregator);
        let measure = Measure {
            aggregator: Arc::clone(&aggregator),
            filter: self.filter.clone(),
        };
        (measure, Arc::new(Collector(aggregator)))
    }

    fn values<N: Number, T: Send + Sync + 'static>(
        &self,
        new_tracker: impl Fn() -> T + Send + Sync + 'static,
    ) -> value_map::ValueMap<N, T> {
        value_map::ValueMap::new(self.cardinality_limit, self.exemplars.clone(), new_tracker)
    }

    /// Sum of synchronous increments
    pub(crate) fn sum<N: Number>(&self, monotonic: bool) -> Built<N> {
        self.finish(sum::Sum::new(
            self.values(|| N::Atomic::new(N::default())),
            self.temporality,
            monotonic,
        ))
    }

    /// Sum of observed totals; each observation replaces the last
    pub(crate) fn precomputed_sum<N: Number>(&self, monotonic: bool) -> Built<N> {
        self.finish(sum::PrecomputedSum::new(
            self.values(value_map::Observed::new),
            self.temporality,
            monotonic,
        ))
    }

    /// Latest synchronously recorded value
    pub(crate) fn last_value<N: Number>(&self) -> Built<N> {
        self.finish(last_value::LastValue::new(
            self.values(value_map::Observed::new),
            self.temporality,
            false,
        ))
    }

    /// Latest observed value, reported only for the current cycle
    pub(crate) fn precomputed_last_value<N: Number>(&self) -> Built<N> {
        self.finish(last_value::LastValue::new(
            self.values(value_map::Observed::new),
            self.temporality,
            true,
        ))
    }

    pub(crate) fn explicit_bucket_histogram<N: Number>(
        &self,
        boundaries: Vec<f64>,
        record_min_max: bool,
        record_sum: bool,
    ) -> Built<N> {
        let buckets = boundaries.len() + 1;
        self.finish(histogram::Histogram::new(
            self.values(move || histogram::new_buckets::<N>(buckets)),
            boundaries,
            self.temporality,
            record_min_max,
            record_sum,
        ))
    }

    pub(crate) fn exponential_histogram<N: Number>(
        &self,
        max_size: u32,
        max_scale: i8,
        record_min_max: bool,
        record_sum: bool,
    ) -> Built<N> {
        self.finish(exponential_histogram::ExponentialHistogram::new(
            self.values(move || exponential_histogram::new_point::<N>(max_size, max_scale)),
            max_size,
            max_scale,
            self.temporality,
            record_min_max,
            record_sum,
        ))
    }
}
