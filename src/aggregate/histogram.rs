use super::number::Number;
use super::sum::interval_start;
use super::value_map::ValueMap;
use super::{Aggregator, SpareExemplars};
use crate::core::{AttributeSet, Context, KeyValue};
use crate::data::{self, HistogramDataPoint, MetricData, Temporality};
use parking_lot::Mutex;
use std::time::SystemTime;

/// Bucket state of one attribute set
pub(crate) struct Buckets<N> {
    counts: Vec<u64>,
    count: u64,
    total: N,
    min: N,
    max: N,
}

pub(crate) fn new_buckets<N: Number>(len: usize) -> Mutex<Buckets<N>> {
    Mutex::new(Buckets {
        counts: vec![0; len],
        count: 0,
        total: N::default(),
        min: N::max_value(),
        max: N::min_value(),
    })
}

impl<N: Number> Buckets<N> {
    fn record(&mut self, idx: usize, value: N) {
        self.counts[idx] += 1;
        self.count += 1;
        self.total = self.total + value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    fn reset(&mut self) {
        self.counts.fill(0);
        self.count = 0;
        self.total = N::default();
        self.min = N::max_value();
        self.max = N::min_value();
    }
}

/// Explicit-bucket histogram
///
/// A value `v` lands in the first bucket whose upper boundary is `>= v`;
/// values above the last boundary land in the trailing overflow bucket.
pub(crate) struct Histogram<N: Number> {
    values: ValueMap<N, Mutex<Buckets<N>>>,
    bounds: Vec<f64>,
    temporality: Temporality,
    record_min_max: bool,
    record_sum: bool,
    start: Mutex<SystemTime>,
}

impl<N: Number> Histogram<N> {
    pub(crate) fn new(
        values: ValueMap<N, Mutex<Buckets<N>>>,
        bounds: Vec<f64>,
        temporality: Temporality,
        record_min_max: bool,
        record_sum: bool,
    ) -> Self {
        Histogram {
            values,
            bounds,
            temporality,
            record_min_max,
            record_sum,
            start: Mutex::new(SystemTime::now()),
        }
    }
}

impl<N: Number> Aggregator<N> for Histogram<N> {
    fn aggregate(&self, ctx: &Context, value: N, attrs: &AttributeSet, dropped: &[KeyValue]) {
        let v = value.into_f64();
        let idx = self.bounds.partition_point(|&b| b < v);
        self.values
            .measure(ctx, value, attrs, dropped, |buckets| {
                buckets.lock().record(idx, value)
            });
    }

    fn collect(&self, dest: &mut Option<MetricData<N>>) -> usize {
        let now = SystemTime::now();
        let start = interval_start(&self.start, self.temporality, now);
        let (mut histogram, mut spare) = match dest.take() {
            Some(MetricData::Histogram(mut h)) => {
                let spare = SpareExemplars::take(&mut h.data_points, |p| p.exemplars);
                h.temporality = self.temporality;
                (h, spare)
            },
            _ => (
                data::Histogram {
                    data_points: Vec::new(),
                    temporality: self.temporality,
                },
                SpareExemplars::default(),
            ),
        };

        for entry in self.values.entries() {
            let mut point = {
                let mut buckets = entry.tracker.lock();
                let has_values = buckets.count > 0;
                let point = HistogramDataPoint {
                    attributes: entry.attrs.clone(),
                    start_time: start,
                    time: now,
                    count: buckets.count,
                    bounds: self.bounds.clone(),
                    bucket_counts: buckets.counts.clone(),
                    min: (self.record_min_max && has_values).then_some(buckets.min),
                    max: (self.record_min_max && has_values).then_some(buckets.max),
                    sum: self.record_sum.then_some(buckets.total),
                    exemplars: spare.next(),
                };
                if self.temporality == Temporality::Delta {
                    buckets.reset();
                }
                point
            };
            entry.exemplars(&mut point.exemplars);
            histogram.data_points.push(point);
        }

        let count = histogram.data_points.len();
        *dest = Some(MetricData::Histogram(histogram));
        count
    }
}
