use super::number::{AtomicTracker, Number};
use super::value_map::{Observed, ValueMap};
use super::{Aggregator, SpareExemplars};
use crate::core::{AttributeSet, Context, KeyValue};
use crate::data::{self, DataPoint, MetricData, Temporality};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::time::SystemTime;

/// Takes the sum out of `dest` for reuse, or starts a new one
fn take_sum<N>(
    dest: &mut Option<MetricData<N>>,
    temporality: Temporality,
    is_monotonic: bool,
) -> (data::Sum<N>, SpareExemplars<N>) {
    match dest.take() {
        Some(MetricData::Sum(mut sum)) => {
            let spare = SpareExemplars::take(&mut sum.data_points, |p| p.exemplars);
            sum.temporality = temporality;
            sum.is_monotonic = is_monotonic;
            (sum, spare)
        },
        _ => (
            data::Sum {
                data_points: Vec::new(),
                temporality,
                is_monotonic,
            },
            SpareExemplars::default(),
        ),
    }
}

/// Interval start for this collection; delta streams restart it at `now`
pub(super) fn interval_start(
    start: &Mutex<SystemTime>,
    temporality: Temporality,
    now: SystemTime,
) -> SystemTime {
    let mut start = start.lock();
    match temporality {
        Temporality::Delta => std::mem::replace(&mut *start, now),
        Temporality::Cumulative => *start,
    }
}

/// Sum of synchronous increments
///
/// Delta collection swaps each accumulator with zero, so an increment racing
/// with the collection lands either in this interval or the next, never
/// neither.
pub(crate) struct Sum<N: Number> {
    values: ValueMap<N, N::Atomic>,
    temporality: Temporality,
    monotonic: bool,
    start: Mutex<SystemTime>,
}

impl<N: Number> Sum<N> {
    pub(crate) fn new(
        values: ValueMap<N, N::Atomic>,
        temporality: Temporality,
        monotonic: bool,
    ) -> Self {
        Sum {
            values,
            temporality,
            monotonic,
            start: Mutex::new(SystemTime::now()),
        }
    }
}

impl<N: Number> Aggregator<N> for Sum<N> {
    fn aggregate(&self, ctx: &Context, value: N, attrs: &AttributeSet, dropped: &[KeyValue]) {
        self.values
            .measure(ctx, value, attrs, dropped, |sum| sum.add(value));
    }

    fn collect(&self, dest: &mut Option<MetricData<N>>) -> usize {
        let now = SystemTime::now();
        let start = interval_start(&self.start, self.temporality, now);
        let (mut sum, mut spare) = take_sum(dest, self.temporality, self.monotonic);

        let entries = self.values.entries();
        sum.data_points.reserve(entries.len());
        for entry in entries {
            let value = match self.temporality {
                Temporality::Delta => entry.tracker.swap(N::default()),
                Temporality::Cumulative => entry.tracker.load(),
            };
            let mut exemplars = spare.next();
            entry.exemplars(&mut exemplars);
            sum.data_points.push(DataPoint {
                attributes: entry.attrs.clone(),
                start_time: Some(start),
                time: now,
                value,
                exemplars,
            });
        }

        let count = sum.data_points.len();
        *dest = Some(MetricData::Sum(sum));
        count
    }
}

/// Sum of totals reported by observable callbacks
///
/// Each observation replaces the stored total. Only attribute sets observed
/// since the previous collection are reported. For delta temporality the
/// reported value is the change from the last reported total; a set that
/// skips a cycle is forgotten and reports its full total when it returns.
pub(crate) struct PrecomputedSum<N: Number> {
    values: ValueMap<N, Observed<N>>,
    temporality: Temporality,
    monotonic: bool,
    start: Mutex<SystemTime>,
    reported: Mutex<FxHashMap<AttributeSet, N>>,
}

impl<N: Number> PrecomputedSum<N> {
    pub(crate) fn new(
        values: ValueMap<N, Observed<N>>,
        temporality: Temporality,
        monotonic: bool,
    ) -> Self {
        PrecomputedSum {
            values,
            temporality,
            monotonic,
            start: Mutex::new(SystemTime::now()),
            reported: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<N: Number> Aggregator<N> for PrecomputedSum<N> {
    fn aggregate(&self, ctx: &Context, value: N, attrs: &AttributeSet, dropped: &[KeyValue]) {
        self.values
            .measure(ctx, value, attrs, dropped, |total| total.set(value));
    }

    fn collect(&self, dest: &mut Option<MetricData<N>>) -> usize {
        let now = SystemTime::now();
        let start = interval_start(&self.start, self.temporality, now);
        let (mut sum, mut spare) = take_sum(dest, self.temporality, self.monotonic);
        let mut reported = self.reported.lock();

        for entry in self.values.entries() {
            let Some(total) = entry.tracker.take_fresh() else {
                reported.remove(&entry.attrs);
                continue;
            };
            let value = match self.temporality {
                Temporality::Delta => {
                    let previous = reported
                        .insert(entry.attrs.clone(), total)
                        .unwrap_or_default();
                    total - previous
                },
                Temporality::Cumulative => total,
            };
            let mut exemplars = spare.next();
            entry.exemplars(&mut exemplars);
            sum.data_points.push(DataPoint {
                attributes: entry.attrs.clone(),
                start_time: Some(start),
                time: now,
                value,
                exemplars,
            });
        }

        let count = sum.data_points.len();
        *dest = Some(MetricData::Sum(sum));
        count
    }
}
