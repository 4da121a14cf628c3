use super::number::Number;
use super::sum::interval_start;
use super::value_map::{Observed, ValueMap};
use super::{Aggregator, SpareExemplars};
use crate::core::{AttributeSet, Context, KeyValue};
use crate::data::{DataPoint, Gauge, MetricData, Temporality};
use parking_lot::Mutex;
use std::time::SystemTime;

/// Most recent value per attribute set
///
/// Synchronous gauges keep reporting the last value of every set ever
/// recorded, whatever the temporality. Observable gauges (`precomputed`)
/// report just the sets observed during the current collection, so a value
/// that stops being observed disappears instead of going stale.
pub(crate) struct LastValue<N: Number> {
    values: ValueMap<N, Observed<N>>,
    temporality: Temporality,
    precomputed: bool,
    start: Mutex<SystemTime>,
}

impl<N: Number> LastValue<N> {
    pub(crate) fn new(
        values: ValueMap<N, Observed<N>>,
        temporality: Temporality,
        precomputed: bool,
    ) -> Self {
        LastValue {
            values,
            temporality,
            precomputed,
            start: Mutex::new(SystemTime::now()),
        }
    }

    fn current(&self, cell: &Observed<N>) -> Option<N> {
        if self.precomputed {
            cell.take_fresh()
        } else {
            Some(cell.load())
        }
    }
}

impl<N: Number> Aggregator<N> for LastValue<N> {
    fn aggregate(&self, ctx: &Context, value: N, attrs: &AttributeSet, dropped: &[KeyValue]) {
        self.values
            .measure(ctx, value, attrs, dropped, |last| last.set(value));
    }

    fn collect(&self, dest: &mut Option<MetricData<N>>) -> usize {
        let now = SystemTime::now();
        let start = interval_start(&self.start, self.temporality, now);
        let (mut gauge, mut spare) = match dest.take() {
            Some(MetricData::Gauge(mut gauge)) => {
                let spare = SpareExemplars::take(&mut gauge.data_points, |p| p.exemplars);
                (gauge, spare)
            },
            _ => (
                Gauge {
                    data_points: Vec::new(),
                },
                SpareExemplars::default(),
            ),
        };

        for entry in self.values.entries() {
            let Some(value) = self.current(&entry.tracker) else {
                continue;
            };
            let mut exemplars = spare.next();
            entry.exemplars(&mut exemplars);
            gauge.data_points.push(DataPoint {
                attributes: entry.attrs.clone(),
                start_time: Some(start),
                time: now,
                value,
                exemplars,
            });
        }

        let count = gauge.data_points.len();
        *dest = Some(MetricData::Gauge(gauge));
        count
    }
}
