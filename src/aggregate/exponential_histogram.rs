use super::number::Number;
use super::sum::interval_start;
use super::value_map::ValueMap;
use super::{Aggregator, SpareExemplars};
use crate::core::diagnostics::handle_error;
use crate::core::{AttributeSet, Context, KeyValue, MetricsError};
use crate::data::{self, ExponentialBucket, ExponentialHistogramDataPoint, MetricData, Temporality};
use crate::view::{EXPONENTIAL_MAX_SCALE, EXPONENTIAL_MIN_SCALE};
use parking_lot::Mutex;
use std::time::SystemTime;

/// `log2(e) * 2^scale` for every positive scale
fn scale_factor(scale: i32) -> f64 {
    std::f64::consts::LOG2_E * 2f64.powi(scale)
}

/// Splits a positive finite `v` into a fraction in `[0.5, 1)` and a power
/// of two
fn frexp(v: f64) -> (f64, i32) {
    const EXP_MASK: u64 = 0x7ff << 52;
    let bits = v.to_bits();
    let exp = ((bits & EXP_MASK) >> 52) as i32;
    if exp == 0 {
        // Subnormal: normalize first
        let (frac, e) = frexp(v * 2f64.powi(64));
        return (frac, e - 64);
    }
    let frac = f64::from_bits((bits & !EXP_MASK) | (1022 << 52));
    (frac, exp - 1022)
}

/// Contiguous bucket counts starting at `start_bin`
#[derive(Debug, Default, Clone)]
struct Buckets {
    start_bin: i32,
    counts: Vec<u64>,
}

impl Buckets {
    fn record(&mut self, bin: i32) {
        if self.counts.is_empty() {
            self.counts.push(1);
            self.start_bin = bin;
            return;
        }

        let end_bin = self.start_bin + self.counts.len() as i32 - 1;
        if bin >= self.start_bin && bin <= end_bin {
            self.counts[(bin - self.start_bin) as usize] += 1;
        } else if bin < self.start_bin {
            let shift = (self.start_bin - bin) as usize;
            self.counts.splice(0..0, std::iter::repeat(0).take(shift));
            self.counts[0] = 1;
            self.start_bin = bin;
        } else {
            let idx = (bin - self.start_bin) as usize;
            self.counts.resize(idx + 1, 0);
            self.counts[idx] = 1;
        }
    }

    /// Merges every `2^delta` adjacent buckets into one
    fn downscale(&mut self, delta: i32) {
        if self.counts.len() <= 1 || delta < 1 {
            self.start_bin >>= delta;
            return;
        }

        let steps = 1i32 << delta;
        let offset = (self.start_bin % steps + steps) % steps;
        let (steps, offset) = (steps as usize, offset as usize);
        for i in 1..self.counts.len() {
            let idx = i + offset;
            if idx % steps == 0 {
                self.counts[idx / steps] = self.counts[i];
            } else {
                self.counts[idx / steps] += self.counts[i];
            }
        }

        let last = (self.counts.len() - 1 + offset) / steps;
        self.counts.truncate(last + 1);
        self.start_bin >>= delta;
    }

    fn to_bucket(&self) -> ExponentialBucket {
        ExponentialBucket {
            offset: self.start_bin,
            counts: self.counts.clone(),
        }
    }
}

/// Exponential histogram state of one attribute set
pub(crate) struct Point<N> {
    max_size: i32,
    max_scale: i32,
    scale: i32,
    count: u64,
    zero_count: u64,
    total: N,
    min: N,
    max: N,
    positive: Buckets,
    negative: Buckets,
}

pub(crate) fn new_point<N: Number>(max_size: u32, max_scale: i8) -> Mutex<Point<N>> {
    Mutex::new(Point {
        max_size: i32::try_from(max_size).unwrap_or(i32::MAX),
        max_scale: i32::from(max_scale),
        scale: i32::from(max_scale),
        count: 0,
        zero_count: 0,
        total: N::default(),
        min: N::max_value(),
        max: N::min_value(),
        positive: Buckets::default(),
        negative: Buckets::default(),
    })
}

impl<N: Number> Point<N> {
    /// Buckets `value`, then folds it into count, sum and min/max. A value
    /// that would push the scale below the minimum is rejected whole.
    fn record(&mut self, value: N) {
        let v = value.into_f64();
        let abs = v.abs();
        if abs == 0.0 {
            self.zero_count += 1;
            self.record_stats(value);
            return;
        }

        let mut bin = self.bin(abs);
        let buckets = if v < 0.0 { &self.negative } else { &self.positive };
        let delta = self.scale_change(bin, buckets.start_bin, buckets.counts.len());
        if delta > 0 {
            if self.scale - delta < i32::from(EXPONENTIAL_MIN_SCALE) {
                handle_error(MetricsError::aggregation(
                    "exponential histogram scale underflow",
                ));
                return;
            }
            self.scale -= delta;
            self.positive.downscale(delta);
            self.negative.downscale(delta);
            bin = self.bin(abs);
        }

        if v < 0.0 {
            self.negative.record(bin);
        } else {
            self.positive.record(bin);
        }
        self.record_stats(value);
    }

    fn record_stats(&mut self, value: N) {
        self.count += 1;
        self.total = self.total + value;
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    /// Bucket index of a positive value at the current scale
    #[allow(clippy::cast_possible_truncation)]
    fn bin(&self, v: f64) -> i32 {
        let (frac, exp) = frexp(v);
        if self.scale <= 0 {
            // Exact powers of two have frac 0.5 and belong to the bucket
            // below their exponent.
            let correction = if frac == 0.5 { 2 } else { 1 };
            return (exp - correction) >> -self.scale;
        }
        (exp << self.scale) + (frac.ln() * scale_factor(self.scale)) as i32 - 1
    }

    /// How many halvings of the scale keep `bin` and the existing buckets
    /// within `max_size` buckets
    fn scale_change(&self, bin: i32, start_bin: i32, len: usize) -> i32 {
        if len == 0 {
            return 0;
        }

        let (mut low, mut high) = if start_bin >= bin {
            (i64::from(bin), i64::from(start_bin) + len as i64 - 1)
        } else {
            (i64::from(start_bin), i64::from(bin))
        };

        let mut count = 0;
        while high - low >= i64::from(self.max_size) {
            low >>= 1;
            high >>= 1;
            count += 1;
            if count > i32::from(EXPONENTIAL_MAX_SCALE - EXPONENTIAL_MIN_SCALE) {
                return count;
            }
        }
        count
    }

    fn reset(&mut self) {
        self.scale = self.max_scale;
        self.count = 0;
        self.zero_count = 0;
        self.total = N::default();
        self.min = N::max_value();
        self.max = N::min_value();
        self.positive = Buckets::default();
        self.negative = Buckets::default();
    }
}

/// Base-2 exponential histogram
///
/// Starts at `max_scale` and halves its resolution whenever a new value
/// would need more than `max_size` buckets on either side of zero.
pub(crate) struct ExponentialHistogram<N: Number> {
    values: ValueMap<N, Mutex<Point<N>>>,
    max_size: u32,
    max_scale: i8,
    temporality: Temporality,
    record_min_max: bool,
    record_sum: bool,
    start: Mutex<SystemTime>,
}

impl<N: Number> ExponentialHistogram<N> {
    pub(crate) fn new(
        values: ValueMap<N, Mutex<Point<N>>>,
        max_size: u32,
        max_scale: i8,
        temporality: Temporality,
        record_min_max: bool,
        record_sum: bool,
    ) -> Self {
        ExponentialHistogram {
            values,
            max_size,
            max_scale,
            temporality,
            record_min_max,
            record_sum,
            start: Mutex::new(SystemTime::now()),
        }
    }
}

impl<N: Number> Aggregator<N> for ExponentialHistogram<N> {
    fn aggregate(&self, ctx: &Context, value: N, attrs: &AttributeSet, dropped: &[KeyValue]) {
        if !value.into_f64().is_finite() {
            return;
        }
        self.values
            .measure(ctx, value, attrs, dropped, |point| point.lock().record(value));
    }

    fn collect(&self, dest: &mut Option<MetricData<N>>) -> usize {
        let now = SystemTime::now();
        let start = interval_start(&self.start, self.temporality, now);
        let (mut histogram, mut spare) = match dest.take() {
            Some(MetricData::ExponentialHistogram(mut h)) => {
                let spare = SpareExemplars::take(&mut h.data_points, |p| p.exemplars);
                h.temporality = self.temporality;
                (h, spare)
            },
            _ => (
                data::ExponentialHistogram {
                    data_points: Vec::new(),
                    temporality: self.temporality,
                },
                SpareExemplars::default(),
            ),
        };

        for entry in self.values.entries() {
            let mut dp = {
                let mut point = entry.tracker.lock();
                let has_values = point.count > 0;
                let dp = ExponentialHistogramDataPoint {
                    attributes: entry.attrs.clone(),
                    start_time: start,
                    time: now,
                    count: point.count,
                    min: (self.record_min_max && has_values).then_some(point.min),
                    max: (self.record_min_max && has_values).then_some(point.max),
                    sum: self.record_sum.then_some(point.total),
                    scale: i8::try_from(point.scale).unwrap_or(self.max_scale),
                    zero_count: point.zero_count,
                    zero_threshold: 0.0,
                    positive_bucket: point.positive.to_bucket(),
                    negative_bucket: point.negative.to_bucket(),
                    exemplars: spare.next(),
                };
                if self.temporality == Temporality::Delta {
                    point.reset();
                }
                dp
            };
            entry.exemplars(&mut dp.exemplars);
            histogram.data_points.push(dp);
        }

        tracing::trace!(
            max_size = self.max_size,
            points = histogram.data_points.len(),
            "collected exponential histogram"
        );
        let count = histogram.data_points.len();
        *dest = Some(MetricData::ExponentialHistogram(histogram));
        count
    }
}
