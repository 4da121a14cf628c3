//! Immutable snapshot types produced by one collection.
//!
//! A [`ResourceMetrics`] tree is assembled fresh by every `collect` and is
//! never mutated by the pipeline after it is returned.

use crate::core::{AttributeSet, InstrumentationScope, KeyValue, Resource, SpanId, TraceId};
use std::time::SystemTime;

/// Whether collected values are cumulative since start or delta since the
/// previous collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Temporality {
    #[default]
    Cumulative,
    Delta,
}

/// Metrics collected from one resource
#[derive(Debug, Clone)]
pub struct ResourceMetrics {
    pub resource: Resource,
    pub scope_metrics: Vec<ScopeMetrics>,
}

impl Default for ResourceMetrics {
    fn default() -> Self {
        ResourceMetrics {
            resource: Resource::empty(),
            scope_metrics: Vec::new(),
        }
    }
}

impl ResourceMetrics {
    /// Finds the first metric with `name` in any scope
    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.scope_metrics
            .iter()
            .flat_map(|sm| sm.metrics.iter())
            .find(|m| m.name == name)
    }

    /// Total number of metrics across scopes
    pub fn metric_count(&self) -> usize {
        self.scope_metrics.iter().map(|sm| sm.metrics.len()).sum()
    }

    pub(crate) fn clear(&mut self) {
        self.resource = Resource::empty();
        self.scope_metrics.clear();
    }
}

/// Metrics produced by one instrumentation scope
#[derive(Debug, Clone)]
pub struct ScopeMetrics {
    pub scope: InstrumentationScope,
    pub metrics: Vec<Metric>,
}

/// One named stream of aggregated data
#[derive(Debug, Clone)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub unit: String,
    pub data: AggregatedMetrics,
}

/// Aggregated data tagged by number type
#[derive(Debug, Clone)]
pub enum AggregatedMetrics {
    I64(MetricData<i64>),
    F64(MetricData<f64>),
}

impl AggregatedMetrics {
    pub fn as_i64(&self) -> Option<&MetricData<i64>> {
        match self {
            AggregatedMetrics::I64(data) => Some(data),
            AggregatedMetrics::F64(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<&MetricData<f64>> {
        match self {
            AggregatedMetrics::F64(data) => Some(data),
            AggregatedMetrics::I64(_) => None,
        }
    }

    pub fn point_count(&self) -> usize {
        match self {
            AggregatedMetrics::I64(data) => data.point_count(),
            AggregatedMetrics::F64(data) => data.point_count(),
        }
    }
}

/// Aggregated data of one aggregation kind
#[derive(Debug, Clone)]
pub enum MetricData<T> {
    Gauge(Gauge<T>),
    Sum(Sum<T>),
    Histogram(Histogram<T>),
    ExponentialHistogram(ExponentialHistogram<T>),
}

impl<T> MetricData<T> {
    pub fn point_count(&self) -> usize {
        match self {
            MetricData::Gauge(g) => g.data_points.len(),
            MetricData::Sum(s) => s.data_points.len(),
            MetricData::Histogram(h) => h.data_points.len(),
            MetricData::ExponentialHistogram(h) => h.data_points.len(),
        }
    }

    pub fn as_sum(&self) -> Option<&Sum<T>> {
        match self {
            MetricData::Sum(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_gauge(&self) -> Option<&Gauge<T>> {
        match self {
            MetricData::Gauge(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_histogram(&self) -> Option<&Histogram<T>> {
        match self {
            MetricData::Histogram(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_exponential_histogram(&self) -> Option<&ExponentialHistogram<T>> {
        match self {
            MetricData::ExponentialHistogram(h) => Some(h),
            _ => None,
        }
    }
}

/// Latest values per attribute set
#[derive(Debug, Clone)]
pub struct Gauge<T> {
    pub data_points: Vec<DataPoint<T>>,
}

/// Summed values per attribute set
#[derive(Debug, Clone)]
pub struct Sum<T> {
    pub data_points: Vec<DataPoint<T>>,
    pub temporality: Temporality,
    pub is_monotonic: bool,
}

/// A single scalar value for one attribute set
#[derive(Debug, Clone)]
pub struct DataPoint<T> {
    pub attributes: AttributeSet,
    pub start_time: Option<SystemTime>,
    pub time: SystemTime,
    pub value: T,
    pub exemplars: Vec<Exemplar<T>>,
}

/// Explicit-bucket histogram
#[derive(Debug, Clone)]
pub struct Histogram<T> {
    pub data_points: Vec<HistogramDataPoint<T>>,
    pub temporality: Temporality,
}

/// Bucket counts for one attribute set
///
/// `bucket_counts` has `bounds.len() + 1` entries; bucket `i` holds values
/// in `(bounds[i-1], bounds[i]]`.
#[derive(Debug, Clone)]
pub struct HistogramDataPoint<T> {
    pub attributes: AttributeSet,
    pub start_time: SystemTime,
    pub time: SystemTime,
    pub count: u64,
    pub bounds: Vec<f64>,
    pub bucket_counts: Vec<u64>,
    pub min: Option<T>,
    pub max: Option<T>,
    /// `None` when the instrument's values are not summable
    pub sum: Option<T>,
    pub exemplars: Vec<Exemplar<T>>,
}

/// Base-2 exponential histogram
#[derive(Debug, Clone)]
pub struct ExponentialHistogram<T> {
    pub data_points: Vec<ExponentialHistogramDataPoint<T>>,
    pub temporality: Temporality,
}

#[derive(Debug, Clone)]
pub struct ExponentialHistogramDataPoint<T> {
    pub attributes: AttributeSet,
    pub start_time: SystemTime,
    pub time: SystemTime,
    pub count: u64,
    pub min: Option<T>,
    pub max: Option<T>,
    /// `None` when the instrument's values are not summable
    pub sum: Option<T>,
    pub scale: i8,
    pub zero_count: u64,
    pub zero_threshold: f64,
    pub positive_bucket: ExponentialBucket,
    pub negative_bucket: ExponentialBucket,
    pub exemplars: Vec<Exemplar<T>>,
}

/// Contiguous run of exponential bucket counts starting at `offset`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExponentialBucket {
    pub offset: i32,
    pub counts: Vec<u64>,
}

/// A raw measurement retained as a sample
///
/// `filtered_attributes` holds only attributes the stream's filter dropped;
/// the kept ones are already on the owning data point.
#[derive(Debug, Clone, PartialEq)]
pub struct Exemplar<T> {
    pub filtered_attributes: Vec<KeyValue>,
    pub time: SystemTime,
    pub value: T,
    pub span_id: Option<SpanId>,
    pub trace_id: Option<TraceId>,
}
