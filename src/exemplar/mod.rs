//! Exemplar sampling: filters decide which measurements are eligible,
//! reservoirs decide which eligible ones are kept.

mod aligned;
mod fixed_size;
mod storage;

pub use aligned::HistogramReservoir;
pub use fixed_size::FixedSizeReservoir;

use crate::aggregate::Number;
use crate::core::{Context, KeyValue, MetricsError};
use crate::data::Exemplar;
use crate::view::Aggregation;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;

/// Upper bound on the fixed-size reservoir chosen for exponential histograms
const EXPONENTIAL_RESERVOIR_CAP: usize = 20;

/// Decides whether a measurement is offered to the reservoir at all
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExemplarFilter {
    /// Every measurement is eligible
    AlwaysOn,
    /// No measurement is eligible
    AlwaysOff,
    /// Only measurements made inside a sampled span are eligible
    #[default]
    TraceBased,
}

impl ExemplarFilter {
    pub fn should_sample(&self, ctx: &Context) -> bool {
        match self {
            ExemplarFilter::AlwaysOn => true,
            ExemplarFilter::AlwaysOff => false,
            ExemplarFilter::TraceBased => ctx.span().is_some_and(|span| span.is_sampled()),
        }
    }
}

impl FromStr for ExemplarFilter {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "always_on" => Ok(ExemplarFilter::AlwaysOn),
            "always_off" => Ok(ExemplarFilter::AlwaysOff),
            "trace_based" => Ok(ExemplarFilter::TraceBased),
            other => Err(MetricsError::config(format!(
                "unknown exemplar filter {:?}, expected always_on, always_off or trace_based",
                other
            ))),
        }
    }
}

/// Retains a bounded sample of offered measurements
///
/// Implementations must tolerate concurrent `offer` calls. `collect` is
/// called by a single collector at a time and resets sampling state, so the
/// next interval samples from scratch.
pub trait Reservoir<N>: Send + Sync {
    fn offer(&self, ctx: &Context, time: SystemTime, value: N, filtered: &[KeyValue]);

    /// Replaces the contents of `dest` with the retained exemplars
    fn collect(&self, dest: &mut Vec<Exemplar<N>>);
}

/// Which reservoir a stream builds for each attribute set
#[derive(Debug, Clone, PartialEq)]
pub enum ReservoirConfig {
    /// Uniform sample of at most `size` measurements
    FixedSize(usize),
    /// One slot per histogram bucket, keeping the latest offer
    HistogramAligned(Vec<f64>),
}

impl ReservoirConfig {
    pub(crate) fn build<N: Number>(&self) -> Box<dyn Reservoir<N>> {
        match self {
            ReservoirConfig::FixedSize(size) => Box::new(FixedSizeReservoir::new(*size)),
            ReservoirConfig::HistogramAligned(bounds) => {
                Box::new(HistogramReservoir::new(bounds.clone()))
            },
        }
    }
}

/// Chooses a reservoir for a resolved aggregation
pub type ReservoirSelector = Arc<dyn Fn(&Aggregation) -> ReservoirConfig + Send + Sync>;

/// Reservoir chosen when a view does not override it
pub fn default_reservoir(aggregation: &Aggregation) -> ReservoirConfig {
    match aggregation {
        Aggregation::Base2ExponentialHistogram { max_size, .. } => ReservoirConfig::FixedSize(
            EXPONENTIAL_RESERVOIR_CAP.min(*max_size as usize),
        ),
        Aggregation::ExplicitBucketHistogram { boundaries, .. } if !boundaries.is_empty() => {
            ReservoirConfig::HistogramAligned(boundaries.clone())
        },
        _ => ReservoirConfig::FixedSize(default_fixed_size()),
    }
}

fn default_fixed_size() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Filter and reservoir settings for one stream
#[derive(Debug, Clone)]
pub(crate) struct ExemplarSettings {
    filter: ExemplarFilter,
    reservoir: ReservoirConfig,
}

impl ExemplarSettings {
    pub(crate) fn new(filter: ExemplarFilter, reservoir: ReservoirConfig) -> Self {
        ExemplarSettings { filter, reservoir }
    }

    /// Builds the per-attribute-set reservoir. `None` when nothing could
    /// ever be sampled.
    pub(crate) fn build<N: Number>(&self) -> Option<FilteredReservoir<N>> {
        if self.filter == ExemplarFilter::AlwaysOff {
            return None;
        }
        Some(FilteredReservoir {
            filter: self.filter,
            reservoir: self.reservoir.build(),
        })
    }
}

/// A reservoir guarded by its filter
pub(crate) struct FilteredReservoir<N> {
    filter: ExemplarFilter,
    reservoir: Box<dyn Reservoir<N>>,
}

impl<N: Number> FilteredReservoir<N> {
    pub(crate) fn offer(&self, ctx: &Context, value: N, filtered: &[KeyValue]) {
        if self.filter.should_sample(ctx) {
            self.reservoir
                .offer(ctx, SystemTime::now(), value, filtered);
        }
    }

    pub(crate) fn collect(&self, dest: &mut Vec<Exemplar<N>>) {
        self.reservoir.collect(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SpanContext, SpanId, TraceId};

    fn sampled_ctx(sampled: bool) -> Context {
        Context::new().with_span(SpanContext::new(
            TraceId::from_bytes([1; 16]),
            SpanId::from_bytes([2; 8]),
            sampled,
        ))
    }

    #[test]
    fn test_trace_based_filter() {
        let filter = ExemplarFilter::TraceBased;
        assert!(filter.should_sample(&sampled_ctx(true)));
        assert!(!filter.should_sample(&sampled_ctx(false)));
        assert!(!filter.should_sample(&Context::new()));
    }

    #[test]
    fn test_filter_from_str() {
        assert_eq!("always_on".parse::<ExemplarFilter>().unwrap(), ExemplarFilter::AlwaysOn);
        assert_eq!("ALWAYS_OFF".parse::<ExemplarFilter>().unwrap(), ExemplarFilter::AlwaysOff);
        assert!("sometimes".parse::<ExemplarFilter>().is_err());
    }

    #[test]
    fn test_default_reservoir_selection() {
        let expo = Aggregation::Base2ExponentialHistogram {
            max_size: 4,
            max_scale: 20,
            record_min_max: true,
        };
        assert_eq!(default_reservoir(&expo), ReservoirConfig::FixedSize(4));

        let explicit = Aggregation::ExplicitBucketHistogram {
            boundaries: vec![1.0, 5.0],
            record_min_max: true,
        };
        assert_eq!(
            default_reservoir(&explicit),
            ReservoirConfig::HistogramAligned(vec![1.0, 5.0])
        );

        assert!(matches!(
            default_reservoir(&Aggregation::Sum),
            ReservoirConfig::FixedSize(n) if n >= 1
        ));
    }

    #[test]
    fn test_always_off_builds_nothing() {
        let settings = ExemplarSettings::new(ExemplarFilter::AlwaysOff, ReservoirConfig::FixedSize(4));
        assert!(settings.build::<i64>().is_none());
    }

    #[test]
    fn test_filtered_reservoir_respects_filter() {
        let settings = ExemplarSettings::new(ExemplarFilter::TraceBased, ReservoirConfig::FixedSize(4));
        let reservoir = settings.build::<i64>().unwrap();

        reservoir.offer(&Context::new(), 1, &[]);
        reservoir.offer(&sampled_ctx(true), 2, &[]);

        let mut dest = Vec::new();
        reservoir.collect(&mut dest);
        assert_eq!(dest.len(), 1);
        assert_eq!(dest[0].value, 2);
        assert_eq!(dest[0].trace_id, Some(TraceId::from_bytes([1; 16])));
    }
}
