//! Views: rules that rename, re-aggregate, filter or drop instrument
//! streams.
//!
//! A [`View`] pairs match [`Criteria`] with a [`Stream`] mask. Unset mask
//! fields keep the instrument's own values. Name criteria may use `*` (any
//! run of characters) and `?` (exactly one character).

use crate::core::{Key, KeyValue, MetricsError, Result};
use crate::exemplar::ReservoirSelector;
use crate::instrument::{Instrument, InstrumentKind};
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Explicit histogram boundaries used when none are configured
pub const DEFAULT_HISTOGRAM_BOUNDARIES: [f64; 15] = [
    0.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0, 250.0, 500.0, 750.0, 1000.0, 2500.0, 5000.0, 7500.0,
    10000.0,
];

/// Default maximum bucket count of exponential histograms
pub const EXPONENTIAL_MAX_SIZE: u32 = 160;
/// Highest (finest) exponential histogram scale
pub const EXPONENTIAL_MAX_SCALE: i8 = 20;
/// Lowest (coarsest) exponential histogram scale
pub const EXPONENTIAL_MIN_SCALE: i8 = -10;

/// How measurements of a stream are combined
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Aggregation {
    /// Resolved from the reader's selector, then the instrument kind
    #[default]
    Default,
    /// Discard all measurements
    Drop,
    /// Arithmetic sum
    Sum,
    /// Most recent value
    LastValue,
    /// Counts per configured bucket
    ExplicitBucketHistogram {
        boundaries: Vec<f64>,
        record_min_max: bool,
    },
    /// Counts per base-2 exponential bucket at an adaptive scale
    Base2ExponentialHistogram {
        max_size: u32,
        max_scale: i8,
        record_min_max: bool,
    },
}

impl Aggregation {
    /// Explicit-bucket histogram over [`DEFAULT_HISTOGRAM_BOUNDARIES`]
    pub fn default_histogram() -> Self {
        Aggregation::ExplicitBucketHistogram {
            boundaries: DEFAULT_HISTOGRAM_BOUNDARIES.to_vec(),
            record_min_max: true,
        }
    }

    /// Exponential histogram with the default size and scale
    pub fn default_exponential_histogram() -> Self {
        Aggregation::Base2ExponentialHistogram {
            max_size: EXPONENTIAL_MAX_SIZE,
            max_scale: EXPONENTIAL_MAX_SCALE,
            record_min_max: true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Aggregation::Default => "Default",
            Aggregation::Drop => "Drop",
            Aggregation::Sum => "Sum",
            Aggregation::LastValue => "LastValue",
            Aggregation::ExplicitBucketHistogram { .. } => "ExplicitBucketHistogram",
            Aggregation::Base2ExponentialHistogram { .. } => "Base2ExponentialHistogram",
        }
    }

    /// Checks the aggregation's own parameters
    pub fn validate(&self) -> Result<()> {
        match self {
            Aggregation::ExplicitBucketHistogram { boundaries, .. } => {
                if boundaries.iter().any(|b| b.is_nan()) {
                    return Err(MetricsError::aggregation(
                        "histogram boundaries must not contain NaN",
                    ));
                }
                if boundaries.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(MetricsError::aggregation(format!(
                        "histogram boundaries must be strictly increasing: {:?}",
                        boundaries
                    )));
                }
                Ok(())
            },
            Aggregation::Base2ExponentialHistogram {
                max_size,
                max_scale,
                ..
            } => {
                if *max_scale > EXPONENTIAL_MAX_SCALE || *max_scale < EXPONENTIAL_MIN_SCALE {
                    return Err(MetricsError::aggregation(format!(
                        "exponential histogram max_scale {} outside [{}, {}]",
                        max_scale, EXPONENTIAL_MIN_SCALE, EXPONENTIAL_MAX_SCALE
                    )));
                }
                if *max_size == 0 {
                    return Err(MetricsError::aggregation(
                        "exponential histogram max_size must be greater than 0",
                    ));
                }
                Ok(())
            },
            _ => Ok(()),
        }
    }

    /// Whether this aggregation may summarize instruments of `kind`
    pub fn is_compatible_with(&self, kind: InstrumentKind) -> bool {
        use InstrumentKind::*;
        match self {
            Aggregation::Default
            | Aggregation::Drop
            | Aggregation::ExplicitBucketHistogram { .. }
            | Aggregation::Base2ExponentialHistogram { .. } => true,
            Aggregation::Sum => matches!(
                kind,
                Counter | UpDownCounter | Histogram | ObservableCounter | ObservableUpDownCounter
            ),
            Aggregation::LastValue => matches!(kind, Gauge | ObservableGauge),
        }
    }
}

/// The aggregation an instrument kind gets when nothing else chooses one
pub fn default_aggregation(kind: InstrumentKind) -> Aggregation {
    match kind {
        InstrumentKind::Counter
        | InstrumentKind::UpDownCounter
        | InstrumentKind::ObservableCounter
        | InstrumentKind::ObservableUpDownCounter => Aggregation::Sum,
        InstrumentKind::Gauge | InstrumentKind::ObservableGauge => Aggregation::LastValue,
        InstrumentKind::Histogram => Aggregation::default_histogram(),
    }
}

/// Which instruments a view applies to. Unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    pub name: Option<String>,
    pub kind: Option<InstrumentKind>,
    pub unit: Option<String>,
    pub scope_name: Option<String>,
    pub scope_version: Option<String>,
    pub scope_schema_url: Option<String>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Match by exact name or `*`/`?` wildcard pattern
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_kind(mut self, kind: InstrumentKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_scope_name(mut self, name: impl Into<String>) -> Self {
        self.scope_name = Some(name.into());
        self
    }

    pub fn with_scope_version(mut self, version: impl Into<String>) -> Self {
        self.scope_version = Some(version.into());
        self
    }

    pub fn with_scope_schema_url(mut self, schema_url: impl Into<String>) -> Self {
        self.scope_schema_url = Some(schema_url.into());
        self
    }

    fn is_empty(&self) -> bool {
        *self == Criteria::default()
    }

    fn has_wildcard(&self) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.contains(['*', '?']))
    }
}

/// Overrides applied to a matched instrument's stream
///
/// Every field left `None` keeps what the instrument (or the reader's
/// defaults) would have produced.
#[derive(Clone, Default)]
pub struct Stream {
    pub name: Option<String>,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub aggregation: Option<Aggregation>,
    /// Only these attribute keys are kept; the rest move to exemplars
    pub allowed_attribute_keys: Option<Arc<HashSet<Key>>>,
    pub cardinality_limit: Option<usize>,
    pub exemplar_reservoir: Option<ReservoirSelector>,
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    pub fn allowed_attribute_keys(mut self, keys: impl IntoIterator<Item = impl Into<Key>>) -> Self {
        self.allowed_attribute_keys = Some(Arc::new(keys.into_iter().map(Into::into).collect()));
        self
    }

    pub fn cardinality_limit(mut self, limit: usize) -> Self {
        self.cardinality_limit = Some(limit);
        self
    }

    pub fn exemplar_reservoir(mut self, selector: ReservoirSelector) -> Self {
        self.exemplar_reservoir = Some(selector);
        self
    }

    /// Returns the attribute filter this stream applies, if any
    pub(crate) fn attribute_filter(&self) -> Option<AttributeFilter> {
        self.allowed_attribute_keys
            .as_ref()
            .map(|keys| AttributeFilter(Arc::clone(keys)))
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("unit", &self.unit)
            .field("aggregation", &self.aggregation)
            .field("allowed_attribute_keys", &self.allowed_attribute_keys)
            .field("cardinality_limit", &self.cardinality_limit)
            .field("exemplar_reservoir", &self.exemplar_reservoir.is_some())
            .finish()
    }
}

/// Allow-list of attribute keys
#[derive(Debug, Clone)]
pub(crate) struct AttributeFilter(Arc<HashSet<Key>>);

impl AttributeFilter {
    pub(crate) fn keeps(&self, kv: &KeyValue) -> bool {
        self.0.contains(kv.key.as_str())
    }
}

type MatchFn = dyn Fn(&Instrument) -> Option<Stream> + Send + Sync;

/// A rule mapping matched instruments to stream overrides
#[derive(Clone)]
pub struct View(Arc<MatchFn>);

impl View {
    /// Builds a view from criteria and a mask.
    ///
    /// Fails when the criteria are empty, when a wildcard name is combined
    /// with a rename (every match would collide on the same name), or when
    /// the mask's aggregation is malformed.
    pub fn new(criteria: Criteria, mask: Stream) -> Result<View> {
        if criteria.is_empty() {
            return Err(MetricsError::view("no criteria provided"));
        }
        if criteria.has_wildcard() && mask.name.is_some() {
            return Err(MetricsError::view(format!(
                "wildcard name {:?} cannot be combined with a stream rename",
                criteria.name.as_deref().unwrap_or_default()
            )));
        }
        if let Some(aggregation) = &mask.aggregation {
            aggregation.validate()?;
        }

        let name_matcher = NameMatcher::new(criteria.name.as_deref())?;
        Ok(View(Arc::new(move |inst: &Instrument| {
            if !name_matcher.matches(&inst.name) || !criteria_matches(&criteria, inst) {
                return None;
            }
            Some(mask.clone())
        })))
    }

    /// Builds a view from an arbitrary matching function
    pub fn from_fn<F>(f: F) -> View
    where
        F: Fn(&Instrument) -> Option<Stream> + Send + Sync + 'static,
    {
        View(Arc::new(f))
    }

    /// The stream overrides for `inst`, if this view matches it
    pub fn matches(&self, inst: &Instrument) -> Option<Stream> {
        (self.0)(inst)
    }
}

impl fmt::Debug for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("View")
    }
}

fn criteria_matches(criteria: &Criteria, inst: &Instrument) -> bool {
    fn field(want: &Option<String>, have: &str) -> bool {
        want.as_deref().map_or(true, |w| w == have)
    }
    fn optional(want: &Option<String>, have: &Option<String>) -> bool {
        want.as_ref().map_or(true, |w| have.as_ref() == Some(w))
    }

    criteria.kind.map_or(true, |k| k == inst.kind)
        && field(&criteria.unit, &inst.unit)
        && field(&criteria.scope_name, &inst.scope.name)
        && optional(&criteria.scope_version, &inst.scope.version)
        && optional(&criteria.scope_schema_url, &inst.scope.schema_url)
}

enum NameMatcher {
    Any,
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    fn new(name: Option<&str>) -> Result<Self> {
        let Some(name) = name else {
            return Ok(NameMatcher::Any);
        };
        if !name.contains(['*', '?']) {
            return Ok(NameMatcher::Exact(name.to_string()));
        }

        let mut pattern = String::with_capacity(name.len() + 2);
        pattern.push('^');
        for c in name.chars() {
            match c {
                '*' => pattern.push_str(".*"),
                '?' => pattern.push('.'),
                other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
            }
        }
        pattern.push('$');

        Regex::new(&pattern)
            .map(NameMatcher::Pattern)
            .map_err(|e| MetricsError::view(format!("invalid name pattern {:?}: {}", name, e)))
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            NameMatcher::Any => true,
            NameMatcher::Exact(want) => want == name,
            NameMatcher::Pattern(re) => re.is_match(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::InstrumentationScope;

    fn instrument(name: &str, kind: InstrumentKind) -> Instrument {
        Instrument {
            name: name.to_string(),
            description: "desc".to_string(),
            kind,
            unit: "ms".to_string(),
            scope: InstrumentationScope::new("lib").with_version("1.0"),
        }
    }

    #[test]
    fn test_wildcard_matching() {
        let view = View::new(Criteria::new().with_name("http.*.latency"), Stream::new()).unwrap();
        assert!(view
            .matches(&instrument("http.server.latency", InstrumentKind::Histogram))
            .is_some());
        assert!(view
            .matches(&instrument("http.server.latency.p99", InstrumentKind::Histogram))
            .is_none());

        let single = View::new(Criteria::new().with_name("req?"), Stream::new()).unwrap();
        assert!(single.matches(&instrument("reqs", InstrumentKind::Counter)).is_some());
        assert!(single.matches(&instrument("req", InstrumentKind::Counter)).is_none());
        assert!(single.matches(&instrument("requests", InstrumentKind::Counter)).is_none());
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let view = View::new(Criteria::new().with_name("a.b*"), Stream::new()).unwrap();
        assert!(view.matches(&instrument("a.bc", InstrumentKind::Counter)).is_some());
        assert!(view.matches(&instrument("axbc", InstrumentKind::Counter)).is_none());
    }

    #[test]
    fn test_criteria_fields() {
        let view = View::new(
            Criteria::new()
                .with_kind(InstrumentKind::Counter)
                .with_unit("ms")
                .with_scope_name("lib")
                .with_scope_version("1.0"),
            Stream::new().name("renamed"),
        )
        .unwrap();

        let stream = view.matches(&instrument("anything", InstrumentKind::Counter)).unwrap();
        assert_eq!(stream.name.as_deref(), Some("renamed"));
        assert!(view.matches(&instrument("anything", InstrumentKind::Gauge)).is_none());

        let other_version = View::new(
            Criteria::new().with_scope_version("2.0"),
            Stream::new(),
        )
        .unwrap();
        assert!(other_version
            .matches(&instrument("anything", InstrumentKind::Counter))
            .is_none());
    }

    #[test]
    fn test_invalid_views() {
        assert!(View::new(Criteria::new(), Stream::new()).is_err());
        assert!(View::new(Criteria::new().with_name("*"), Stream::new().name("x")).is_err());
        assert!(View::new(
            Criteria::new().with_name("latency"),
            Stream::new().aggregation(Aggregation::ExplicitBucketHistogram {
                boundaries: vec![5.0, 1.0],
                record_min_max: true,
            })
        )
        .is_err());
    }

    #[test]
    fn test_compatibility() {
        use InstrumentKind::*;
        for kind in [Counter, UpDownCounter, Histogram, ObservableCounter, ObservableUpDownCounter] {
            assert!(Aggregation::Sum.is_compatible_with(kind));
            assert!(!Aggregation::LastValue.is_compatible_with(kind));
        }
        for kind in [Gauge, ObservableGauge] {
            assert!(!Aggregation::Sum.is_compatible_with(kind));
            assert!(Aggregation::LastValue.is_compatible_with(kind));
        }
        assert!(Aggregation::default_histogram().is_compatible_with(ObservableGauge));
        assert!(Aggregation::Drop.is_compatible_with(Gauge));
    }

    #[test]
    fn test_exponential_validation() {
        let too_fine = Aggregation::Base2ExponentialHistogram {
            max_size: 160,
            max_scale: 21,
            record_min_max: true,
        };
        assert!(too_fine.validate().is_err());
        assert!(Aggregation::default_exponential_histogram().validate().is_ok());
    }

    #[test]
    fn test_attribute_filter() {
        let stream = Stream::new().allowed_attribute_keys(["method"]);
        let filter = stream.attribute_filter().unwrap();
        assert!(filter.keeps(&KeyValue::new("method", "GET")));
        assert!(!filter.keeps(&KeyValue::new("user", "alice")));
    }
}
