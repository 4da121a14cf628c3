//! Instrument descriptors and the handles applications record through.
//!
//! A handle owns one [`Measure`] per pipeline stream that resolved for it.
//! Recording builds the attribute set once and fans the value out to every
//! measure. Values the instrument kind cannot accept (NaN anywhere, negative
//! increments on a monotonic counter) are dropped here and never reach an
//! aggregator.

use crate::aggregate::{Measure, Number};
use crate::core::{AttributeSet, Context, InstrumentationScope, KeyValue};
use std::fmt;
use std::sync::Arc;

/// The kind of an instrument, which decides its default aggregation and
/// which aggregations are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstrumentKind {
    Counter,
    UpDownCounter,
    Histogram,
    Gauge,
    ObservableCounter,
    ObservableUpDownCounter,
    ObservableGauge,
}

impl InstrumentKind {
    /// Sums of these kinds never decrease
    pub fn is_monotonic(&self) -> bool {
        matches!(
            self,
            InstrumentKind::Counter | InstrumentKind::ObservableCounter | InstrumentKind::Histogram
        )
    }

    /// Observations replace the previous value instead of adding to it
    pub fn is_precomputed(&self) -> bool {
        matches!(
            self,
            InstrumentKind::ObservableCounter
                | InstrumentKind::ObservableUpDownCounter
                | InstrumentKind::ObservableGauge
        )
    }

    /// Whether histogram data of this kind carries a meaningful sum
    pub(crate) fn has_histogram_sum(&self) -> bool {
        !matches!(
            self,
            InstrumentKind::UpDownCounter
                | InstrumentKind::ObservableUpDownCounter
                | InstrumentKind::Gauge
                | InstrumentKind::ObservableGauge
        )
    }
}

/// Identity of an instrument as seen by views and the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instrument {
    pub name: String,
    pub description: String,
    pub kind: InstrumentKind,
    pub unit: String,
    pub scope: InstrumentationScope,
}

/// Name, description and unit supplied when creating an instrument
#[derive(Debug, Clone, Default)]
pub struct InstrumentConfig {
    pub name: String,
    pub description: String,
    pub unit: String,
}

impl InstrumentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        InstrumentConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }
}

impl From<&str> for InstrumentConfig {
    fn from(name: &str) -> Self {
        InstrumentConfig::new(name)
    }
}

impl From<String> for InstrumentConfig {
    fn from(name: String) -> Self {
        InstrumentConfig::new(name)
    }
}

/// Shared recording path of every handle
struct Recorder<N> {
    name: Arc<str>,
    monotonic: bool,
    measures: Vec<Measure<N>>,
}

impl<N: Number> Recorder<N> {
    fn record(&self, ctx: &Context, value: N, attrs: &[KeyValue]) {
        if self.measures.is_empty() {
            return;
        }
        if value.is_nan() {
            tracing::debug!(instrument = %self.name, "dropping NaN measurement");
            return;
        }
        if self.monotonic && value.is_negative() {
            tracing::debug!(
                instrument = %self.name,
                value = ?value,
                "dropping negative increment on monotonic instrument"
            );
            return;
        }

        let attrs = AttributeSet::new(attrs);
        for measure in &self.measures {
            measure.record(ctx, value, &attrs);
        }
    }
}

macro_rules! sync_instrument {
    ($(#[$doc:meta])* $name:ident, $method:ident, $method_ctx:ident) => {
        $(#[$doc])*
        pub struct $name<N> {
            inner: Arc<Recorder<N>>,
        }

        impl<N: Number> $name<N> {
            pub(crate) fn new(name: &str, monotonic: bool, measures: Vec<Measure<N>>) -> Self {
                $name {
                    inner: Arc::new(Recorder {
                        name: Arc::from(name),
                        monotonic,
                        measures,
                    }),
                }
            }

            pub fn $method(&self, value: N, attrs: &[KeyValue]) {
                self.inner.record(&Context::new(), value, attrs);
            }

            /// Records with the span and cancellation carried by `ctx`
            pub fn $method_ctx(&self, ctx: &Context, value: N, attrs: &[KeyValue]) {
                self.inner.record(ctx, value, attrs);
            }

            /// Returns true if no stream records this instrument
            pub fn is_noop(&self) -> bool {
                self.inner.measures.is_empty()
            }
        }

        impl<N> Clone for $name<N> {
            fn clone(&self) -> Self {
                $name {
                    inner: Arc::clone(&self.inner),
                }
            }
        }

        impl<N> fmt::Debug for $name<N> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("name", &self.inner.name)
                    .field("streams", &self.inner.measures.len())
                    .finish()
            }
        }
    };
}

sync_instrument!(
    /// Monotonic sum of increments
    Counter,
    add,
    add_with_context
);
sync_instrument!(
    /// Sum of increments and decrements
    UpDownCounter,
    add,
    add_with_context
);
sync_instrument!(
    /// Distribution of recorded values
    Histogram,
    record,
    record_with_context
);
sync_instrument!(
    /// Latest recorded value
    Gauge,
    record,
    record_with_context
);

/// Handle passed to asynchronous instrument callbacks
///
/// Each call to [`Observable::observe`] reports the current value for one
/// attribute set; it replaces, rather than adds to, any earlier observation
/// for that set.
pub struct Observable<N> {
    inner: Arc<Recorder<N>>,
    kind: InstrumentKind,
}

impl<N: Number> Observable<N> {
    pub(crate) fn new(name: &str, kind: InstrumentKind, measures: Vec<Measure<N>>) -> Self {
        Observable {
            inner: Arc::new(Recorder {
                name: Arc::from(name),
                monotonic: kind == InstrumentKind::ObservableCounter,
                measures,
            }),
            kind,
        }
    }

    pub fn observe(&self, value: N, attrs: &[KeyValue]) {
        self.inner.record(&Context::new(), value, attrs);
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn is_noop(&self) -> bool {
        self.inner.measures.is_empty()
    }
}

impl<N> Clone for Observable<N> {
    fn clone(&self) -> Self {
        Observable {
            inner: Arc::clone(&self.inner),
            kind: self.kind,
        }
    }
}

impl<N> fmt::Debug for Observable<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("name", &self.inner.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Checks an instrument name against the allowed grammar: an ASCII letter
/// followed by up to 254 letters, digits, `_`, `.`, `-` or `/`
pub(crate) fn validate_name(name: &str) -> Result<(), String> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err("instrument name must not be empty".to_string()),
        Some(c) if !c.is_ascii_alphabetic() => {
            return Err(format!("instrument name {:?} must start with a letter", name))
        },
        _ => {},
    }
    if name.len() > 255 {
        return Err(format!("instrument name {:?} exceeds 255 characters", name));
    }
    if let Some(bad) = chars.find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | '/'))) {
        return Err(format!("instrument name {:?} contains invalid character {:?}", name, bad));
    }
    Ok(())
}
