//! Meterline - in-process metrics pipeline.
//!
//! Meterline turns measurements recorded on counters, histograms and gauges
//! into aggregated, exemplar-annotated data points that one or more readers
//! collect independently.
//!
//! # Features
//!
//! - **Views**: rename, re-aggregate, filter attributes of or drop matched
//!   instruments
//! - **Aggregations**: sums, last value, explicit-bucket and base-2
//!   exponential histograms, cumulative or delta
//! - **Exemplars**: trace-correlated sample measurements per data point
//! - **Bounded memory**: per-stream cardinality limit with an overflow set
//! - **Readers**: on-demand collection or periodic push to an exporter
//!
//! # Architecture
//!
//! - `instrument`: measurement handles and the recording policy
//! - `view`: stream matching and aggregation selection
//! - `aggregate`: concurrent aggregators behind a hot-path `Measure`
//! - `exemplar`: exemplar filters and reservoirs
//! - `pipeline`: per-reader instrument resolution and collection
//! - `reader`: manual and periodic readers
//! - `provider`: `MeterProvider` and `Meter`
//!
//! # Example
//!
//! ```no_run
//! use meterline::{Context, KeyValue, ManualReader, MeterProvider, MetricReader, ResourceMetrics};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> meterline::Result<()> {
//!     let reader = Arc::new(ManualReader::builder().build());
//!     let provider = MeterProvider::builder().with_reader(reader.clone()).build();
//!
//!     let requests = provider.meter("checkout").counter::<i64>("http.requests");
//!     requests.add(1, &[KeyValue::new("route", "/cart")]);
//!
//!     let mut rm = ResourceMetrics::default();
//!     reader.collect(&Context::new(), &mut rm).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregate;
pub mod core;
pub mod data;
pub mod exemplar;
pub mod instrument;
pub mod pipeline;
pub mod provider;
pub mod reader;
pub mod view;

// Re-export commonly used types
pub use crate::core::{
    Config, ConfigBuilder, Context, InstrumentationScope, Key, KeyValue, MetricsError, Resource,
    Result, SpanContext, SpanId, TraceId, Value,
};
pub use crate::data::{ResourceMetrics, Temporality};
pub use crate::exemplar::ExemplarFilter;
pub use crate::instrument::{
    Counter, Gauge, Histogram, InstrumentConfig, InstrumentKind, Observable, UpDownCounter,
};
pub use crate::pipeline::Registration;
pub use crate::provider::{global, Meter, MeterProvider, MeterProviderBuilder};
pub use crate::reader::{
    ManualReader, MetricProducer, MetricReader, PeriodicReader, PushExporter,
};
pub use crate::view::{Aggregation, Criteria, Stream, View};
