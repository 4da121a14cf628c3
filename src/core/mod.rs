//! Core types shared by every layer of the pipeline: errors, configuration,
//! diagnostics, call context and attribute types.

pub mod config;
pub mod context;
pub mod diagnostics;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigBuilder, LogLevel, LoggingConfig};
pub use context::{Context, SpanContext, SpanId, TraceId};
pub use diagnostics::{handle_error, reset_error_handler, set_error_handler};
pub use error::{MetricsError, Result};
pub use types::{AttributeSet, InstrumentationScope, Key, KeyValue, Resource, Value};
