use thiserror::Error;

use crate::instrument::InstrumentKind;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("reader is not registered with a pipeline")]
    ReaderNotRegistered,

    #[error("reader is shutdown")]
    ReaderShutdown,

    #[error("collection cancelled")]
    Cancelled,

    #[error("deadline exceeded: operation took longer than {timeout_ms}ms")]
    DeadlineExceeded { timeout_ms: u64 },

    #[error("incompatible aggregation: {aggregation} cannot be used with {kind:?} instrument {name}")]
    IncompatibleAggregation {
        name: String,
        kind: InstrumentKind,
        aggregation: String,
    },

    #[error("invalid aggregation: {0}")]
    InvalidAggregation(String),

    #[error("invalid view: {0}")]
    InvalidView(String),

    #[error("invalid instrument: {0}")]
    InvalidInstrument(String),

    #[error("duplicate metric stream definitions: {existing} conflicts with {requested}")]
    DuplicateInstrument { existing: String, requested: String },

    #[error("aggregator for stream {0} was created with a different number type")]
    NumberTypeConflict(String),

    #[error("export failed: {0}")]
    Export(String),

    #[error("producer failed: {0}")]
    Producer(String),

    #[error("callback failed: {0}")]
    Callback(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Join(String),

    #[error("{}", join_messages(.0))]
    Multiple(Vec<MetricsError>),
}

/// Result type alias for metrics pipeline operations
pub type Result<T> = std::result::Result<T, MetricsError>;

fn join_messages(errors: &[MetricsError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MetricsError {
    /// Creates a new export error
    pub fn export<S: Into<String>>(msg: S) -> Self {
        Self::Export(msg.into())
    }

    /// Creates a new producer error
    pub fn producer<S: Into<String>>(msg: S) -> Self {
        Self::Producer(msg.into())
    }

    /// Creates a new callback error
    pub fn callback<S: Into<String>>(msg: S) -> Self {
        Self::Callback(msg.into())
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new view error
    pub fn view<S: Into<String>>(msg: S) -> Self {
        Self::InvalidView(msg.into())
    }

    /// Creates a new aggregation error
    pub fn aggregation<S: Into<String>>(msg: S) -> Self {
        Self::InvalidAggregation(msg.into())
    }

    /// Joins a list of errors into one. Returns `Ok` when the list is empty
    /// and the lone error unchanged when it holds one.
    pub fn join(mut errors: Vec<MetricsError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Returns true if the error came from a cancelled or expired context
    pub fn is_context_error(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded { .. })
    }

    /// Returns the error category for diagnostics and logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::ReaderNotRegistered | Self::ReaderShutdown => "lifecycle",
            Self::Cancelled | Self::DeadlineExceeded { .. } => "context",
            Self::IncompatibleAggregation { .. }
            | Self::InvalidAggregation(_)
            | Self::InvalidView(_)
            | Self::InvalidInstrument(_) => "configuration",
            Self::DuplicateInstrument { .. } => "conflict",
            Self::NumberTypeConflict(_) => "cache",
            Self::Export(_) => "export",
            Self::Producer(_) | Self::Callback(_) => "collection",
            Self::Config(_) | Self::Io(_) => "config",
            Self::Join(_) => "async",
            Self::Multiple(_) => "multiple",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MetricsError::export("connection refused");
        assert_eq!(err.to_string(), "export failed: connection refused");
        assert_eq!(err.category(), "export");
    }

    #[test]
    fn test_join_errors() {
        assert!(MetricsError::join(vec![]).is_ok());

        let single = MetricsError::join(vec![MetricsError::ReaderShutdown]).unwrap_err();
        assert!(matches!(single, MetricsError::ReaderShutdown));

        let joined = MetricsError::join(vec![
            MetricsError::producer("a"),
            MetricsError::callback("b"),
        ])
        .unwrap_err();
        assert_eq!(joined.to_string(), "producer failed: a; callback failed: b");
        assert_eq!(joined.category(), "multiple");
    }

    #[test]
    fn test_context_errors() {
        assert!(MetricsError::Cancelled.is_context_error());
        assert!(MetricsError::DeadlineExceeded { timeout_ms: 10 }.is_context_error());
        assert!(!MetricsError::ReaderShutdown.is_context_error());
    }

    #[test]
    fn test_incompatible_aggregation_message() {
        let err = MetricsError::IncompatibleAggregation {
            name: "queue.depth".to_string(),
            kind: InstrumentKind::Gauge,
            aggregation: "Sum".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "incompatible aggregation: Sum cannot be used with Gauge instrument queue.depth"
        );
        assert_eq!(err.category(), "configuration");
    }
}
