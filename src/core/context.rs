//! Call context threaded through the measurement and collection paths.
//!
//! On the measurement path a [`Context`] carries the active span so exemplar
//! reservoirs can record trace correlation. On the collection path it
//! carries cancellation and a deadline; every sweep checks it between units
//! of work and aborts with the context error once it fires.

use crate::core::{MetricsError, Result};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// 16-byte trace identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraceId([u8; 16]);

/// 8-byte span identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpanId([u8; 8]);

impl TraceId {
    /// The all-zero, invalid trace id
    pub const INVALID: TraceId = TraceId([0; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        TraceId(bytes)
    }

    /// Parses a 32 character hex string
    pub fn from_hex(hex_id: &str) -> Result<Self> {
        let mut bytes = [0u8; 16];
        hex::decode_to_slice(hex_id, &mut bytes)
            .map_err(|e| MetricsError::config(format!("invalid trace id {:?}: {}", hex_id, e)))?;
        Ok(TraceId(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl SpanId {
    /// The all-zero, invalid span id
    pub const INVALID: SpanId = SpanId([0; 8]);

    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        SpanId(bytes)
    }

    /// Parses a 16 character hex string
    pub fn from_hex(hex_id: &str) -> Result<Self> {
        let mut bytes = [0u8; 8];
        hex::decode_to_slice(hex_id, &mut bytes)
            .map_err(|e| MetricsError::config(format!("invalid span id {:?}: {}", hex_id, e)))?;
        Ok(SpanId(bytes))
    }

    pub const fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({})", self)
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({})", self)
    }
}

/// Identity of the span active when a measurement was made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl SpanContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, sampled: bool) -> Self {
        SpanContext {
            trace_id,
            span_id,
            sampled,
        }
    }

    /// Both ids are non-zero
    pub fn is_valid(&self) -> bool {
        self.trace_id.is_valid() && self.span_id.is_valid()
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }
}

/// Cancellation, deadline and span information for one call
#[derive(Debug, Clone, Default)]
pub struct Context {
    span: Option<SpanContext>,
    cancel: Option<CancellationToken>,
    deadline: Option<Deadline>,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Context {
    /// An empty context: no span, never cancelled, no deadline
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the active span
    pub fn with_span(mut self, span: SpanContext) -> Self {
        self.span = Some(span);
        self
    }

    /// The active span, if one is valid
    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref().filter(|s| s.is_valid())
    }

    /// Ties the context to a cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bounds the context by `timeout` from now. An earlier existing
    /// deadline is kept.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let at = Instant::now() + timeout;
        match self.deadline {
            Some(existing) if existing.at <= at => {},
            _ => {
                self.deadline = Some(Deadline {
                    at,
                    budget: timeout,
                })
            },
        }
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.map(|d| d.at)
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.at.saturating_duration_since(Instant::now()))
    }

    /// The context error once cancelled or expired
    pub fn err(&self) -> Option<MetricsError> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return Some(MetricsError::Cancelled);
        }
        match self.deadline {
            Some(d) if Instant::now() >= d.at => Some(Self::deadline_error(d)),
            _ => None,
        }
    }

    /// Returns the context error, if any
    pub fn check(&self) -> Result<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn deadline_error(d: Deadline) -> MetricsError {
        MetricsError::DeadlineExceeded {
            timeout_ms: u64::try_from(d.budget.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Drives `fut` until it completes or the context is cancelled or
    /// expires, whichever happens first.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;

        let cancelled = async {
            match &self.cancel {
                Some(token) => token.cancelled().await,
                None => futures::future::pending::<()>().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(tokio::time::Instant::from_std(d.at)).await,
                None => futures::future::pending::<()>().await,
            }
        };

        tokio::select! {
            res = fut => res,
            _ = cancelled => Err(MetricsError::Cancelled),
            _ = expired => Err(self.deadline.map_or(MetricsError::Cancelled, Self::deadline_error)),
        }
    }
}
