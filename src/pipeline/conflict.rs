use super::cache::Cache;
use super::StreamId;
use crate::core::diagnostics::handle_error;
use crate::core::{InstrumentationScope, MetricsError};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::fmt;

/// A stream identity together with the number type that created it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct StreamIdentity {
    id: StreamId,
    number: &'static str,
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.number)
    }
}

/// Detects streams whose names collide case-insensitively within a scope
/// but whose definitions differ
///
/// Shared by every pipeline of a provider so that each conflicting pair is
/// reported exactly once no matter how many readers or repeat creations hit
/// it.
pub(crate) struct ConflictTracker {
    first: Cache<(InstrumentationScope, String), StreamIdentity>,
    reported: Mutex<FxHashSet<(StreamIdentity, StreamIdentity)>>,
}

impl ConflictTracker {
    pub(crate) fn new() -> Self {
        ConflictTracker {
            first: Cache::new(),
            reported: Mutex::new(FxHashSet::default()),
        }
    }

    /// Records `id` and reports it if an earlier stream of the same name was
    /// defined differently
    pub(crate) fn check(&self, id: &StreamId, number: &'static str) {
        let requested = StreamIdentity {
            id: id.clone(),
            number,
        };
        let key = (id.scope.clone(), id.name.to_lowercase());
        let existing = self.first.lookup(key, || requested.clone());
        if existing == requested {
            return;
        }

        let newly_seen = self
            .reported
            .lock()
            .insert((existing.clone(), requested.clone()));
        if newly_seen {
            handle_error(MetricsError::DuplicateInstrument {
                existing: existing.to_string(),
                requested: requested.to_string(),
            });
        }
    }
}
