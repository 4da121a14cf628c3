use super::number::{AtomicTracker, Number};
use crate::core::{AttributeSet, Context, KeyValue};
use crate::data::Exemplar;
use crate::exemplar::{ExemplarSettings, FilteredReservoir};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Attribute set that absorbs measurements once a stream is at its
/// cardinality limit
pub(crate) static OVERFLOW_ATTRIBUTES: Lazy<AttributeSet> =
    Lazy::new(|| AttributeSet::new(&[KeyValue::new("otel.metric.overflow", true)]));

/// Aggregation state of one attribute set
pub(crate) struct Entry<N, T> {
    pub(crate) attrs: AttributeSet,
    pub(crate) tracker: T,
    reservoir: Option<FilteredReservoir<N>>,
}

impl<N: Number, T> Entry<N, T> {
    fn update(&self, ctx: &Context, value: N, dropped: &[KeyValue], update: impl FnOnce(&T)) {
        update(&self.tracker);
        if let Some(reservoir) = &self.reservoir {
            reservoir.offer(ctx, value, dropped);
        }
    }

    /// Moves the sampled exemplars into `dest`
    pub(crate) fn exemplars(&self, dest: &mut Vec<Exemplar<N>>) {
        match &self.reservoir {
            Some(reservoir) => reservoir.collect(dest),
            None => dest.clear(),
        }
    }
}

/// Map from attribute set to per-set state
///
/// Entries are created on first use and live as long as the stream;
/// temporality is handled by the trackers, which reset in place. A new set
/// arriving when the map already holds `limit - 1` sets is folded into the
/// overflow set instead.
pub(crate) struct ValueMap<N, T> {
    entries: RwLock<FxHashMap<AttributeSet, Arc<Entry<N, T>>>>,
    limit: usize,
    exemplars: ExemplarSettings,
    new_tracker: Box<dyn Fn() -> T + Send + Sync>,
}

impl<N: Number, T: Send + Sync + 'static> ValueMap<N, T> {
    pub(crate) fn new(
        limit: usize,
        exemplars: ExemplarSettings,
        new_tracker: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        ValueMap {
            entries: RwLock::new(FxHashMap::default()),
            limit,
            exemplars,
            new_tracker: Box::new(new_tracker),
        }
    }

    fn is_full(&self, len: usize) -> bool {
        self.limit > 0 && len >= self.limit - 1
    }

    pub(crate) fn measure(
        &self,
        ctx: &Context,
        value: N,
        attrs: &AttributeSet,
        dropped: &[KeyValue],
        update: impl FnOnce(&T),
    ) {
        {
            let entries = self.entries.read();
            if let Some(entry) = entries.get(attrs) {
                entry.update(ctx, value, dropped, update);
                return;
            }
            if self.is_full(entries.len()) {
                if let Some(entry) = entries.get(&*OVERFLOW_ATTRIBUTES) {
                    entry.update(ctx, value, dropped, update);
                    return;
                }
            }
        }

        let entry = {
            let mut entries = self.entries.write();
            let key = if entries.contains_key(attrs) || !self.is_full(entries.len()) {
                attrs.clone()
            } else {
                OVERFLOW_ATTRIBUTES.clone()
            };
            Arc::clone(entries.entry(key).or_insert_with_key(|key| {
                if *key == *OVERFLOW_ATTRIBUTES {
                    tracing::warn!(
                        limit = self.limit,
                        "cardinality limit reached, further attribute sets are aggregated into the overflow set"
                    );
                }
                Arc::new(Entry {
                    attrs: key.clone(),
                    tracker: (self.new_tracker)(),
                    reservoir: self.exemplars.build(),
                })
            }))
        };
        entry.update(ctx, value, dropped, update);
    }

    /// Snapshot of the live entries
    pub(crate) fn entries(&self) -> Vec<Arc<Entry<N, T>>> {
        self.entries.read().values().cloned().collect()
    }
}

/// Last-write-wins cell that remembers whether it was written since it was
/// last drained
pub(crate) struct Observed<N: Number> {
    value: N::Atomic,
    fresh: AtomicBool,
}

impl<N: Number> Observed<N> {
    pub(crate) fn new() -> Self {
        Observed {
            value: N::Atomic::new(N::default()),
            fresh: AtomicBool::new(false),
        }
    }

    pub(crate) fn set(&self, value: N) {
        self.value.store(value);
        self.fresh.store(true, Ordering::Release);
    }

    pub(crate) fn load(&self) -> N {
        self.value.load()
    }

    /// The value if it was written since the previous call
    pub(crate) fn take_fresh(&self) -> Option<N> {
        self.fresh
            .swap(false, Ordering::AcqRel)
            .then(|| self.value.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_util::attrs;
    use crate::exemplar::{ExemplarFilter, ReservoirConfig};
    use std::sync::atomic::AtomicI64;

    fn map(limit: usize) -> ValueMap<i64, AtomicI64> {
        ValueMap::new(
            limit,
            ExemplarSettings::new(ExemplarFilter::AlwaysOff, ReservoirConfig::FixedSize(1)),
            || AtomicI64::new(0),
        )
    }

    fn add(map: &ValueMap<i64, AtomicI64>, set: &AttributeSet, v: i64) {
        map.measure(&Context::new(), v, set, &[], |t| {
            AtomicTracker::add(t, v);
        });
    }

    #[test]
    fn test_overflow_after_limit() {
        let map = map(3);
        add(&map, &attrs(&[("k", "a")]), 1);
        add(&map, &attrs(&[("k", "b")]), 1);
        add(&map, &attrs(&[("k", "c")]), 5);
        add(&map, &attrs(&[("k", "d")]), 7);
        // Existing sets still aggregate normally
        add(&map, &attrs(&[("k", "a")]), 1);

        let entries = map.entries();
        assert_eq!(entries.len(), 3);
        let overflow = entries
            .iter()
            .find(|e| e.attrs == *OVERFLOW_ATTRIBUTES)
            .unwrap();
        assert_eq!(AtomicTracker::load(&overflow.tracker), 12);
        let a = entries.iter().find(|e| e.attrs == attrs(&[("k", "a")])).unwrap();
        assert_eq!(AtomicTracker::load(&a.tracker), 2);
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let map = map(0);
        for i in 0..100 {
            let v = i.to_string();
            add(&map, &attrs(&[("i", v.as_str())]), 1);
        }
        assert_eq!(map.entries().len(), 100);
    }

    #[test]
    fn test_observed_freshness() {
        let cell = Observed::<f64>::new();
        assert_eq!(cell.take_fresh(), None);
        cell.set(2.5);
        assert_eq!(cell.take_fresh(), Some(2.5));
        assert_eq!(cell.take_fresh(), None);
        assert_eq!(cell.load(), 2.5);
    }
}
