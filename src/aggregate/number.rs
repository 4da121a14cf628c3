//! Numeric abstraction over the value types instruments record.
//!
//! Each number type names an atomic cell used for lock-free accumulation on
//! the measurement path: `AtomicI64` for integers and a CAS loop over the
//! bit pattern for floats.

use crate::data::{AggregatedMetrics, MetricData};
use std::fmt::Debug;
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A value type that can be aggregated
pub trait Number:
    Copy
    + Debug
    + Default
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Atomic cell holding one value of this type
    type Atomic: AtomicTracker<Self>;

    /// Type name used in diagnostics
    const NAME: &'static str;

    fn min_value() -> Self;
    fn max_value() -> Self;
    fn into_f64(self) -> f64;
    fn is_nan(self) -> bool;
    fn is_negative(self) -> bool;

    /// Tags aggregated data with this number type
    fn wrap(data: MetricData<Self>) -> AggregatedMetrics;

    /// Recovers data previously tagged by [`Number::wrap`]
    fn unwrap(data: AggregatedMetrics) -> Option<MetricData<Self>>;
}

/// Lock-free accumulation cell
pub trait AtomicTracker<T>: Send + Sync + 'static {
    fn new(value: T) -> Self;
    fn add(&self, value: T);
    fn store(&self, value: T);
    fn load(&self) -> T;
    fn swap(&self, value: T) -> T;
}

impl AtomicTracker<i64> for AtomicI64 {
    fn new(value: i64) -> Self {
        AtomicI64::new(value)
    }

    fn add(&self, value: i64) {
        self.fetch_add(value, Ordering::Relaxed);
    }

    fn store(&self, value: i64) {
        AtomicI64::store(self, value, Ordering::Relaxed);
    }

    fn load(&self) -> i64 {
        AtomicI64::load(self, Ordering::Relaxed)
    }

    fn swap(&self, value: i64) -> i64 {
        AtomicI64::swap(self, value, Ordering::Relaxed)
    }
}

/// `f64` stored as its bit pattern
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicTracker<f64> for AtomicF64 {
    fn new(value: f64) -> Self {
        AtomicF64(AtomicU64::new(value.to_bits()))
    }

    fn add(&self, value: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + value).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(x) => current = x,
            }
        }
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn swap(&self, value: f64) -> f64 {
        f64::from_bits(self.0.swap(value.to_bits(), Ordering::Relaxed))
    }
}

impl Number for i64 {
    type Atomic = AtomicI64;
    const NAME: &'static str = "i64";

    fn min_value() -> Self {
        i64::MIN
    }

    fn max_value() -> Self {
        i64::MAX
    }

    #[allow(clippy::cast_precision_loss)]
    fn into_f64(self) -> f64 {
        self as f64
    }

    fn is_nan(self) -> bool {
        false
    }

    fn is_negative(self) -> bool {
        self < 0
    }

    fn wrap(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::I64(data)
    }

    fn unwrap(data: AggregatedMetrics) -> Option<MetricData<Self>> {
        match data {
            AggregatedMetrics::I64(data) => Some(data),
            AggregatedMetrics::F64(_) => None,
        }
    }
}

impl Number for f64 {
    type Atomic = AtomicF64;
    const NAME: &'static str = "f64";

    fn min_value() -> Self {
        f64::MIN
    }

    fn max_value() -> Self {
        f64::MAX
    }

    fn into_f64(self) -> f64 {
        self
    }

    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }

    fn is_negative(self) -> bool {
        self < 0.0
    }

    fn wrap(data: MetricData<Self>) -> AggregatedMetrics {
        AggregatedMetrics::F64(data)
    }

    fn unwrap(data: AggregatedMetrics) -> Option<MetricData<Self>> {
        match data {
            AggregatedMetrics::F64(data) => Some(data),
            AggregatedMetrics::I64(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_atomic_f64_concurrent_add() {
        let cell = Arc::new(AtomicF64::new(0.0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = Arc::clone(&cell);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        cell.add(0.5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cell.load(), 4000.0);
    }

    #[test]
    fn test_swap_resets() {
        let cell = <i64 as Number>::Atomic::new(0);
        cell.add(7);
        assert_eq!(AtomicTracker::swap(&cell, 0), 7);
        assert_eq!(AtomicTracker::load(&cell), 0);
    }
}
