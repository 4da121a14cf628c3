use super::storage::Storage;
use super::Reservoir;
use crate::aggregate::Number;
use crate::core::{Context, KeyValue};
use crate::data::Exemplar;
use std::time::SystemTime;

/// Keeps the most recent measurement for each histogram bucket
///
/// Slot `i` corresponds to the bucket `(bounds[i-1], bounds[i]]`, the same
/// mapping explicit histograms use, so every retained exemplar falls in the
/// bucket of the slot that holds it.
pub struct HistogramReservoir<N> {
    bounds: Vec<f64>,
    storage: Storage<N>,
}

impl<N: Number> HistogramReservoir<N> {
    pub fn new(bounds: Vec<f64>) -> Self {
        let storage = Storage::new(bounds.len() + 1);
        HistogramReservoir { bounds, storage }
    }
}

impl<N: Number> Reservoir<N> for HistogramReservoir<N> {
    fn offer(&self, ctx: &Context, time: SystemTime, value: N, filtered: &[KeyValue]) {
        let v = value.into_f64();
        let idx = self.bounds.partition_point(|&b| b < v);
        self.storage.store(idx, ctx, time, value, filtered);
    }

    fn collect(&self, dest: &mut Vec<Exemplar<N>>) {
        self.storage.collect(dest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_offer_per_bucket_wins() {
        let reservoir = HistogramReservoir::<f64>::new(vec![1.0, 10.0]);
        let ctx = Context::new();
        let now = SystemTime::now();

        reservoir.offer(&ctx, now, 0.5, &[]);
        reservoir.offer(&ctx, now, 1.0, &[]);
        reservoir.offer(&ctx, now, 5.0, &[]);
        reservoir.offer(&ctx, now, 7.0, &[]);
        reservoir.offer(&ctx, now, 50.0, &[]);

        let mut dest = Vec::new();
        reservoir.collect(&mut dest);
        let values: Vec<_> = dest.iter().map(|e| e.value).collect();
        // 1.0 lands in the first bucket and replaces 0.5
        assert_eq!(values, vec![1.0, 7.0, 50.0]);
    }

    #[test]
    fn test_no_bounds_single_slot() {
        let reservoir = HistogramReservoir::<i64>::new(Vec::new());
        let ctx = Context::new();
        reservoir.offer(&ctx, SystemTime::now(), 3, &[]);
        reservoir.offer(&ctx, SystemTime::now(), -4, &[]);

        let mut dest = Vec::new();
        reservoir.collect(&mut dest);
        assert_eq!(dest.len(), 1);
        assert_eq!(dest[0].value, -4);
    }
}
