use super::storage::Storage;
use super::Reservoir;
use crate::aggregate::Number;
use crate::core::{Context, KeyValue};
use crate::data::Exemplar;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

/// Uniform random sample of at most `size` measurements per interval
///
/// The first `size` offers fill the slots in order. After that, offers are
/// admitted at geometrically growing gaps (Algorithm L), each replacing a
/// random slot, which keeps the sample uniform over everything offered
/// without drawing a random number per measurement.
pub struct FixedSizeReservoir<N> {
    storage: Storage<N>,
    count: AtomicU64,
    next: AtomicU64,
    sampler: Mutex<Sampler>,
}

struct Sampler {
    w: f64,
    rng: SmallRng,
}

impl Sampler {
    /// Uniform draw from the open interval (0, 1)
    fn random(&mut self) -> f64 {
        loop {
            let u: f64 = self.rng.gen();
            if u > 0.0 {
                return u;
            }
        }
    }
}

impl<N: Number> FixedSizeReservoir<N> {
    pub fn new(size: usize) -> Self {
        let reservoir = FixedSizeReservoir {
            storage: Storage::new(size),
            count: AtomicU64::new(0),
            next: AtomicU64::new(0),
            sampler: Mutex::new(Sampler {
                w: 0.0,
                rng: SmallRng::from_entropy(),
            }),
        };
        reservoir.reset();
        reservoir
    }

    fn capacity(&self) -> u64 {
        self.storage.len() as u64
    }

    fn reset(&self) {
        let k = self.storage.len();
        if k == 0 {
            return;
        }
        let mut sampler = self.sampler.lock();
        self.count.store(0, Ordering::Relaxed);
        self.next.store(k as u64, Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        let k = k as f64;
        sampler.w = (sampler.random().ln() / k).exp();
        self.advance(&mut sampler);
    }

    /// Moves `next` to the count of the following admitted offer
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn advance(&self, sampler: &mut Sampler) {
        let k = self.storage.len() as f64;
        sampler.w *= (sampler.random().ln() / k).exp();
        let skip = (sampler.random().ln() / (1.0 - sampler.w).ln()).floor();
        let skip = if skip.is_finite() && skip > 0.0 { skip as u64 } else { 0 };
        self.next.fetch_add(skip.saturating_add(1), Ordering::Relaxed);
    }
}

impl<N: Number> Reservoir<N> for FixedSizeReservoir<N> {
    fn offer(&self, ctx: &Context, time: SystemTime, value: N, filtered: &[KeyValue]) {
        let cap = self.capacity();
        if cap == 0 {
            return;
        }

        let idx = self.count.fetch_add(1, Ordering::Relaxed);
        if idx < cap {
            #[allow(clippy::cast_possible_truncation)]
            self.storage.store(idx as usize, ctx, time, value, filtered);
            return;
        }

        if idx == self.next.load(Ordering::Relaxed) {
            let mut sampler = self.sampler.lock();
            let slot = sampler.rng.gen_range(0..self.storage.len());
            self.storage.store(slot, ctx, time, value, filtered);
            self.advance(&mut sampler);
        }
    }

    fn collect(&self, dest: &mut Vec<Exemplar<N>>) {
        self.storage.collect(dest);
        self.reset();
    }
}
