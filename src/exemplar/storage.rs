use crate::core::{Context, KeyValue, SpanContext};
use crate::data::Exemplar;
use parking_lot::Mutex;
use std::time::SystemTime;

/// Collected buffers larger than this multiple of the live size are shrunk
const SHRINK_FACTOR: usize = 4;

struct Measurement<N> {
    filtered: Vec<KeyValue>,
    time: SystemTime,
    value: N,
    span: Option<SpanContext>,
}

impl<N: Copy> Measurement<N> {
    fn exemplar(self) -> Exemplar<N> {
        Exemplar {
            filtered_attributes: self.filtered,
            time: self.time,
            value: self.value,
            span_id: self.span.map(|s| s.span_id),
            trace_id: self.span.map(|s| s.trace_id),
        }
    }
}

/// Fixed number of independently locked exemplar slots
pub(crate) struct Storage<N> {
    slots: Box<[Mutex<Option<Measurement<N>>>]>,
}

impl<N: Copy> Storage<N> {
    pub(crate) fn new(size: usize) -> Self {
        Storage {
            slots: (0..size).map(|_| Mutex::new(None)).collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn store(
        &self,
        idx: usize,
        ctx: &Context,
        time: SystemTime,
        value: N,
        filtered: &[KeyValue],
    ) {
        if let Some(slot) = self.slots.get(idx) {
            *slot.lock() = Some(Measurement {
                filtered: filtered.to_vec(),
                time,
                value,
                span: ctx.span().copied(),
            });
        }
    }

    /// Moves every occupied slot into `dest`, leaving the storage empty
    pub(crate) fn collect(&self, dest: &mut Vec<Exemplar<N>>) {
        reset_buffer(dest, self.slots.len());
        for slot in self.slots.iter() {
            if let Some(m) = slot.lock().take() {
                dest.push(m.exemplar());
            }
        }
    }
}

/// Clears `buf` for reuse with room for `capacity` items, shrinking it when
/// a previous cycle left it much larger than needed
pub(crate) fn reset_buffer<T>(buf: &mut Vec<T>, capacity: usize) {
    buf.clear();
    if buf.capacity() > capacity.saturating_mul(SHRINK_FACTOR).max(SHRINK_FACTOR) {
        buf.shrink_to(capacity);
    }
    buf.reserve(capacity);
}
