//! Fixed-capacity circular store of decoded sample records (spec.md §3, §9).
//!
//! Parallel column storage indexed by a write cursor, matching the
//! language-neutral requirement of O(1) append and O(k) snapshot reads.
//! Single-producer (the receiver), multi-consumer (snapshot reads from the
//! processing stage and, for diagnostics, the control task).

use parking_lot::Mutex;

use crate::sample::SampleRecord;

struct RingInner {
    buf: Vec<Option<SampleRecord>>,
    capacity: usize,
    write_pos: usize,
    len: usize,
    overwrites: u64,
    total_pushed: u64,
}

/// A fixed-capacity, overwrite-on-full circular buffer of `SampleRecord`s.
pub struct RawRing {
    inner: Mutex<RingInner>,
}

impl RawRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RawRing capacity must be > 0");
        Self {
            inner: Mutex::new(RingInner {
                buf: vec![None; capacity],
                capacity,
                write_pos: 0,
                len: 0,
                overwrites: 0,
                total_pushed: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Appends a sample, overwriting the oldest entry if at capacity. Never
    /// blocks; the lock here is held only for the duration of a slot write
    /// and cursor advance (spec.md §5's "short-held lock").
    pub fn push(&self, sample: SampleRecord) {
        let mut inner = self.inner.lock();
        let pos = inner.write_pos;
        let was_full = inner.len == inner.capacity;
        inner.buf[pos] = Some(sample);
        inner.write_pos = (pos + 1) % inner.capacity;
        inner.total_pushed += 1;
        if was_full {
            inner.overwrites += 1;
        } else {
            inner.len += 1;
        }
    }

    /// Number of samples currently stored (`<= capacity`).
    pub fn len(&self) -> usize {
        self.inner.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn overwrites(&self) -> u64 {
        self.inner.lock().overwrites
    }

    pub fn total_pushed(&self) -> u64 {
        self.inner.lock().total_pushed
    }

    /// Snapshot of the last `n` entries (or fewer, if not yet filled) in
    /// reception order.
    pub fn snapshot_last(&self, n: usize) -> Vec<SampleRecord> {
        let inner = self.inner.lock();
        let take = n.min(inner.len);
        let mut out = Vec::with_capacity(take);
        // Oldest retained slot among the last `take` entries.
        let start = (inner.write_pos + inner.capacity - take) % inner.capacity;
        for i in 0..take {
            let idx = (start + i) % inner.capacity;
            if let Some(sample) = inner.buf[idx] {
                out.push(sample);
            }
        }
        out
    }

    /// Snapshot of every sample currently stored, in reception order.
    pub fn snapshot_all(&self) -> Vec<SampleRecord> {
        let len = self.len();
        self.snapshot_last(len)
    }

    /// Drains every sample pushed since `cursor`'s last call, in reception
    /// order, and advances `cursor`. This is the processing stage's read
    /// path: a single logical consumer walking forward through the ring. If
    /// the processing stage falls behind by more than `capacity` pushes, the
    /// overrun entries are unrecoverable (they were overwritten) and are
    /// simply not returned — the ring's own `overwrites` counter already
    /// accounts for that loss.
    pub fn drain_new(&self, cursor: &mut u64) -> Vec<SampleRecord> {
        let inner = self.inner.lock();
        let now_total = inner.total_pushed;
        let new_count = now_total.saturating_sub(*cursor);
        *cursor = now_total;
        if new_count == 0 {
            return Vec::new();
        }
        let take = (new_count as usize).min(inner.len);
        let mut out = Vec::with_capacity(take);
        let start = (inner.write_pos + inner.capacity - take) % inner.capacity;
        for i in 0..take {
            let idx = (start + i) % inner.capacity;
            if let Some(sample) = inner.buf[idx] {
                out.push(sample);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(seq: u32) -> SampleRecord {
        SampleRecord::new(seq as u64, seq, seq, 0, [0; 6])
    }

    #[test]
    fn holds_min_of_n_and_capacity() {
        let ring = RawRing::new(4);
        for i in 1..=3 {
            ring.push(sample(i));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.overwrites(), 0);

        for i in 4..=7 {
            ring.push(sample(i));
        }
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.overwrites(), 3);
    }

    #[test]
    fn snapshot_preserves_reception_order_under_overwrite() {
        let ring = RawRing::new(3);
        for i in 1..=5 {
            ring.push(sample(i));
        }
        let snap = ring.snapshot_all();
        let seqs: Vec<u32> = snap.iter().map(|s| s.rdt_sequence).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[test]
    fn snapshot_last_n_caps_at_len() {
        let ring = RawRing::new(10);
        for i in 1..=3 {
            ring.push(sample(i));
        }
        assert_eq!(ring.snapshot_last(100).len(), 3);
    }

    #[test]
    fn drain_new_returns_only_fresh_entries_in_order() {
        let ring = RawRing::new(10);
        let mut cursor = 0u64;
        for i in 1..=3 {
            ring.push(sample(i));
        }
        let first = ring.drain_new(&mut cursor);
        assert_eq!(first.iter().map(|s| s.rdt_sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(ring.drain_new(&mut cursor).is_empty());

        for i in 4..=6 {
            ring.push(sample(i));
        }
        let second = ring.drain_new(&mut cursor);
        assert_eq!(second.iter().map(|s| s.rdt_sequence).collect::<Vec<_>>(), vec![4, 5, 6]);
    }

    #[test]
    fn drain_new_skips_entries_overwritten_while_behind() {
        let ring = RawRing::new(3);
        let mut cursor = 0u64;
        for i in 1..=8 {
            ring.push(sample(i));
        }
        // Capacity is 3, so only the last 3 of the 8 pushed are still available.
        let drained = ring.drain_new(&mut cursor);
        assert_eq!(drained.iter().map(|s| s.rdt_sequence).collect::<Vec<_>>(), vec![6, 7, 8]);
    }
}
