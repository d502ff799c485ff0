//! Multi-resolution visualization buffer (spec.md §3, §4.5): a raw tier plus
//! three downsampled tiers, each a fixed-capacity ring of min/max buckets
//! keyed by bucket-start timestamp.

use std::collections::VecDeque;

use parking_lot::RwLock;

use crate::sample::NUM_CHANNELS;

/// One aggregation bucket: per-channel min/max and a sample count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierBucket {
    pub bucket_start_ns: u64,
    pub min: [f32; NUM_CHANNELS],
    pub max: [f32; NUM_CHANNELS],
    pub count: u32,
}

impl TierBucket {
    fn new(bucket_start_ns: u64, values: &[f64; NUM_CHANNELS]) -> Self {
        let mut min = [0f32; NUM_CHANNELS];
        let mut max = [0f32; NUM_CHANNELS];
        for i in 0..NUM_CHANNELS {
            min[i] = values[i] as f32;
            max[i] = values[i] as f32;
        }
        Self { bucket_start_ns, min, max, count: 1 }
    }

    fn fold(&mut self, values: &[f64; NUM_CHANNELS]) {
        for i in 0..NUM_CHANNELS {
            let v = values[i] as f32;
            if v < self.min[i] {
                self.min[i] = v;
            }
            if v > self.max[i] {
                self.max[i] = v;
            }
        }
        self.count += 1;
    }
}

/// `span_ns == None` marks the raw tier, where every sample is its own
/// bucket (so there is nothing to fold into).
struct Tier {
    span_ns: Option<u64>,
    capacity: usize,
    buckets: VecDeque<TierBucket>,
}

impl Tier {
    fn new(span_ns: Option<u64>, capacity: usize) -> Self {
        Self { span_ns, capacity, buckets: VecDeque::with_capacity(capacity) }
    }

    fn push(&mut self, t_ns: u64, values: &[f64; NUM_CHANNELS]) {
        match self.span_ns {
            None => self.push_evicting(TierBucket::new(t_ns, values)),
            Some(span) => {
                let bucket_start = (t_ns / span) * span;
                if let Some(last) = self.buckets.back_mut() {
                    if last.bucket_start_ns == bucket_start {
                        last.fold(values);
                        return;
                    }
                }
                self.push_evicting(TierBucket::new(bucket_start, values));
            }
        }
    }

    fn push_evicting(&mut self, bucket: TierBucket) {
        if self.buckets.len() == self.capacity {
            self.buckets.pop_front();
        }
        self.buckets.push_back(bucket);
    }

    /// Buckets intersecting `[from_ns, to_ns]`, oldest first.
    fn buckets_in_window(&self, from_ns: u64, to_ns: u64) -> Vec<TierBucket> {
        self.buckets
            .iter()
            .filter(|b| {
                let span = self.span_ns.unwrap_or(1);
                let bucket_end = b.bucket_start_ns + span;
                bucket_end > from_ns && b.bucket_start_ns <= to_ns
            })
            .copied()
            .collect()
    }

    /// Estimated bucket count a window of `window_ns` would produce in this
    /// tier, bounded by its capacity.
    fn estimated_points(&self, window_ns: u64) -> usize {
        let span = self.span_ns.unwrap_or(1).max(1);
        let estimate = (window_ns / span) as usize + 1;
        estimate.min(self.capacity)
    }
}

pub const RAW_CAPACITY: usize = 60_000;
pub const T1_SPAN_NS: u64 = 100_000_000; // 100 ms
pub const T1_CAPACITY: usize = 36_000; // 1 h
pub const T2_SPAN_NS: u64 = 10_000_000_000; // 10 s
pub const T2_CAPACITY: usize = 8_640; // 24 h
pub const T3_SPAN_NS: u64 = 100_000_000_000; // 100 s
pub const T3_CAPACITY: usize = 6_048; // 7 days

struct VizInner {
    raw: Tier,
    t1: Tier,
    t2: Tier,
    t3: Tier,
    latest_ns: u64,
}

/// Which tier a read was served from, for diagnostics/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierId {
    Raw,
    T1,
    T2,
    T3,
}

#[derive(Debug, Clone)]
pub struct Series {
    pub tier: TierId,
    pub buckets: Vec<TierBucket>,
}

pub struct VizBuffer {
    inner: RwLock<VizInner>,
}

impl Default for VizBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl VizBuffer {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(VizInner {
                raw: Tier::new(None, RAW_CAPACITY),
                t1: Tier::new(Some(T1_SPAN_NS), T1_CAPACITY),
                t2: Tier::new(Some(T2_SPAN_NS), T2_CAPACITY),
                t3: Tier::new(Some(T3_SPAN_NS), T3_CAPACITY),
                latest_ns: 0,
            }),
        }
    }

    /// Folds one converted sample into all four tiers (spec.md §4.5). Called
    /// only from the processing stage.
    pub fn push(&self, t_ns: u64, values: &[f64; NUM_CHANNELS]) {
        let mut inner = self.inner.write();
        inner.raw.push(t_ns, values);
        inner.t1.push(t_ns, values);
        inner.t2.push(t_ns, values);
        inner.t3.push(t_ns, values);
        inner.latest_ns = inner.latest_ns.max(t_ns);
    }

    /// Reads the window `[t_now - window_sec, t_now]`, selecting the finest
    /// tier whose point count does not exceed `point_budget`; falls back to
    /// the coarsest tier if even that would exceed budget (spec.md §4.5).
    pub fn get_series(&self, window_sec: u64, point_budget: usize) -> Series {
        let inner = self.inner.read();
        let window_ns = window_sec.saturating_mul(1_000_000_000);
        let to_ns = inner.latest_ns;
        let from_ns = to_ns.saturating_sub(window_ns);

        let candidates: [(TierId, &Tier); 4] =
            [(TierId::Raw, &inner.raw), (TierId::T1, &inner.t1), (TierId::T2, &inner.t2), (TierId::T3, &inner.t3)];

        for (id, tier) in candidates.iter() {
            if tier.estimated_points(window_ns) <= point_budget {
                return Series { tier: *id, buckets: tier.buckets_in_window(from_ns, to_ns) };
            }
        }
        let (id, tier) = candidates[3];
        Series { tier: id, buckets: tier.buckets_in_window(from_ns, to_ns) }
    }
}
