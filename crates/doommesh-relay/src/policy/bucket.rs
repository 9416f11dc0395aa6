use std::collections::HashMap;
use std::time::Instant;

/// Token bucket with fractional refill.
///
/// Starts full. Refills `rate` tokens per second proportionally to elapsed
/// time, capped at `burst`. A request with less than one token is refused.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    pub fn full(burst: u32, now: Instant) -> Self {
        Self {
            tokens: burst.max(1) as f64,
            last: now,
        }
    }

    pub fn allow_at(&mut self, rate: u32, burst: u32, now: Instant) -> bool {
        let cap = burst.max(1) as f64;
        let elapsed = now.saturating_duration_since(self.last);
        if !elapsed.is_zero() {
            let refill = elapsed.as_nanos() as f64 * rate.max(1) as f64 / 1e9;
            self.tokens = (self.tokens + refill).min(cap);
            self.last = now;
        }
        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// True once the bucket would have refilled to `burst` by `now`, at which
    /// point it is indistinguishable from a fresh one.
    pub fn is_idle(&self, rate: u32, burst: u32, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last);
        let refill = elapsed.as_nanos() as f64 * rate.max(1) as f64 / 1e9;
        self.tokens + refill >= burst.max(1) as f64
    }
}

/// Per-slot buckets. Keyed by slot id alone: a slot is one sender.
#[derive(Debug)]
pub struct RateTable {
    rate: u32,
    burst: u32,
    buckets: HashMap<u32, TokenBucket>,
}

impl RateTable {
    pub fn new(rate: u32, burst: u32) -> Self {
        Self {
            rate,
            burst,
            buckets: HashMap::new(),
        }
    }

    pub fn allow(&mut self, slot: u32, now: Instant) -> bool {
        let (rate, burst) = (self.rate, self.burst);
        self.buckets
            .entry(slot)
            .or_insert_with(|| TokenBucket::full(burst, now))
            .allow_at(rate, burst, now)
    }

    /// Drop buckets that have refilled completely. Returns how many went.
    pub fn prune(&mut self, now: Instant) -> usize {
        let (rate, burst) = (self.rate, self.burst);
        let before = self.buckets.len();
        self.buckets.retain(|_, b| !b.is_idle(rate, burst, now));
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}
