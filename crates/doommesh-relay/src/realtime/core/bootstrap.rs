//! Outbound frames held until the first match link appears.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Queued {
    pub match_id: String,
    /// Encoded, signed envelope.
    pub envelope: Bytes,
    pub to: u32,
    pub from: u32,
    at: Instant,
}

/// FIFO bounded by age and count. Oldest entries go first on overflow.
#[derive(Debug)]
pub struct BootstrapQueue {
    max_age: Duration,
    max_items: usize,
    items: VecDeque<Queued>,
}

impl BootstrapQueue {
    pub fn new(max_age: Duration, max_items: usize) -> Self {
        Self {
            max_age,
            max_items: max_items.max(1),
            items: VecDeque::new(),
        }
    }

    fn expired(&self, q: &Queued, now: Instant) -> bool {
        now.saturating_duration_since(q.at) > self.max_age
    }

    /// Drop entries past their max age. Returns how many were dropped.
    pub fn prune(&mut self, now: Instant) -> usize {
        let mut n = 0;
        while self.items.front().is_some_and(|q| self.expired(q, now)) {
            self.items.pop_front();
            n += 1;
        }
        n
    }

    /// Queue a frame; returns how many older frames were evicted for it.
    pub fn push(&mut self, match_id: &str, envelope: Bytes, to: u32, from: u32, now: Instant) -> usize {
        let mut evicted = self.prune(now);
        while self.items.len() >= self.max_items {
            self.items.pop_front();
            evicted += 1;
        }
        self.items.push_back(Queued {
            match_id: match_id.to_string(),
            envelope,
            to,
            from,
            at: now,
        });
        evicted
    }

    /// Take every unexpired frame in arrival order and empty the queue.
    pub fn drain(&mut self, now: Instant) -> Vec<Queued> {
        let items = std::mem::take(&mut self.items);
        items.into_iter().filter(|q| !self.expired(q, now)).collect()
    }

    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(n: u8) -> Bytes {
        Bytes::from(vec![n])
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut q = BootstrapQueue::new(Duration::from_secs(10), 2);
        let now = Instant::now();
        assert_eq!(q.push("g", env(1), 0, 2, now), 0);
        assert_eq!(q.push("g", env(2), 0, 2, now), 0);
        assert_eq!(q.push("g", env(3), 0, 2, now), 1);
        let out: Vec<u8> = q.drain(now).iter().map(|e| e.envelope[0]).collect();
        assert_eq!(out, vec![2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn drain_skips_expired_frames() {
        let mut q = BootstrapQueue::new(Duration::from_millis(100), 8);
        let t0 = Instant::now();
        q.push("g", env(1), 0, 2, t0);
        q.push("g", env(2), 0, 2, t0 + Duration::from_millis(80));
        let out = q.drain(t0 + Duration::from_millis(150));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].envelope[0], 2);
    }

    #[test]
    fn prune_drops_from_front() {
        let mut q = BootstrapQueue::new(Duration::from_millis(100), 8);
        let t0 = Instant::now();
        q.push("g", env(1), 0, 2, t0);
        q.push("g", env(2), 0, 2, t0 + Duration::from_millis(90));
        assert_eq!(q.prune(t0 + Duration::from_millis(120)), 1);
        assert_eq!(q.len(), 1);
    }
}
