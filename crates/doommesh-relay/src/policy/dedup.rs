use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

/// 32-bit FNV-1a. Cheap content fingerprint for gameplay frames.
pub fn fnv1a32(data: &[u8]) -> u32 {
    let mut h: u32 = 0x811c_9dc5;
    for b in data {
        h ^= *b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}

/// Time-bounded "seen" set.
///
/// An entry lives for `ttl` from first sight; it is not refreshed by later
/// sightings. When the set grows past `cap`, the `evict` oldest entries are
/// dropped at once.
#[derive(Debug)]
pub struct SeenSet<K> {
    ttl: Duration,
    cap: usize,
    evict: usize,
    first_seen: HashMap<K, Instant>,
    order: VecDeque<K>,
}

impl<K: Hash + Eq + Clone> SeenSet<K> {
    pub fn new(ttl: Duration, cap: usize, evict: usize) -> Self {
        Self {
            ttl,
            cap: cap.max(1),
            evict: evict.clamp(1, cap.max(1)),
            first_seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Record `key`; returns `true` if it was already seen within the TTL.
    pub fn seen_once(&mut self, key: K, now: Instant) -> bool {
        self.prune(now);
        if self.first_seen.contains_key(&key) {
            return true;
        }
        self.first_seen.insert(key.clone(), now);
        self.order.push_back(key);
        if self.first_seen.len() > self.cap {
            for _ in 0..self.evict {
                let Some(old) = self.order.pop_front() else { break };
                self.first_seen.remove(&old);
            }
        }
        false
    }

    pub fn contains(&self, key: &K) -> bool {
        self.first_seen.contains_key(key)
    }

    /// Drop entries older than the TTL.
    pub fn prune(&mut self, now: Instant) {
        while let Some(front) = self.order.front() {
            let expired = match self.first_seen.get(front) {
                Some(at) => now.saturating_duration_since(*at) > self.ttl,
                None => true,
            };
            if !expired {
                break;
            }
            if let Some(old) = self.order.pop_front() {
                self.first_seen.remove(&old);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.first_seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv_matches_reference_values() {
        assert_eq!(fnv1a32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn second_sighting_within_ttl_is_duplicate() {
        let t0 = Instant::now();
        let mut s = SeenSet::new(Duration::from_secs(1), 16, 4);
        assert!(!s.seen_once("x", t0));
        assert!(s.seen_once("x", t0 + Duration::from_millis(900)));
        assert!(!s.seen_once("x", t0 + Duration::from_millis(1100)));
    }

    #[test]
    fn overflow_evicts_oldest_batch() {
        let t0 = Instant::now();
        let mut s = SeenSet::new(Duration::from_secs(60), 4, 2);
        for i in 0..5u32 {
            assert!(!s.seen_once(i, t0));
        }
        assert_eq!(s.len(), 3);
        assert!(!s.contains(&0));
        assert!(!s.contains(&1));
        assert!(s.contains(&4));
    }
}
