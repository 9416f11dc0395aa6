//! Inbound envelopes held until their sender's roster entry resolves.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;

use doommesh_core::protocol::envelope::Envelope;

use super::router::Route;
use crate::policy::SlotKey;
use crate::swarm::LinkId;

#[derive(Debug, Clone)]
pub struct PendingEnvelope {
    pub envelope: Envelope,
    /// Bytes as received, forwarded unchanged once admitted.
    pub raw: Bytes,
    pub link: LinkId,
    pub route: Route,
    at: Instant,
}

/// Per-key FIFO bounded by count and age. A full key refuses new entries.
#[derive(Debug)]
pub struct PendingAdmission {
    ttl: Duration,
    max_per_key: usize,
    by_key: HashMap<SlotKey, VecDeque<PendingEnvelope>>,
}

impl PendingAdmission {
    pub fn new(ttl: Duration, max_per_key: usize) -> Self {
        Self {
            ttl,
            max_per_key,
            by_key: HashMap::new(),
        }
    }

    /// Hold an envelope; `false` when the key is already full.
    pub fn push(
        &mut self,
        key: SlotKey,
        envelope: Envelope,
        raw: Bytes,
        link: LinkId,
        route: Route,
        now: Instant,
    ) -> bool {
        let q = self.by_key.entry(key).or_default();
        if q.len() >= self.max_per_key {
            return false;
        }
        q.push_back(PendingEnvelope {
            envelope,
            raw,
            link,
            route,
            at: now,
        });
        true
    }

    /// Remove and return every unexpired entry for `key`, oldest first.
    pub fn take(&mut self, key: &SlotKey, now: Instant) -> Vec<PendingEnvelope> {
        let ttl = self.ttl;
        self.by_key
            .remove(key)
            .map(|q| {
                q.into_iter()
                    .filter(|p| now.saturating_duration_since(p.at) <= ttl)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop expired entries. Returns how many were dropped.
    pub fn prune(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let mut dropped = 0;
        self.by_key.retain(|_, q| {
            let before = q.len();
            q.retain(|p| now.saturating_duration_since(p.at) <= ttl);
            dropped += before - q.len();
            !q.is_empty()
        });
        dropped
    }

    pub fn keys(&self) -> Vec<SlotKey> {
        self.by_key.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_key.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use doommesh_core::protocol::frame::GameFrame;
    use doommesh_core::Identity;

    fn envelope(seq: u32) -> Envelope {
        let id = Identity::from_secret_bytes([5u8; 32]);
        let frame = GameFrame::new(1, 2, Bytes::from_static(b"t")).encode();
        Envelope::sign(&id, "g", 2, seq, frame).unwrap()
    }

    fn hold(p: &mut PendingAdmission, seq: u32, now: Instant) -> bool {
        let env = envelope(seq);
        let raw = env.encode().unwrap();
        p.push(SlotKey::new("g", 2), env, raw, LinkId(1), Route::Match, now)
    }

    #[test]
    fn take_returns_arrival_order() {
        let mut p = PendingAdmission::new(Duration::from_secs(5), 32);
        let now = Instant::now();
        for seq in [3, 1, 2] {
            assert!(hold(&mut p, seq, now));
        }
        let seqs: Vec<u32> = p
            .take(&SlotKey::new("g", 2), now)
            .iter()
            .map(|e| e.envelope.seq)
            .collect();
        assert_eq!(seqs, vec![3, 1, 2]);
        assert!(p.is_empty());
    }

    #[test]
    fn per_key_cap_refuses_new_entries() {
        let mut p = PendingAdmission::new(Duration::from_secs(5), 2);
        let now = Instant::now();
        assert!(hold(&mut p, 1, now));
        assert!(hold(&mut p, 2, now));
        assert!(!hold(&mut p, 3, now));
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn expired_entries_are_discarded() {
        let mut p = PendingAdmission::new(Duration::from_millis(100), 32);
        let t0 = Instant::now();
        hold(&mut p, 1, t0);
        hold(&mut p, 2, t0 + Duration::from_millis(80));
        assert_eq!(p.prune(t0 + Duration::from_millis(150)), 1);
        let left = p.take(&SlotKey::new("g", 2), t0 + Duration::from_millis(200));
        assert!(left.is_empty());
    }
}
