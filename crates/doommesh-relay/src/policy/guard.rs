//! Replay/rate guard: the admission decision for one peer envelope.
//!
//! Order of checks: rate, roster, replay, signature. On `Accept` the slot's
//! last accepted sequence advances to the envelope's `seq`.

use std::time::Instant;

use doommesh_core::error::DropCode;
use doommesh_core::identity::Address;

use super::bucket::RateTable;
use super::replay::{SeqTable, SlotKey};

/// What the roster cache currently knows about the sender's slot.
#[derive(Debug, Clone, Copy)]
pub enum RosterView<'a> {
    /// No answer yet (cache miss, ledger slow or failing, slot not joined).
    Unknown,
    /// The ledger knows the slot but the slot or the match is inactive.
    Denied,
    Known(&'a Address),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    DropReplay,
    DropRate,
    /// `pending` means the caller should hold the envelope for later.
    DropUnauthorized { pending: bool },
    DropForged,
}

impl Decision {
    pub fn drop_code(self) -> Option<DropCode> {
        match self {
            Decision::Accept => None,
            Decision::DropReplay => Some(DropCode::Replay),
            Decision::DropRate => Some(DropCode::RateLimited),
            Decision::DropUnauthorized { .. } => Some(DropCode::Unauthorized),
            Decision::DropForged => Some(DropCode::Forged),
        }
    }
}

#[derive(Debug)]
pub struct ReplayGuard {
    rate: RateTable,
    seq_in: SeqTable,
}

impl ReplayGuard {
    pub fn new(rate_per_sec: u32, burst: u32) -> Self {
        Self {
            rate: RateTable::new(rate_per_sec, burst),
            seq_in: SeqTable::default(),
        }
    }

    pub fn admit<F>(
        &mut self,
        key: &SlotKey,
        seq: u32,
        roster: RosterView<'_>,
        verify: F,
        now: Instant,
    ) -> Decision
    where
        F: FnOnce(&Address) -> bool,
    {
        if !self.rate.allow(key.slot, now) {
            return Decision::DropRate;
        }
        match roster {
            RosterView::Unknown => Decision::DropUnauthorized { pending: true },
            RosterView::Denied => Decision::DropUnauthorized { pending: false },
            RosterView::Known(address) => self.check(key, seq, address, verify),
        }
    }

    /// Re-validate a held envelope once its roster entry resolved. The rate
    /// bucket was already charged when it first arrived.
    pub fn readmit<F>(&mut self, key: &SlotKey, seq: u32, address: &Address, verify: F) -> Decision
    where
        F: FnOnce(&Address) -> bool,
    {
        self.check(key, seq, address, verify)
    }

    fn check<F>(&mut self, key: &SlotKey, seq: u32, address: &Address, verify: F) -> Decision
    where
        F: FnOnce(&Address) -> bool,
    {
        if self.seq_in.is_replay(key, seq) {
            return Decision::DropReplay;
        }
        if !verify(address) {
            return Decision::DropForged;
        }
        self.seq_in.advance(key, seq);
        Decision::Accept
    }

    pub fn rate_buckets(&self) -> usize {
        self.rate.len()
    }

    pub fn last_seq(&self, key: &SlotKey) -> u32 {
        self.seq_in.last(key)
    }

    /// Drop rate buckets that have fully refilled. Sequence state is kept: it
    /// only grows for envelopes that passed the signature check.
    pub fn prune(&mut self, now: Instant) -> usize {
        self.rate.prune(now)
    }

    /// Forget all rate and sequence state (match swarm teardown).
    pub fn clear(&mut self) {
        self.rate.clear();
        self.seq_in.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::new("aa")
    }

    #[test]
    fn lower_or_equal_seq_is_replay() {
        let now = Instant::now();
        let key = SlotKey::new("doom-abc-1", 2);
        let a = addr();
        let mut g = ReplayGuard::new(200, 200);
        assert_eq!(g.admit(&key, 7, RosterView::Known(&a), |_| true, now), Decision::Accept);
        assert_eq!(g.admit(&key, 7, RosterView::Known(&a), |_| true, now), Decision::DropReplay);
        assert_eq!(g.admit(&key, 3, RosterView::Known(&a), |_| true, now), Decision::DropReplay);
        assert_eq!(g.admit(&key, 8, RosterView::Known(&a), |_| true, now), Decision::Accept);
        assert_eq!(g.last_seq(&key), 8);
    }

    #[test]
    fn bad_signature_is_forged_and_does_not_advance() {
        let now = Instant::now();
        let key = SlotKey::new("m", 2);
        let a = addr();
        let mut g = ReplayGuard::new(200, 200);
        assert_eq!(g.admit(&key, 5, RosterView::Known(&a), |_| false, now), Decision::DropForged);
        assert_eq!(g.last_seq(&key), 0);
        assert_eq!(g.admit(&key, 5, RosterView::Known(&a), |_| true, now), Decision::Accept);
    }

    #[test]
    fn unknown_roster_pends_and_denied_drops() {
        let now = Instant::now();
        let key = SlotKey::new("m", 2);
        let mut g = ReplayGuard::new(200, 200);
        assert_eq!(
            g.admit(&key, 1, RosterView::Unknown, |_| true, now),
            Decision::DropUnauthorized { pending: true }
        );
        assert_eq!(
            g.admit(&key, 1, RosterView::Denied, |_| true, now),
            Decision::DropUnauthorized { pending: false }
        );
        let a = addr();
        assert_eq!(g.readmit(&key, 1, &a, |_| true), Decision::Accept);
        assert_eq!(g.readmit(&key, 1, &a, |_| true), Decision::DropReplay);
    }

    #[test]
    fn rate_is_checked_before_roster() {
        let now = Instant::now();
        let key = SlotKey::new("m", 4);
        let mut g = ReplayGuard::new(1, 1);
        assert_eq!(
            g.admit(&key, 1, RosterView::Unknown, |_| true, now),
            Decision::DropUnauthorized { pending: true }
        );
        assert_eq!(g.admit(&key, 2, RosterView::Unknown, |_| true, now), Decision::DropRate);
        assert_eq!(Decision::DropRate.drop_code(), Some(DropCode::RateLimited));
    }
}
