//! Gossip-fed directory: matches, presence, per-match mode and the
//! slot -> identity map learned from `hello`/`mhello`.
//!
//! Records are refreshed by gossip and evicted by the periodic sweep once
//! their TTL lapses. Mode records live as long as a match record would. The
//! slot map is capped at `MAX_SLOT_OWNERS`, evicting the least recently
//! refreshed slot. Nothing here is authoritative; the ledger is.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use doommesh_core::identity::Address;
use doommesh_core::protocol::control::{
    Gossip, MatchInfo, MatchStatus, ModeInfo, PresenceInfo,
};

/// Upper bound on remembered slot owners.
pub const MAX_SLOT_OWNERS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotOwner {
    pub address: Address,
    pub nick: Option<String>,
}

#[derive(Debug, Default)]
pub struct Directory {
    matches: BTreeMap<String, (MatchInfo, Instant)>,
    presence: HashMap<Address, (PresenceInfo, Instant)>,
    modes: BTreeMap<String, (ModeInfo, Instant)>,
    slots: BTreeMap<u32, (SlotOwner, Instant)>,
}

impl Directory {
    /// Insert or overlay a match record; refreshes its last-seen time.
    pub fn upsert_match(&mut self, info: &MatchInfo, now: Instant) -> &MatchInfo {
        let entry = self
            .matches
            .entry(info.match_id.clone())
            .and_modify(|(m, _)| m.merge_from(info))
            .or_insert_with(|| (info.clone(), now));
        entry.1 = now;
        &entry.0
    }

    pub fn remove_match(&mut self, match_id: &str) -> Option<MatchInfo> {
        self.matches.remove(match_id).map(|(m, _)| m)
    }

    pub fn get_match(&self, match_id: &str) -> Option<&MatchInfo> {
        self.matches.get(match_id).map(|(m, _)| m)
    }

    pub fn get_match_mut(&mut self, match_id: &str) -> Option<&mut MatchInfo> {
        self.matches.get_mut(match_id).map(|(m, _)| m)
    }

    pub fn match_count(&self) -> usize {
        self.matches.len()
    }

    pub fn match_ids(&self) -> Vec<String> {
        self.matches.keys().cloned().collect()
    }

    pub fn upsert_presence(&mut self, info: PresenceInfo, now: Instant) {
        self.presence.insert(info.address.clone(), (info, now));
    }

    pub fn presence_len(&self) -> usize {
        self.presence.len()
    }

    pub fn set_mode(&mut self, info: ModeInfo, now: Instant) {
        self.modes.insert(info.match_id.clone(), (info, now));
    }

    pub fn mode(&self, match_id: &str) -> Option<&ModeInfo> {
        self.modes.get(match_id).map(|(m, _)| m)
    }

    pub fn map_slot(&mut self, slot: u32, address: Address, nick: Option<String>, now: Instant) {
        self.slots.insert(slot, (SlotOwner { address, nick }, now));
        while self.slots.len() > MAX_SLOT_OWNERS {
            let oldest = self
                .slots
                .iter()
                .filter(|(s, _)| **s != slot)
                .min_by_key(|(_, (_, at))| *at)
                .map(|(s, _)| *s);
            match oldest {
                Some(s) => self.slots.remove(&s),
                None => break,
            };
        }
    }

    pub fn slot(&self, slot: u32) -> Option<&SlotOwner> {
        self.slots.get(&slot).map(|(o, _)| o)
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Evict presence and matches not refreshed within their TTL.
    /// Returns `(presence_evicted, matches_evicted)`.
    pub fn prune(&mut self, now: Instant, presence_ttl: Duration, match_ttl: Duration) -> (usize, usize) {
        let p0 = self.presence.len();
        self.presence
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) <= presence_ttl);
        let m0 = self.matches.len();
        self.matches
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) <= match_ttl);
        let matches = &self.matches;
        self.modes.retain(|id, (_, seen)| {
            matches.contains_key(id) || now.saturating_duration_since(*seen) <= match_ttl
        });
        (p0 - self.presence.len(), m0 - self.matches.len())
    }

    /// Current view as gossip: modes, live matches (as announces), presence.
    pub fn snapshot(&self) -> Vec<Gossip> {
        let mut out = Vec::with_capacity(self.modes.len() + self.matches.len() + self.presence.len());
        out.extend(self.modes.values().map(|(m, _)| Gossip::Mode(m.clone())));
        out.extend(
            self.matches
                .values()
                .filter(|(m, _)| m.status != Some(MatchStatus::Ended))
                .map(|(m, _)| Gossip::MatchAnnounce(m.clone())),
        );
        out.extend(self.presence.values().map(|(p, _)| Gossip::Presence(p.clone())));
        out
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use doommesh_core::protocol::control::PresenceStatus;

    fn presence(addr: &str) -> PresenceInfo {
        PresenceInfo {
            address: Address::new(addr),
            nick: None,
            status: PresenceStatus::Idle,
            match_id: None,
            client_id: None,
        }
    }

    #[test]
    fn update_merges_into_announced_match() {
        let mut d = Directory::default();
        let now = Instant::now();
        let mut a = MatchInfo::new("g");
        a.host = Some(Address::new("aa"));
        a.max_players = Some(4);
        d.upsert_match(&a, now);
        let mut u = MatchInfo::new("g");
        u.status = Some(MatchStatus::Full);
        let merged = d.upsert_match(&u, now);
        assert_eq!(merged.max_players, Some(4));
        assert_eq!(merged.status, Some(MatchStatus::Full));
    }

    #[test]
    fn prune_evicts_by_ttl() {
        let mut d = Directory::default();
        let t0 = Instant::now();
        d.upsert_presence(presence("aa"), t0);
        d.upsert_match(&MatchInfo::new("g"), t0);
        let later = t0 + Duration::from_secs(13);
        d.upsert_presence(presence("bb"), later);
        let (p, m) = d.prune(later, Duration::from_secs(12), Duration::from_secs(120));
        assert_eq!((p, m), (1, 0));
        assert_eq!(d.presence_len(), 1);
        let (_, m) = d.prune(t0 + Duration::from_secs(121), Duration::from_secs(12), Duration::from_secs(120));
        assert_eq!(m, 1);
    }

    fn mode(id: &str) -> ModeInfo {
        ModeInfo {
            match_id: id.into(),
            mode: Default::default(),
            no_monsters: false,
        }
    }

    #[test]
    fn modes_outlive_ttl_only_with_their_match() {
        let mut d = Directory::default();
        let t0 = Instant::now();
        d.set_mode(mode("orphan"), t0);
        d.set_mode(mode("g"), t0);
        let later = t0 + Duration::from_secs(100);
        d.upsert_match(&MatchInfo::new("g"), later);
        d.prune(t0 + Duration::from_secs(121), Duration::from_secs(12), Duration::from_secs(120));
        assert!(d.mode("orphan").is_none());
        assert!(d.mode("g").is_some());
    }

    #[test]
    fn slot_map_is_capped_and_keeps_fresh_owners() {
        let mut d = Directory::default();
        let t0 = Instant::now();
        d.map_slot(1, Address::new("host"), None, t0 + Duration::from_secs(1));
        for slot in 1000..1000 + MAX_SLOT_OWNERS as u32 * 2 {
            d.map_slot(slot, Address::new("aa"), None, t0);
        }
        assert_eq!(d.slot_count(), MAX_SLOT_OWNERS);
        assert_eq!(d.slot(1).map(|o| o.address.as_str()), Some("host"));
        let last = 1000 + MAX_SLOT_OWNERS as u32 * 2 - 1;
        assert!(d.slot(last).is_some());
    }

    #[test]
    fn snapshot_skips_ended_matches() {
        let mut d = Directory::default();
        let now = Instant::now();
        d.upsert_match(&MatchInfo::new("live"), now);
        let mut ended = MatchInfo::new("old");
        ended.status = Some(MatchStatus::Ended);
        d.upsert_match(&ended, now);
        d.upsert_presence(presence("aa"), now);
        let snap = d.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap
            .iter()
            .any(|g| matches!(g, Gossip::MatchAnnounce(m) if m.match_id == "live")));
    }
}
