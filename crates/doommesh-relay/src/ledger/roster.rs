//! Roster cache: `(matchId, slotId) -> address` with a short TTL.
//!
//! The cache itself is synchronous and owned by the relay actor. Ledger reads
//! happen in spawned tasks (`fetch_roster`, `fetch_hosting`) whose results are
//! stored back through `store` / `store_hosting`. Entries are only ever
//! invalidated by expiry or by an explicit `hello` for the slot; expired
//! entries are dropped by the relay sweep.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use doommesh_core::error::Result;
use doommesh_core::identity::Address;

use super::{is_truthy, keys, value_string, Ledger};
use crate::policy::{RosterView, SlotKey};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub address: Option<Address>,
    /// Address set, slot active (or flag absent), match active (or flag absent).
    pub ok: bool,
}

impl RosterEntry {
    pub fn unknown() -> Self {
        Self {
            address: None,
            ok: false,
        }
    }

    pub fn view(&self) -> RosterView<'_> {
        match (&self.address, self.ok) {
            (Some(a), true) => RosterView::Known(a),
            (Some(_), false) => RosterView::Denied,
            (None, _) => RosterView::Unknown,
        }
    }
}

#[derive(Debug)]
pub struct RosterCache {
    ttl: Duration,
    host_ttl: Duration,
    entries: HashMap<SlotKey, (RosterEntry, Instant)>,
    inflight: HashSet<SlotKey>,
    hosting: HashMap<String, (bool, Instant)>,
}

impl RosterCache {
    pub fn new(ttl: Duration, host_ttl: Duration) -> Self {
        Self {
            ttl,
            host_ttl,
            entries: HashMap::new(),
            inflight: HashSet::new(),
            hosting: HashMap::new(),
        }
    }

    /// Fresh cached entry, or `None` when the caller should fetch.
    pub fn resolve(&self, key: &SlotKey, now: Instant) -> Option<&RosterEntry> {
        let (entry, at) = self.entries.get(key)?;
        (now.saturating_duration_since(*at) < self.ttl).then_some(entry)
    }

    /// Mark a fetch in flight; `false` if one already is.
    pub fn begin_fetch(&mut self, key: &SlotKey) -> bool {
        self.inflight.insert(key.clone())
    }

    pub fn store(&mut self, key: SlotKey, entry: RosterEntry, now: Instant) {
        self.inflight.remove(&key);
        self.entries.insert(key, (entry, now));
    }

    pub fn invalidate(&mut self, match_id: &str, slot: u32) {
        self.entries.remove(&SlotKey::new(match_id, slot));
    }

    pub fn hosting(&self, match_id: &str, now: Instant) -> Option<bool> {
        let (ok, at) = self.hosting.get(match_id)?;
        (now.saturating_duration_since(*at) < self.host_ttl).then_some(*ok)
    }

    pub fn store_hosting(&mut self, match_id: &str, ok: bool, now: Instant) {
        self.hosting.insert(match_id.to_string(), (ok, now));
    }

    /// Forget entries past their TTL. Returns how many roster entries went.
    pub fn prune(&mut self, now: Instant) -> usize {
        let (ttl, host_ttl) = (self.ttl, self.host_ttl);
        let before = self.entries.len();
        self.entries
            .retain(|_, (_, at)| now.saturating_duration_since(*at) < ttl);
        self.hosting
            .retain(|_, (_, at)| now.saturating_duration_since(*at) < host_ttl);
        before - self.entries.len()
    }

    /// Drop roster entries (match swarm teardown). Host checks survive: they
    /// are keyed by match and expire on their own.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.inflight.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn permissive(v: Option<serde_json::Value>) -> bool {
    v.map_or(true, |v| v.is_null() || is_truthy(&v))
}

/// Read the roster facts for one slot.
pub async fn fetch_roster(ledger: &dyn Ledger, key: &SlotKey) -> Result<RosterEntry> {
    let address = ledger
        .get(&keys::roster(&key.match_id, key.slot))
        .await?
        .as_ref()
        .and_then(value_string)
        .map(Address::new);
    let slot_active = ledger
        .get(&keys::roster_active(&key.match_id, key.slot))
        .await?;
    let match_active = ledger.get(&keys::active(&key.match_id)).await?;

    let ok = address.is_some() && permissive(slot_active) && permissive(match_active);
    Ok(RosterEntry { address, ok })
}

/// `isHostingMatchActive`: the ledger binds `me` as the match server and the
/// match is explicitly active.
pub async fn fetch_hosting(ledger: &dyn Ledger, match_id: &str, me: &Address) -> Result<bool> {
    let server = ledger
        .get(&keys::server(match_id))
        .await?
        .as_ref()
        .and_then(value_string)
        .map(Address::new);
    if server.as_ref() != Some(me) {
        return Ok(false);
    }
    let active = ledger.get(&keys::active(match_id)).await?;
    Ok(active.as_ref().is_some_and(is_truthy))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::ledger::MemoryLedger;
    use serde_json::json;

    #[test]
    fn entries_expire_after_ttl() {
        let t0 = Instant::now();
        let key = SlotKey::new("m", 2);
        let mut c = RosterCache::new(Duration::from_millis(2000), Duration::from_millis(1000));
        assert!(c.resolve(&key, t0).is_none());
        assert!(c.begin_fetch(&key));
        assert!(!c.begin_fetch(&key));
        c.store(key.clone(), RosterEntry::unknown(), t0);
        assert!(c.resolve(&key, t0 + Duration::from_millis(1999)).is_some());
        assert!(c.resolve(&key, t0 + Duration::from_millis(2000)).is_none());
        assert!(c.begin_fetch(&key));
    }

    #[test]
    fn prune_forgets_expired_entries_and_host_checks() {
        let t0 = Instant::now();
        let mut c = RosterCache::new(Duration::from_millis(2000), Duration::from_millis(1000));
        for slot in 1..=50 {
            c.store(SlotKey::new(format!("junk-{slot}"), slot), RosterEntry::unknown(), t0);
        }
        c.store_hosting("g", true, t0);
        let later = t0 + Duration::from_millis(1500);
        c.store(SlotKey::new("g", 2), RosterEntry::unknown(), later);

        assert_eq!(c.prune(later), 0);
        assert!(c.hosting("g", later).is_none());
        assert_eq!(c.len(), 51);

        assert_eq!(c.prune(t0 + Duration::from_millis(2000)), 50);
        assert_eq!(c.len(), 1);
        assert!(c.resolve(&SlotKey::new("g", 2), t0 + Duration::from_millis(2000)).is_some());
    }

    #[test]
    fn view_distinguishes_unknown_denied_known() {
        let a = Address::new("aa");
        assert!(matches!(RosterEntry::unknown().view(), RosterView::Unknown));
        let denied = RosterEntry { address: Some(a.clone()), ok: false };
        assert!(matches!(denied.view(), RosterView::Denied));
        let known = RosterEntry { address: Some(a), ok: true };
        assert!(matches!(known.view(), RosterView::Known(_)));
    }

    #[tokio::test]
    async fn absent_flags_are_permissive() {
        let ledger = MemoryLedger::new(Address::new("host"));
        ledger.put(&keys::roster("g", 2), json!("ab12"));
        let e = fetch_roster(&ledger, &SlotKey::new("g", 2)).await.unwrap();
        assert!(e.ok);
        assert_eq!(e.address, Some(Address::new("AB12")));

        ledger.put(&keys::roster_active("g", 2), json!(0));
        let e = fetch_roster(&ledger, &SlotKey::new("g", 2)).await.unwrap();
        assert!(!e.ok);

        let e = fetch_roster(&ledger, &SlotKey::new("g", 3)).await.unwrap();
        assert_eq!(e, RosterEntry::unknown());
    }

    #[tokio::test]
    async fn hosting_requires_server_and_active_flag() {
        let me = Address::new("host");
        let ledger = MemoryLedger::new(me.clone());
        assert!(!fetch_hosting(&ledger, "g", &me).await.unwrap());
        ledger.put(&keys::server("g"), json!("host"));
        assert!(!fetch_hosting(&ledger, "g", &me).await.unwrap());
        ledger.put(&keys::active("g"), json!("1"));
        assert!(fetch_hosting(&ledger, "g", &me).await.unwrap());
        assert!(!fetch_hosting(&ledger, "g", &Address::new("other")).await.unwrap());
    }
}
