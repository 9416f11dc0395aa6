//! In-process ledger for development and tests.
//!
//! All `MemoryLedger` handles created with `as_node` share one key-value
//! store, the way every relay in a deployment reads the same replicated
//! state. Each handle submits transactions as its own caller address, and the
//! transaction rules mirror the game contract: server authority, roster
//! capacity, and strictly consecutive kill sequence numbers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use doommesh_core::error::{RelayError, Result};
use doommesh_core::identity::Address;
use doommesh_core::protocol::control::GameMode;

use super::{is_truthy, keys, value_string, Ledger};

const MAX_PLAYERS: u64 = 4;

type Store = HashMap<String, Value>;

#[derive(Clone)]
pub struct MemoryLedger {
    store: Arc<Mutex<Store>>,
    caller: Address,
}

fn rejected(op: &str, why: &str) -> RelayError {
    RelayError::BadRequest(format!("{op} rejected: {why}"))
}

fn get_u64(store: &Store, key: &str) -> u64 {
    store
        .get(key)
        .and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(0)
}

fn get_str(store: &Store, key: &str) -> Option<String> {
    store.get(key).and_then(value_string)
}

impl MemoryLedger {
    pub fn new(caller: Address) -> Self {
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            caller,
        }
    }

    /// Another participant's view of the same store.
    pub fn as_node(&self, caller: Address) -> Self {
        Self {
            store: Arc::clone(&self.store),
            caller,
        }
    }

    pub fn caller(&self) -> &Address {
        &self.caller
    }

    /// Write a raw key (seeding and tests).
    pub fn put(&self, key: &str, value: Value) {
        if let Ok(mut s) = self.store.lock() {
            s.insert(key.to_string(), value);
        }
    }

    /// Synchronous read (tests).
    pub fn peek(&self, key: &str) -> Option<Value> {
        self.store.lock().ok().and_then(|s| s.get(key).cloned())
    }

    fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> Result<R> {
        // Poisoned mutex means a panicked writer; report as unavailable.
        let mut g = self
            .store
            .lock()
            .map_err(|_| RelayError::LedgerUnavailable("store lock poisoned".into()))?;
        Ok(f(&mut g))
    }

    fn is_active(store: &Store, match_id: &str) -> bool {
        store.get(&keys::active(match_id)).is_some_and(is_truthy)
    }

    fn is_server(&self, store: &Store, match_id: &str) -> bool {
        get_str(store, &keys::server(match_id)).map(Address::new).as_ref() == Some(&self.caller)
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.with_store(|s| s.get(key).cloned())
    }

    async fn start_game(
        &self,
        match_id: &str,
        mode: GameMode,
        max_players: Option<u32>,
    ) -> Result<()> {
        let server = self.caller.to_string();
        self.with_store(|s| {
            if s.contains_key(&keys::server(match_id)) {
                return Err(rejected("startGame", "match already exists"));
            }
            let lock = format!("server_active/{server}");
            if let Some(prev) = get_str(s, &lock) {
                if prev != match_id {
                    s.insert(keys::active(&prev), json!(0));
                }
            }
            s.insert(keys::server(match_id), json!(server));
            s.insert(keys::active(match_id), json!(1));
            s.insert(format!("game/{match_id}/seq"), json!(0));
            s.insert(format!("game/{match_id}/mode"), json!(mode.as_str()));
            if let Some(n) = max_players.filter(|n| *n > 0) {
                s.insert(
                    format!("game/{match_id}/maxPlayers"),
                    json!((n as u64).clamp(1, MAX_PLAYERS)),
                );
            }
            s.insert(lock, json!(match_id));
            Ok(())
        })?
    }

    async fn end_game(&self, match_id: &str) -> Result<()> {
        self.with_store(|s| {
            if !self.is_server(s, match_id) {
                return Err(rejected("endGame", "caller is not the match server"));
            }
            s.insert(keys::active(match_id), json!(0));
            let lock = format!("server_active/{}", self.caller);
            if get_str(s, &lock).as_deref() == Some(match_id) {
                s.insert(lock, json!(""));
            }
            Ok(())
        })?
    }

    async fn join_game(&self, match_id: &str, slot: u32) -> Result<()> {
        let addr = self.caller.to_string();
        self.with_store(|s| {
            if slot == 0 {
                return Err(rejected("joinGame", "slot must be positive"));
            }
            if !s.contains_key(&keys::server(match_id)) {
                return Err(rejected("joinGame", "unknown match"));
            }
            if !Self::is_active(s, match_id) {
                return Err(rejected("joinGame", "match inactive"));
            }
            let roster_key = keys::roster(match_id, slot);
            let existing = get_str(s, &roster_key);
            if existing.as_deref().is_some_and(|e| e != addr) {
                return Err(rejected("joinGame", "slot taken"));
            }

            let max = get_u64(s, &format!("game/{match_id}/maxPlayers"));
            let addr_key = format!("game/{match_id}/roster_addr/{addr}");
            let prev_slot = get_str(s, &addr_key);
            let len_key = format!("game/{match_id}/roster_len");
            if max > 0 && prev_slot.is_none() && get_u64(s, &len_key) >= max {
                return Err(rejected("joinGame", "roster full"));
            }

            if let Some(prev) = prev_slot.as_deref() {
                if prev != slot.to_string() {
                    s.insert(format!("game/{match_id}/roster_active/{prev}"), json!(0));
                }
            }
            if existing.is_none() {
                s.insert(roster_key, json!(addr));
            }
            s.insert(keys::roster_active(match_id, slot), json!(1));
            if prev_slot.is_none() {
                let len = get_u64(s, &len_key);
                s.insert(len_key, json!(len + 1));
            }
            s.insert(addr_key, json!(slot));
            Ok(())
        })?
    }

    async fn record_kill(
        &self,
        match_id: &str,
        seq: u32,
        killer: &Address,
        victim: &Address,
    ) -> Result<()> {
        self.with_store(|s| {
            if !self.is_server(s, match_id) {
                return Err(rejected("recordKill", "caller is not the match server"));
            }
            if !Self::is_active(s, match_id) {
                return Err(rejected("recordKill", "match inactive"));
            }
            let seq_key = format!("game/{match_id}/seq");
            let last = get_u64(s, &seq_key);
            if seq as u64 != last + 1 {
                return Err(rejected("recordKill", "kill sequence out of order"));
            }
            s.insert(seq_key, json!(seq));
            if get_str(s, &format!("game/{match_id}/mode")).as_deref() == Some("coop") {
                return Ok(());
            }
            let n = get_u64(s, "klogl");
            s.insert(
                format!("klog/{n}"),
                json!({
                    "gid": match_id,
                    "seq": seq,
                    "killer": killer.as_str(),
                    "victim": victim.as_str(),
                }),
            );
            s.insert("klogl".to_string(), json!(n + 1));
            Ok(())
        })?
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn host() -> MemoryLedger {
        MemoryLedger::new(Address::new("host"))
    }

    #[tokio::test]
    async fn start_binds_server_and_is_not_repeatable() {
        let l = host();
        l.start_game("g", GameMode::Altdeath, Some(9)).await.unwrap();
        assert_eq!(l.peek("game/g/server"), Some(json!("host")));
        assert_eq!(l.peek("game/g/active"), Some(json!(1)));
        assert_eq!(l.peek("game/g/maxPlayers"), Some(json!(4)));
        assert!(l.start_game("g", GameMode::Coop, None).await.is_err());
    }

    #[tokio::test]
    async fn new_game_deactivates_previous_one_of_same_server() {
        let l = host();
        l.start_game("g1", GameMode::Deathmatch, None).await.unwrap();
        l.start_game("g2", GameMode::Deathmatch, None).await.unwrap();
        assert_eq!(l.peek("game/g1/active"), Some(json!(0)));
        assert_eq!(l.peek("game/g2/active"), Some(json!(1)));
    }

    #[tokio::test]
    async fn join_respects_capacity_and_ownership() {
        let h = host();
        h.start_game("g", GameMode::Deathmatch, Some(2)).await.unwrap();
        let a = h.as_node(Address::new("a"));
        let b = h.as_node(Address::new("b"));
        let c = h.as_node(Address::new("c"));
        a.join_game("g", 2).await.unwrap();
        assert!(b.join_game("g", 2).await.is_err(), "slot owned by a");
        b.join_game("g", 3).await.unwrap();
        assert!(c.join_game("g", 4).await.is_err(), "roster full");
        // Rejoining under a new slot retires the old one without growing the roster.
        a.join_game("g", 5).await.unwrap();
        assert_eq!(h.peek("game/g/roster_active/2"), Some(json!(0)));
        assert_eq!(h.peek("game/g/roster_len"), Some(json!(2)));
    }

    #[tokio::test]
    async fn kills_need_consecutive_seq_from_server() {
        let h = host();
        h.start_game("g", GameMode::Deathmatch, None).await.unwrap();
        let (k, v) = (Address::new("k"), Address::new("v"));
        assert!(h.as_node(k.clone()).record_kill("g", 1, &k, &v).await.is_err());
        h.record_kill("g", 1, &k, &v).await.unwrap();
        assert!(h.record_kill("g", 3, &k, &v).await.is_err());
        h.record_kill("g", 2, &k, &v).await.unwrap();
        assert_eq!(h.peek("klogl"), Some(json!(2)));
    }

    #[tokio::test]
    async fn end_requires_server() {
        let h = host();
        h.start_game("g", GameMode::Deathmatch, None).await.unwrap();
        assert!(h.as_node(Address::new("x")).end_game("g").await.is_err());
        h.end_game("g").await.unwrap();
        assert_eq!(h.peek("game/g/active"), Some(json!(0)));
        assert_eq!(h.peek("server_active/host"), Some(json!("")));
    }
}
