//! Ledger interface consumed by the relay.
//!
//! The ledger is an external, eventually consistent state machine. Reads are
//! point lookups of locally applied state; writes are submissions whose
//! effect only shows up in later reads. The relay never waits on a write.

pub mod memory;
pub mod roster;

use async_trait::async_trait;
use serde_json::Value;

use doommesh_core::error::Result;
use doommesh_core::identity::Address;
use doommesh_core::protocol::control::GameMode;

pub use memory::MemoryLedger;
pub use roster::{fetch_hosting, fetch_roster, RosterCache, RosterEntry};

/// Key layout shared with the ledger contract.
pub mod keys {
    pub fn server(match_id: &str) -> String {
        format!("game/{match_id}/server")
    }
    pub fn active(match_id: &str) -> String {
        format!("game/{match_id}/active")
    }
    pub fn roster(match_id: &str, slot: u32) -> String {
        format!("game/{match_id}/roster/{slot}")
    }
    pub fn roster_active(match_id: &str, slot: u32) -> String {
        format!("game/{match_id}/roster_active/{slot}")
    }
}

/// Ledger flags are stored as `1` or `"1"`.
pub fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Number(n) => n.as_u64() == Some(1) || n.as_f64() == Some(1.0),
        Value::String(s) => s == "1",
        Value::Bool(b) => *b,
        _ => false,
    }
}

/// Scalar ledger value as a string; `null` and containers yield `None`.
pub fn value_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
pub trait Ledger: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn start_game(&self, match_id: &str, mode: GameMode, max_players: Option<u32>)
        -> Result<()>;

    async fn end_game(&self, match_id: &str) -> Result<()>;

    async fn join_game(&self, match_id: &str, slot: u32) -> Result<()>;

    async fn record_kill(
        &self,
        match_id: &str,
        seq: u32,
        killer: &Address,
        victim: &Address,
    ) -> Result<()>;
}
