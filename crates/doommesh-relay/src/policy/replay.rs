use std::collections::HashMap;

/// `(matchId, slotId)`: the unit sequences and rosters are tracked by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub match_id: String,
    pub slot: u32,
}

impl SlotKey {
    pub fn new(match_id: impl Into<String>, slot: u32) -> Self {
        Self {
            match_id: match_id.into(),
            slot,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.match_id, self.slot)
    }
}

/// Last accepted (inbound) or last issued (outbound) sequence per slot.
/// Missing entries read as 0, so the first valid sequence is 1.
#[derive(Debug, Default)]
pub struct SeqTable {
    last: HashMap<SlotKey, u32>,
}

impl SeqTable {
    pub fn last(&self, key: &SlotKey) -> u32 {
        self.last.get(key).copied().unwrap_or(0)
    }

    pub fn is_replay(&self, key: &SlotKey, seq: u32) -> bool {
        seq <= self.last(key)
    }

    /// Never moves backwards.
    pub fn advance(&mut self, key: &SlotKey, seq: u32) {
        let e = self.last.entry(key.clone()).or_insert(0);
        if seq > *e {
            *e = seq;
        }
    }

    /// Issue the next outbound sequence.
    pub fn next(&mut self, key: &SlotKey) -> u32 {
        let e = self.last.entry(key.clone()).or_insert(0);
        *e = e.wrapping_add(1);
        *e
    }

    pub fn clear(&mut self) {
        self.last.clear();
    }
}
