//! Admission policy for peer envelopes.
//!
//! Rate buckets, per-slot replay tracking, and the time-bounded duplicate
//! filters used for flood suppression. Everything here is plain owned state:
//! the relay actor is the only caller, so nothing is locked.

pub mod bucket;
pub mod dedup;
pub mod guard;
pub mod replay;

pub use bucket::{RateTable, TokenBucket};
pub use dedup::{fnv1a32, SeenSet};
pub use guard::{Decision, ReplayGuard, RosterView};
pub use replay::{SeqTable, SlotKey};
