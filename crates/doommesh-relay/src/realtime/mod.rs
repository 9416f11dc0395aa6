//! Local-side runtime state owned by the relay actor.
//!
//! Attached clients, the gossip directory, per-link channel routing, and the
//! two holding queues (bootstrap for outbound frames, pending for inbound
//! envelopes awaiting a roster answer).

pub mod core;
pub mod types;

pub use self::core::{
    BootstrapQueue, ChannelRouter, ClientId, ClientKind, Directory, LocalClient, LocalClients,
    PendingAdmission, PendingEnvelope, Queued, Route, SlotOwner,
};
pub use types::PreparedMsg;
