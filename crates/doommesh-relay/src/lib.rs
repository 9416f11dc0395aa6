//! doommesh relay library entry.
//!
//! This crate wires the peer swarm, ledger-backed admission, gossip, and the
//! local client transport into one relay node. It is consumed by the binary
//! (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod ledger;
pub mod obs;
pub mod ops;
pub mod policy;
pub mod realtime;
pub mod relay;
pub mod router;
pub mod swarm;
pub mod transport;
