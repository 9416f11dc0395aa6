//! doommesh core: transport-agnostic wire contracts, error types, and
//! signing primitives.
//!
//! This crate defines the formats shared by every relay instance and local
//! game client: the signed peer Envelope, the local gameplay frame, and the
//! control/gossip message set. It carries no transport or runtime
//! dependencies so it can be reused by tooling and tests.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. Hostile peers
//! feed these parsers directly, so every fallible path surfaces as
//! `RelayError`/`Result`.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod identity;
pub mod protocol;

/// Shared result type.
pub use error::{DropCode, RelayError, Result};
pub use identity::{Address, Identity};
