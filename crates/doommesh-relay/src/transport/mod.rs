//! Local client transport (WebSocket).
//!
//! Exposes the `/doom` and `/meta` upgrade handlers and the codec that
//! decodes each socket message once before it reaches the relay.

pub mod codec;
pub mod ws;
