//! Protocol modules (peer Envelope + local frame + control plane).
//!
//! - `envelope`: signed binary unit exchanged between relays.
//! - `frame`: raw `[to][from][body]` gameplay frame from local clients.
//! - `control`: JSON gossip and local client commands.
//!
//! All parsers are panic-free: malformed input is reported as `RelayError`
//! instead of panicking or indexing raw buffers.

pub mod control;
pub mod envelope;
pub mod frame;
