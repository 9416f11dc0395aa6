//! Top-level facade crate for doommesh.
//!
//! Re-exports the wire contracts and the relay node so users can depend on a single crate.

pub mod core {
    pub use doommesh_core::*;
}

pub mod relay {
    pub use doommesh_relay::*;
}
