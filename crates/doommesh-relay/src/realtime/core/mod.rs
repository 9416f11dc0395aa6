//! Relay runtime tables.
//!
//! Plain single-owner structures: the relay actor holds them by value and
//! nothing else touches them, so no locking is involved.

mod bootstrap;
mod clients;
mod pending;
mod presence;
mod router;

pub use bootstrap::{BootstrapQueue, Queued};
pub use clients::{ClientId, ClientKind, LocalClient, LocalClients};
pub use pending::{PendingAdmission, PendingEnvelope};
pub use presence::{Directory, SlotOwner};
pub use router::{ChannelRouter, Route};
