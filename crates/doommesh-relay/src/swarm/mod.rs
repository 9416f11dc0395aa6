//! Swarm transport seam.
//!
//! The relay consumes, but does not build, a peer transport: joining a topic
//! yields ordered, reliable links to every other participant holding the same
//! topic. Each link multiplexes named channels carrying either raw bytes or
//! JSON. Connection, disconnection and channel traffic are pushed into the
//! relay as `SwarmEvent`s.

pub mod lifecycle;
pub mod memory;
pub mod topic;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use doommesh_core::error::Result;

pub use lifecycle::{ActiveMatch, Ensure, MatchSwarm};
pub use memory::{MemoryHub, MemoryTransport};
pub use topic::Topic;

/// Control channel name (JSON gossip).
pub const META_CHANNEL: &str = "doom-p2p-meta";
/// Transitional gameplay channel used before a match channel exists.
pub const DEFAULT_CHANNEL: &str = "doom-p2p";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Named channel on a peer link.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Meta,
    Default,
    Match(String),
}

impl Channel {
    pub fn name(&self) -> String {
        match self {
            Channel::Meta => META_CHANNEL.to_string(),
            Channel::Default => DEFAULT_CHANNEL.to_string(),
            Channel::Match(id) => format!("{DEFAULT_CHANNEL}/{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelPayload {
    Raw(Bytes),
    Json(serde_json::Value),
}

/// Sending half of one peer connection.
///
/// Sends are fire-and-forget: a full or closed link drops the message.
#[derive(Debug, Clone)]
pub struct PeerLink {
    pub id: LinkId,
    tx: mpsc::Sender<(Channel, ChannelPayload)>,
}

impl PeerLink {
    pub fn new(id: LinkId, tx: mpsc::Sender<(Channel, ChannelPayload)>) -> Self {
        Self { id, tx }
    }

    pub fn send(&self, channel: Channel, payload: ChannelPayload) -> bool {
        self.tx.try_send((channel, payload)).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}

#[derive(Debug)]
pub enum SwarmEvent {
    Connected { topic: Topic, link: PeerLink },
    Disconnected { topic: Topic, link: LinkId },
    Message {
        link: LinkId,
        channel: Channel,
        payload: ChannelPayload,
    },
}

#[async_trait]
pub trait SwarmTransport: Send + Sync + 'static {
    /// Announce and look up `topic`. Links arrive as `SwarmEvent::Connected`.
    async fn join(&self, topic: Topic) -> Result<()>;

    /// Release topic membership and close its links.
    async fn leave(&self, topic: Topic) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        assert_eq!(Channel::Meta.name(), "doom-p2p-meta");
        assert_eq!(Channel::Default.name(), "doom-p2p");
        assert_eq!(Channel::Match("doom-abc-1".into()).name(), "doom-p2p/doom-abc-1");
    }
}
