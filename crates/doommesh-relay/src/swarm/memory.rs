//! In-process swarm transport.
//!
//! `MemoryHub` connects every node holding a topic to every other node
//! holding it (full mesh per topic). Each link is a bounded queue drained by
//! a forwarding task, so per-link ordering holds and a slow receiver only
//! backs up its own links.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use doommesh_core::error::{RelayError, Result};

use super::{Channel, ChannelPayload, LinkId, PeerLink, SwarmEvent, SwarmTransport, Topic};

const LINK_QUEUE: usize = 1024;

type NodeId = u64;

struct Node {
    sink: mpsc::Sender<SwarmEvent>,
    topics: HashSet<Topic>,
}

/// Two directed links between nodes `a` and `b` on one topic.
struct Pair {
    topic: Topic,
    a: NodeId,
    b: NodeId,
    a_link: LinkId,
    b_link: LinkId,
    forwarders: [JoinHandle<()>; 2],
}

#[derive(Default)]
struct HubInner {
    next_node: NodeId,
    next_link: u64,
    nodes: HashMap<NodeId, Node>,
    pairs: Vec<Pair>,
}

/// Outbound notifications collected under the lock, delivered after it.
type Outbox = Vec<(mpsc::Sender<SwarmEvent>, SwarmEvent)>;

#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<Mutex<HubInner>>,
}

fn forward(
    mut rx: mpsc::Receiver<(Channel, ChannelPayload)>,
    sink: mpsc::Sender<SwarmEvent>,
    link: LinkId,
    ready: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Hold traffic until both ends have seen `Connected`.
        if ready.await.is_err() {
            return;
        }
        while let Some((channel, payload)) = rx.recv().await {
            let ev = SwarmEvent::Message {
                link,
                channel,
                payload,
            };
            if sink.send(ev).await.is_err() {
                break;
            }
        }
    })
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node whose swarm events go to `sink`.
    pub fn transport(&self, sink: mpsc::Sender<SwarmEvent>) -> MemoryTransport {
        let node = match self.inner.lock() {
            Ok(mut g) => {
                g.next_node += 1;
                let id = g.next_node;
                g.nodes.insert(
                    id,
                    Node {
                        sink,
                        topics: HashSet::new(),
                    },
                );
                id
            }
            // A poisoned hub yields a node that can never join anything.
            Err(_) => 0,
        };
        MemoryTransport {
            hub: self.clone(),
            node,
        }
    }

    /// Number of live directed links on `topic` (tests, diagnostics).
    pub fn link_count(&self, topic: &Topic) -> usize {
        self.inner
            .lock()
            .map(|g| g.pairs.iter().filter(|p| &p.topic == topic).count() * 2)
            .unwrap_or(0)
    }

    fn join_node(&self, node: NodeId, topic: Topic) -> Result<(Outbox, Vec<oneshot::Sender<()>>)> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| RelayError::Transport("hub lock poisoned".into()))?;
        let inner = &mut *g;

        let me = inner
            .nodes
            .get_mut(&node)
            .ok_or_else(|| RelayError::Transport("node not registered".into()))?;
        if !me.topics.insert(topic) {
            return Ok((Vec::new(), Vec::new()));
        }
        let my_sink = me.sink.clone();

        let peers: Vec<(NodeId, mpsc::Sender<SwarmEvent>)> = inner
            .nodes
            .iter()
            .filter(|(id, n)| **id != node && n.topics.contains(&topic))
            .map(|(id, n)| (*id, n.sink.clone()))
            .collect();

        let mut outbox = Vec::new();
        let mut gates = Vec::new();
        for (peer, peer_sink) in peers {
            inner.next_link += 1;
            let a_link = LinkId(inner.next_link);
            inner.next_link += 1;
            let b_link = LinkId(inner.next_link);

            // a -> b: held by `node`, delivered to `peer` as traffic on b_link.
            let (ab_tx, ab_rx) = mpsc::channel(LINK_QUEUE);
            let (ba_tx, ba_rx) = mpsc::channel(LINK_QUEUE);
            let (ab_go, ab_ready) = oneshot::channel();
            let (ba_go, ba_ready) = oneshot::channel();

            let forwarders = [
                forward(ab_rx, peer_sink.clone(), b_link, ab_ready),
                forward(ba_rx, my_sink.clone(), a_link, ba_ready),
            ];
            inner.pairs.push(Pair {
                topic,
                a: node,
                b: peer,
                a_link,
                b_link,
                forwarders,
            });

            outbox.push((
                my_sink.clone(),
                SwarmEvent::Connected {
                    topic,
                    link: PeerLink::new(a_link, ab_tx),
                },
            ));
            outbox.push((
                peer_sink,
                SwarmEvent::Connected {
                    topic,
                    link: PeerLink::new(b_link, ba_tx),
                },
            ));
            gates.push(ab_go);
            gates.push(ba_go);
        }
        Ok((outbox, gates))
    }

    fn leave_node(&self, node: NodeId, topic: Topic) -> Result<Outbox> {
        let mut g = self
            .inner
            .lock()
            .map_err(|_| RelayError::Transport("hub lock poisoned".into()))?;
        let inner = &mut *g;

        if let Some(me) = inner.nodes.get_mut(&node) {
            me.topics.remove(&topic);
        }

        let mut outbox = Vec::new();
        let (gone, kept): (Vec<Pair>, Vec<Pair>) = std::mem::take(&mut inner.pairs)
            .into_iter()
            .partition(|p| p.topic == topic && (p.a == node || p.b == node));
        inner.pairs = kept;

        for p in gone {
            for f in &p.forwarders {
                f.abort();
            }
            for (n, link) in [(p.a, p.a_link), (p.b, p.b_link)] {
                if let Some(sink) = inner.nodes.get(&n).map(|n| n.sink.clone()) {
                    outbox.push((sink, SwarmEvent::Disconnected { topic, link }));
                }
            }
        }
        Ok(outbox)
    }
}

async fn deliver(outbox: Outbox) {
    for (sink, ev) in outbox {
        let _ = sink.send(ev).await;
    }
}

/// One node's handle on a `MemoryHub`.
#[derive(Clone)]
pub struct MemoryTransport {
    hub: MemoryHub,
    node: NodeId,
}

#[async_trait]
impl SwarmTransport for MemoryTransport {
    async fn join(&self, topic: Topic) -> Result<()> {
        let (outbox, gates) = self.hub.join_node(self.node, topic)?;
        deliver(outbox).await;
        for g in gates {
            let _ = g.send(());
        }
        Ok(())
    }

    async fn leave(&self, topic: Topic) -> Result<()> {
        let outbox = self.hub.leave_node(self.node, topic)?;
        deliver(outbox).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn next(rx: &mut mpsc::Receiver<SwarmEvent>) -> SwarmEvent {
        timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn joined_nodes_get_linked_and_exchange_frames() {
        let hub = MemoryHub::new();
        let (tx_a, mut rx_a) = mpsc::channel(16);
        let (tx_b, mut rx_b) = mpsc::channel(16);
        let a = hub.transport(tx_a);
        let b = hub.transport(tx_b);
        let topic = Topic::base("test");

        a.join(topic).await.unwrap();
        b.join(topic).await.unwrap();
        assert_eq!(hub.link_count(&topic), 2);

        let SwarmEvent::Connected { link: a_link, .. } = next(&mut rx_a).await else {
            panic!("expected connect on a");
        };
        let SwarmEvent::Connected { link: b_link, .. } = next(&mut rx_b).await else {
            panic!("expected connect on b");
        };

        assert!(a_link.send(Channel::Default, ChannelPayload::Raw(Bytes::from_static(b"hi"))));
        match next(&mut rx_b).await {
            SwarmEvent::Message { link, channel, payload } => {
                assert_eq!(link, b_link.id);
                assert_eq!(channel, Channel::Default);
                assert_eq!(payload, ChannelPayload::Raw(Bytes::from_static(b"hi")));
            }
            other => panic!("unexpected {other:?}"),
        }

        a.leave(topic).await.unwrap();
        assert!(matches!(next(&mut rx_a).await, SwarmEvent::Disconnected { .. }));
        assert!(matches!(next(&mut rx_b).await, SwarmEvent::Disconnected { .. }));
        assert_eq!(hub.link_count(&topic), 0);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let hub = MemoryHub::new();
        let (tx_a, _rx_a) = mpsc::channel(16);
        let (tx_b, _rx_b) = mpsc::channel(16);
        let a = hub.transport(tx_a);
        let b = hub.transport(tx_b);
        a.join(Topic::for_match("c", "g1")).await.unwrap();
        b.join(Topic::for_match("c", "g2")).await.unwrap();
        assert_eq!(hub.link_count(&Topic::for_match("c", "g1")), 0);
    }
}
