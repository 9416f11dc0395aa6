//! Match swarm lifecycle and peer link bookkeeping.

use std::time::Instant;

use tokio::sync::mpsc;

use super::{Relay, RelayEvent};
use crate::realtime::Route;
use crate::swarm::{
    ActiveMatch, Channel, ChannelPayload, Ensure, LinkId, PeerLink, SwarmTransport, Topic,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmOp {
    Join(Topic),
    Leave(Topic),
}

/// Apply swarm membership changes strictly in submission order.
pub(super) async fn run_swarm_ops<T: SwarmTransport>(
    transport: T,
    mut ops: mpsc::UnboundedReceiver<SwarmOp>,
    events: mpsc::WeakSender<RelayEvent>,
) {
    while let Some(op) = ops.recv().await {
        match op {
            SwarmOp::Join(topic) => {
                if let Err(e) = transport.join(topic).await {
                    tracing::warn!(topic = ?topic, error = %e, "swarm join failed");
                    if let Some(tx) = events.upgrade() {
                        let _ = tx.send(RelayEvent::SwarmJoinFailed { topic }).await;
                    }
                }
            }
            SwarmOp::Leave(topic) => {
                if let Err(e) = transport.leave(topic).await {
                    tracing::warn!(topic = ?topic, error = %e, "swarm leave failed");
                }
            }
        }
    }
}

impl Relay {
    pub(super) fn swarm_op(&self, op: SwarmOp) {
        if self.swarm_ops.send(op).is_err() {
            tracing::warn!(op = ?op, "swarm worker gone");
        }
    }

    /// Topic hex a gossiped match record carries, if any.
    pub(super) fn known_topic(&self, match_id: &str) -> Option<String> {
        self.directory
            .get_match(match_id)
            .and_then(|m| m.match_topic.clone())
    }

    /// `none -> active` (or switch): join the match topic, replacing any
    /// other active match swarm.
    pub(super) fn ensure_swarm(&mut self, match_id: &str, topic_hex: Option<&str>, reason: &str) {
        if match_id.is_empty() {
            return;
        }
        let topic = Topic::resolve(&self.cfg.relay.channel, match_id, topic_hex);
        match self.lifecycle.ensure(match_id, topic) {
            Ensure::Unchanged => {}
            Ensure::Created { replaced } => {
                if let Some(old) = replaced {
                    self.teardown(old, "replaced");
                }
                self.router.ensure_match(match_id);
                self.last_match = Some(match_id.to_string());
                self.swarm_op(SwarmOp::Join(topic));
                self.metrics
                    .swarm_transitions
                    .inc(&[("transition", "created"), ("reason", reason)]);
                tracing::info!(match_id, topic = ?topic, reason, "match swarm created");
            }
        }
    }

    /// `active -> none` if a match swarm is active.
    pub(super) fn destroy_swarm(&mut self, reason: &str) {
        if let Some(old) = self.lifecycle.take() {
            self.teardown(old, reason);
        }
    }

    /// Release the topic and forget every piece of per-match state. Queued
    /// frames are discarded, not drained.
    fn teardown(&mut self, old: ActiveMatch, reason: &str) {
        let links = self.router.clear_match();
        let queued = self.bootstrap.clear();
        self.last_match = None;
        self.roster.clear();
        self.pending.clear();
        self.join_attempts.clear();
        self.guard.clear();
        self.seq_out.clear();
        self.beacon = None;
        self.swarm_op(SwarmOp::Leave(old.topic));

        self.metrics.peer_links.set(&[("swarm", Route::Match.as_str())], 0);
        self.metrics
            .swarm_transitions
            .inc(&[("transition", "destroyed"), ("reason", reason)]);
        tracing::info!(
            match_id = %old.match_id,
            topic = ?old.topic,
            links,
            discarded = queued,
            reason,
            "match swarm destroyed"
        );
    }

    pub(super) fn on_swarm_join_failed(&mut self, topic: Topic) {
        if topic == self.base_topic {
            tracing::error!(topic = ?topic, "base swarm unavailable; gossip disabled");
            return;
        }
        if let Some(old) = self.lifecycle.join_failed(topic) {
            self.teardown(old, "join-failed");
        }
    }

    pub(super) fn on_link_connected(&mut self, topic: Topic, link: PeerLink) {
        let id = link.id;
        if topic == self.base_topic {
            self.router.add_link(Route::Base, link);
            self.metrics.peer_links.inc(&[("swarm", Route::Base.as_str())]);
            tracing::debug!(conn = %id, "base link up");
            self.send_meta_snapshot(id);
            return;
        }
        if self.lifecycle.topic() != Some(topic) {
            tracing::debug!(conn = %id, topic = ?topic, "link for inactive topic ignored");
            return;
        }
        self.router.add_link(Route::Match, link);
        self.metrics.peer_links.inc(&[("swarm", Route::Match.as_str())]);
        tracing::debug!(conn = %id, match_id = ?self.lifecycle.match_id(), "match link up");
        self.send_beacon(id);
        self.flush_bootstrap(Instant::now());
    }

    pub(super) fn on_link_disconnected(&mut self, topic: Topic, id: LinkId) {
        let route = if topic == self.base_topic {
            Route::Base
        } else {
            Route::Match
        };
        if self.router.remove_link(route, id) {
            self.metrics.peer_links.dec(&[("swarm", route.as_str())]);
            tracing::debug!(conn = %id, swarm = route.as_str(), "link down");
        }
    }

    /// Replay the host beacon on a fresh match link.
    fn send_beacon(&self, id: LinkId) {
        let Some(b) = &self.beacon else { return };
        if self.lifecycle.match_id() != Some(b.match_id.as_str()) {
            return;
        }
        if let Some(link) = self.router.link(Route::Match, id) {
            link.send(
                Channel::Match(b.match_id.clone()),
                ChannelPayload::Raw(b.envelope.clone()),
            );
        }
    }

    /// Send every queued outbound frame now that a match link exists.
    pub(super) fn flush_bootstrap(&mut self, now: Instant) {
        if self.router.link_count(Route::Match) == 0 || self.bootstrap.is_empty() {
            return;
        }
        let mut sent = 0;
        let mut frames = 0;
        for q in self.bootstrap.drain(now) {
            self.router.ensure_match(&q.match_id);
            sent += self.router.fan_out(
                Route::Match,
                q.to,
                None,
                &Channel::Match(q.match_id),
                &ChannelPayload::Raw(q.envelope),
            );
            frames += 1;
        }
        self.stats.game_tx += sent as u64;
        self.metrics
            .queue_events
            .add(&[("queue", "bootstrap"), ("event", "replayed")], frames);
        self.metrics.frames.add(&[("dir", "tx")], sent as u64);
        tracing::debug!(frames, sent, "bootstrap queue flushed");
    }
}
