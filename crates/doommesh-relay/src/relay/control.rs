//! Local client control stream: attach/detach, bootstrap commands, and the
//! host-only ledger submissions they trigger.

use std::time::Instant;

use tokio::sync::mpsc;

use doommesh_core::protocol::control::{
    parse_client_message, ClientCommand, ClientMessage, GameMode, Gossip, MatchInfo, PeerHello,
};
use doommesh_core::protocol::frame::HOST_SLOT;

use super::gossip::max_players;
use super::{HostAction, Relay, RelayEvent};
use crate::ledger::fetch_hosting;
use crate::realtime::{ClientId, ClientKind, LocalClient, PreparedMsg};

impl Relay {
    pub(super) fn on_client_attached(
        &mut self,
        id: ClientId,
        kind: ClientKind,
        tx: mpsc::Sender<PreparedMsg>,
    ) {
        self.clients.insert(id, LocalClient::new(kind, tx));
        self.metrics.local_clients.inc(&[("kind", kind.as_str())]);
        tracing::info!(client = id, kind = kind.as_str(), "local client attached");

        match kind {
            ClientKind::Meta => self.send_local_snapshot(id),
            ClientKind::Game => {
                if let Some(b) = &self.beacon {
                    self.clients
                        .send_to(id, PreparedMsg::Binary(b.frame.delivery()));
                }
            }
        }
    }

    pub(super) fn on_client_detached(&mut self, id: ClientId) {
        if let Some(c) = self.clients.remove(id) {
            self.metrics.local_clients.dec(&[("kind", c.kind.as_str())]);
            tracing::info!(client = id, kind = c.kind.as_str(), "local client detached");
        }
    }

    pub(super) fn on_client_text(&mut self, id: ClientId, text: &str, now: Instant) {
        match parse_client_message(text) {
            Ok(ClientMessage::Command(cmd)) => self.on_command(id, cmd, now),
            Ok(ClientMessage::Gossip(msg)) => self.on_local_gossip(id, msg, now),
            Err(e) => {
                tracing::debug!(client = id, reason = %e, "control message rejected");
                self.metrics
                    .gossip
                    .inc(&[("kind", "unknown"), ("outcome", "rejected")]);
            }
        }
    }

    fn on_command(&mut self, id: ClientId, cmd: ClientCommand, now: Instant) {
        match cmd {
            ClientCommand::Hello(h) => {
                let Some(c) = self.clients.get_mut(id) else { return };
                c.is_server = h.is_server;
                c.slot = if h.is_server {
                    Some(HOST_SLOT)
                } else {
                    h.slot_id.or(c.slot)
                };
                if h.is_server {
                    self.clients.seed_host_slot();
                }
            }
            ClientCommand::Gid(g) => {
                let next = Some(g.match_id.trim().to_string()).filter(|s| !s.is_empty());
                let Some(c) = self.clients.get_mut(id) else { return };
                if next.is_some() && next != c.match_id {
                    c.kill_seq = 0;
                }
                c.match_id.clone_from(&next);
                let slot = c.slot.unwrap_or(0);

                let (address, nick) = match self.directory.slot(slot) {
                    Some(o) => (o.address.clone(), o.nick.clone()),
                    None => (self.identity.address().clone(), None),
                };
                let hello = PeerHello {
                    slot_id: slot,
                    address,
                    nick,
                    match_id: next.clone(),
                };
                self.publish(Gossip::Hello(hello), false, now);

                let Some(match_id) = next else { return };
                self.last_match = Some(match_id.clone());
                self.router.ensure_match(&match_id);
                if !self.lifecycle.is_active() {
                    let topic = self.known_topic(&match_id);
                    self.ensure_swarm(&match_id, topic.as_deref(), "gid");
                }
            }
            ClientCommand::Mhello(s) => {
                self.directory
                    .map_slot(s.slot_id, s.address.clone(), s.nick.clone(), now);
                let match_id = self.clients.get(id).and_then(|c| c.match_id.clone());
                let hello = PeerHello {
                    slot_id: s.slot_id,
                    address: s.address,
                    nick: s.nick,
                    match_id,
                };
                self.publish(Gossip::Hello(hello), false, now);
            }
            ClientCommand::Klog(k) => {
                let fallback = self
                    .lifecycle
                    .match_id()
                    .map(str::to_string)
                    .or_else(|| self.last_match.clone())
                    .or_else(|| self.router.only_game().map(str::to_string));
                let Some(c) = self.clients.get_mut(id) else { return };
                if !c.is_server && c.slot != Some(HOST_SLOT) {
                    tracing::debug!(client = id, "kill report from non-host ignored");
                    return;
                }
                let Some(match_id) = c.match_id.clone().or(fallback) else {
                    tracing::debug!(client = id, "kill report without a match");
                    return;
                };
                if c.match_id.is_none() {
                    c.match_id = Some(match_id.clone());
                }
                let action = HostAction::RecordKill {
                    client: id,
                    killer: k.killer_slot,
                    victim: k.victim_slot,
                };
                self.with_hosting(&match_id, action, now);
            }
        }
    }

    /// Host side effects of a match record this relay's own client published.
    pub(super) fn on_local_host_match(&mut self, kind: &str, info: &MatchInfo) {
        match kind {
            "match-announce" => {
                self.ensure_swarm(&info.match_id, info.match_topic.as_deref(), "host-announce");
            }
            "match-start" => {
                let mode = info
                    .mode
                    .or_else(|| self.directory.mode(&info.match_id).map(|m| m.mode))
                    .unwrap_or_default();
                let max = self.directory.get_match(&info.match_id).map(max_players);
                self.spawn_start_game(info.match_id.clone(), mode, max);
            }
            _ => {}
        }
    }

    /// Run `action` once the ledger confirms this relay hosts an active
    /// match. Cached answers apply immediately; a failed read counts as "no".
    pub(super) fn with_hosting(&mut self, match_id: &str, action: HostAction, now: Instant) {
        if let Some(ok) = self.roster.hosting(match_id, now) {
            self.on_host_checked(match_id, ok, action);
            return;
        }
        let ledger = self.ledger.clone();
        let metrics = self.metrics.clone();
        let me = self.identity.address().clone();
        let match_id = match_id.to_string();
        self.spawn_with_events(move |tx| async move {
            let started = Instant::now();
            let result = fetch_hosting(ledger.as_ref(), &match_id, &me).await;
            metrics
                .ledger_read_duration
                .observe(&[("op", "hosting")], started.elapsed());
            let ok = match result {
                Ok(ok) => ok,
                Err(e) => {
                    tracing::debug!(match_id = %match_id, error = %e, "hosting read failed");
                    metrics
                        .ledger_ops
                        .inc(&[("op", "hosting"), ("outcome", "error")]);
                    false
                }
            };
            let _ = tx
                .send(RelayEvent::HostChecked {
                    match_id,
                    ok,
                    action,
                })
                .await;
        });
    }

    pub(super) fn on_host_checked(&mut self, match_id: &str, ok: bool, action: HostAction) {
        if !ok {
            tracing::debug!(match_id, action = ?action, "not hosting an active match");
            return;
        }
        match action {
            HostAction::EndGame => self.spawn_end_game(match_id.to_string()),
            HostAction::RecordKill {
                client,
                killer,
                victim,
            } => {
                let coop = self
                    .directory
                    .mode(match_id)
                    .map(|m| m.mode)
                    .or_else(|| self.directory.get_match(match_id).and_then(|m| m.mode))
                    == Some(GameMode::Coop);
                if coop {
                    return;
                }
                let (Some(k), Some(v)) = (self.directory.slot(killer), self.directory.slot(victim))
                else {
                    tracing::debug!(match_id, killer, victim, "kill with unmapped slot ignored");
                    return;
                };
                let (k, v) = (k.address.clone(), v.address.clone());
                let Some(c) = self.clients.get_mut(client) else { return };
                c.kill_seq += 1;
                let seq = c.kill_seq;

                let ledger = self.ledger.clone();
                let metrics = self.metrics.clone();
                let match_id = match_id.to_string();
                tokio::spawn(async move {
                    let outcome = match ledger.record_kill(&match_id, seq, &k, &v).await {
                        Ok(()) => "ok",
                        Err(e) => {
                            tracing::warn!(match_id = %match_id, seq, error = %e, "record kill failed");
                            "error"
                        }
                    };
                    metrics
                        .ledger_ops
                        .inc(&[("op", "record_kill"), ("outcome", outcome)]);
                });
            }
        }
    }

    fn spawn_start_game(&self, match_id: String, mode: GameMode, max: Option<u32>) {
        let ledger = self.ledger.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let outcome = match ledger.start_game(&match_id, mode, max).await {
                Ok(()) => {
                    tracing::info!(match_id = %match_id, mode = mode.as_str(), "game start submitted");
                    "ok"
                }
                Err(e) => {
                    tracing::warn!(match_id = %match_id, error = %e, "start game failed");
                    "error"
                }
            };
            metrics
                .ledger_ops
                .inc(&[("op", "start_game"), ("outcome", outcome)]);
        });
    }

    fn spawn_end_game(&self, match_id: String) {
        let ledger = self.ledger.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let outcome = match ledger.end_game(&match_id).await {
                Ok(()) => {
                    tracing::info!(match_id = %match_id, "game end submitted");
                    "ok"
                }
                Err(e) => {
                    tracing::warn!(match_id = %match_id, error = %e, "end game failed");
                    "error"
                }
            };
            metrics
                .ledger_ops
                .inc(&[("op", "end_game"), ("outcome", outcome)]);
        });
    }
}
