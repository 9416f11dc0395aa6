//! Control plane: flood gossip over the base swarm's meta channel.
//!
//! Peer messages are deduplicated by correlation id (raw JSON when absent),
//! applied once, mirrored to local meta clients, and forwarded to every
//! other base link. Duplicates are neither applied nor forwarded again.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde_json::Value;

use doommesh_core::identity::Address;
use doommesh_core::protocol::control::{
    parse_gossip, DenyReason, Gossip, GossipMessage, MatchAccept, MatchDeny, MatchInfo,
    MatchJoin, MatchLeave, MatchStatus, PeerHello,
};
use doommesh_core::protocol::frame::HOST_SLOT;

use super::{HostAction, Relay};
use crate::realtime::{ClientId, PreparedMsg, Route};
use crate::swarm::{Channel, ChannelPayload, LinkId, Topic};

/// Players per match when the announce does not say.
const DEFAULT_MAX_PLAYERS: u32 = 4;
const MAX_PLAYERS: u32 = 4;

pub(super) fn new_rid() -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{stamp:x}{:016x}", rand::random::<u64>())
}

fn dedup_key(value: &Value) -> String {
    match value.get("rid").and_then(Value::as_str) {
        Some(rid) => format!("rid:{rid}"),
        None => format!("raw:{value}"),
    }
}

/// Kinds shown to local control clients when they arrive from peers.
fn mirrored(body: &Gossip) -> bool {
    !matches!(body, Gossip::Hello(_) | Gossip::MatchListReq)
}

pub(super) fn max_players(m: &MatchInfo) -> u32 {
    m.max_players
        .unwrap_or(DEFAULT_MAX_PLAYERS)
        .clamp(1, MAX_PLAYERS)
}

/// Host-side admission rules: content hashes must match what the host
/// loaded, then capacity. A current player is always re-admitted.
pub(super) fn check_admission(m: &MatchInfo, join: &MatchJoin) -> Option<DenyReason> {
    if let Some(iwad) = &m.iwad_hash {
        if join.iwad_hash.as_ref() != Some(iwad) {
            return Some(DenyReason::WadMismatch);
        }
    }
    if !m.pwad_hashes.is_empty() && join.pwad_hashes != m.pwad_hashes {
        return Some(DenyReason::WadMismatch);
    }
    if let (Some(a), Some(b)) = (&m.wad_hash, &join.wad_hash) {
        if a != b {
            return Some(DenyReason::WadMismatch);
        }
    }
    if m.players.contains(&join.from) {
        return None;
    }
    if m.players.len() as u32 >= max_players(m) {
        return Some(DenyReason::MatchFull);
    }
    None
}

fn roster_status(m: &mut MatchInfo) {
    if matches!(m.status, None | Some(MatchStatus::Open) | Some(MatchStatus::Full)) {
        m.status = Some(if m.players.len() as u32 >= max_players(m) {
            MatchStatus::Full
        } else {
            MatchStatus::Open
        });
    }
}

fn roster_update(m: &MatchInfo) -> MatchInfo {
    let mut update = MatchInfo::new(m.match_id.clone());
    update.players.clone_from(&m.players);
    update.max_players = Some(max_players(m));
    update.status = m.status;
    update
}

impl Relay {
    fn me(&self) -> &Address {
        self.identity.address()
    }

    pub(super) fn on_peer_gossip(&mut self, link: LinkId, value: Value, now: Instant) {
        if self.gossip_seen.seen_once(dedup_key(&value), now) {
            self.metrics
                .gossip
                .inc(&[("kind", "any"), ("outcome", "duplicate")]);
            return;
        }
        let msg = match parse_gossip(value.clone()) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::debug!(conn = %link, reason = %e, "gossip rejected");
                self.metrics
                    .gossip
                    .inc(&[("kind", "unknown"), ("outcome", "rejected")]);
                return;
            }
        };
        let kind = msg.body.kind();
        self.apply_peer_gossip(link, &msg.body, now);
        if mirrored(&msg.body) {
            self.clients.send_meta(&PreparedMsg::Text(value.to_string()), None);
        }
        self.router.broadcast(
            Route::Base,
            Some(link),
            &Channel::Meta,
            &ChannelPayload::Json(value),
        );
        self.metrics
            .gossip
            .inc(&[("kind", kind), ("outcome", "applied")]);
    }

    fn apply_peer_gossip(&mut self, link: LinkId, body: &Gossip, now: Instant) {
        match body {
            Gossip::Hello(h) => {
                self.directory
                    .map_slot(h.slot_id, h.address.clone(), h.nick.clone(), now);
                if let Some(g) = h.match_id.as_deref().filter(|g| !g.is_empty()) {
                    self.router.ensure_match(g);
                    if self.last_match.is_none() {
                        self.last_match = Some(g.to_string());
                    }
                    self.roster.invalidate(g, h.slot_id);
                }
            }
            Gossip::Mode(m) => self.directory.set_mode(m.clone(), now),
            Gossip::Presence(p) => self.directory.upsert_presence(p.clone(), now),
            Gossip::MatchAnnounce(info) | Gossip::MatchUpdate(info) | Gossip::MatchStart(info) => {
                if self.cfg.relay.indexer {
                    self.ensure_swarm(&info.match_id, info.match_topic.as_deref(), "indexer");
                }
                self.record_match(info.clone(), now);
            }
            Gossip::MatchEnd(e) => self.end_match(&e.match_id),
            Gossip::MatchJoin(j) => self.host_admit(j, now),
            Gossip::MatchAccept(a) if &a.to == self.me() => self.accepted(a, now),
            Gossip::MatchDeny(d) if &d.to == self.me() => {
                if self.lifecycle.match_id() == Some(d.match_id.as_str()) {
                    tracing::info!(match_id = %d.match_id, reason = ?d.reason, "join denied");
                    self.destroy_swarm("match-deny");
                }
            }
            Gossip::MatchLeave(l) => self.host_leave(l, now),
            Gossip::MatchListReq => self.send_meta_snapshot(link),
            Gossip::MatchAccept(_) | Gossip::MatchDeny(_) | Gossip::Chat(_) => {}
        }
    }

    /// Upsert a match record, filling in its swarm topic.
    fn record_match(&mut self, mut info: MatchInfo, now: Instant) {
        let supplied = info.match_topic.take().or_else(|| self.known_topic(&info.match_id));
        let topic = Topic::resolve(&self.cfg.relay.channel, &info.match_id, supplied.as_deref());
        info.match_topic = Some(topic.to_hex());
        self.directory.upsert_match(&info, now);
    }

    fn end_match(&mut self, match_id: &str) {
        self.directory.remove_match(match_id);
        if self.lifecycle.match_id() == Some(match_id) {
            self.destroy_swarm("match-end");
        }
    }

    fn accepted(&mut self, accept: &MatchAccept, now: Instant) {
        let mut info = accept
            .info
            .clone()
            .unwrap_or_else(|| MatchInfo::new(accept.match_id.clone()));
        info.match_id.clone_from(&accept.match_id);
        self.record_match(info, now);
        let topic = self.known_topic(&accept.match_id);
        tracing::info!(match_id = %accept.match_id, "join accepted");
        self.ensure_swarm(&accept.match_id, topic.as_deref(), "accepted");

        // Slots held back for this match get a fresh roster read.
        for key in self.pending.keys() {
            if key.match_id == accept.match_id {
                self.roster.invalidate(&key.match_id, key.slot);
                self.request_roster(&key);
            }
        }
    }

    fn host_admit(&mut self, join: &MatchJoin, now: Instant) {
        let me = self.me().clone();
        if join.from == me {
            return;
        }
        let Some(m) = self.directory.get_match_mut(&join.match_id) else { return };
        if m.host.as_ref() != Some(&me) {
            return;
        }
        if !m.players.contains(&me) {
            m.players.insert(0, me);
        }

        if let Some(reason) = check_admission(m, join) {
            tracing::info!(match_id = %join.match_id, from = %join.from, reason = ?reason, "join denied");
            let deny = MatchDeny {
                match_id: join.match_id.clone(),
                to: join.from.clone(),
                reason,
            };
            self.publish(Gossip::MatchDeny(deny), true, now);
            return;
        }

        if !m.players.contains(&join.from) {
            m.players.push(join.from.clone());
        }
        roster_status(m);
        let snapshot = m.clone();
        tracing::info!(match_id = %join.match_id, from = %join.from, players = snapshot.players.len(), "join accepted");
        self.publish(Gossip::MatchUpdate(roster_update(&snapshot)), true, now);
        let accept = MatchAccept {
            match_id: join.match_id.clone(),
            to: join.from.clone(),
            info: Some(snapshot),
        };
        self.publish(Gossip::MatchAccept(accept), true, now);
    }

    fn host_leave(&mut self, leave: &MatchLeave, now: Instant) {
        let me = self.me().clone();
        if leave.from == me {
            return;
        }
        let Some(m) = self.directory.get_match_mut(&leave.match_id) else { return };
        if m.host.as_ref() != Some(&me) || !m.players.contains(&leave.from) {
            return;
        }
        m.players.retain(|p| p != &leave.from);
        roster_status(m);
        let update = roster_update(m);
        tracing::info!(match_id = %leave.match_id, from = %leave.from, "player left");
        self.publish(Gossip::MatchUpdate(update), true, now);
    }

    /// Originate a gossip message: fresh correlation id, sent to every base
    /// link, optionally mirrored to local meta clients.
    pub(super) fn publish(&mut self, body: Gossip, mirror: bool, now: Instant) {
        let rid = new_rid();
        self.gossip_seen.seen_once(format!("rid:{rid}"), now);
        let msg = GossipMessage::new(rid, body);
        self.send_gossip(&msg, mirror, None);
    }

    fn send_gossip(&mut self, msg: &GossipMessage, mirror: bool, except_client: Option<ClientId>) {
        let value = match serde_json::to_value(msg) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(kind = msg.body.kind(), error = %e, "gossip encode failed");
                return;
            }
        };
        if mirror {
            self.clients
                .send_meta(&PreparedMsg::Text(value.to_string()), except_client);
        }
        self.router
            .broadcast(Route::Base, None, &Channel::Meta, &ChannelPayload::Json(value));
        self.metrics
            .gossip
            .inc(&[("kind", msg.body.kind()), ("outcome", "sent")]);
    }

    /// Current directory view to one base link, without correlation ids.
    pub(super) fn send_meta_snapshot(&self, id: LinkId) {
        let Some(link) = self.router.link(Route::Base, id) else { return };
        let match_id = self
            .last_match
            .clone()
            .or_else(|| self.router.only_game().map(str::to_string));
        let mut out = Vec::new();
        if let Some(g) = match_id {
            let owner = self.directory.slot(HOST_SLOT).or_else(|| self.directory.slot(0));
            out.push(Gossip::Hello(PeerHello {
                slot_id: HOST_SLOT,
                address: owner.map_or_else(|| self.me().clone(), |o| o.address.clone()),
                nick: owner.and_then(|o| o.nick.clone()),
                match_id: Some(g),
            }));
        }
        out.extend(self.directory.snapshot());
        for body in out {
            let msg = GossipMessage { rid: None, body };
            match serde_json::to_value(&msg) {
                Ok(v) => {
                    link.send(Channel::Meta, ChannelPayload::Json(v));
                }
                Err(e) => tracing::warn!(error = %e, "snapshot encode failed"),
            }
        }
    }

    /// Current directory view to one local meta client.
    pub(super) fn send_local_snapshot(&self, id: ClientId) {
        for body in self.directory.snapshot() {
            let msg = GossipMessage { rid: None, body };
            match PreparedMsg::json(&msg) {
                Ok(m) => {
                    self.clients.send_to(id, m);
                }
                Err(e) => tracing::warn!(error = %e, "snapshot encode failed"),
            }
        }
    }

    /// Gossip originated by a local client.
    pub(super) fn on_local_gossip(&mut self, id: ClientId, mut msg: GossipMessage, now: Instant) {
        let rid = msg.rid.get_or_insert_with(new_rid).clone();
        self.gossip_seen.seen_once(format!("rid:{rid}"), now);
        let me = self.me().clone();
        let kind = msg.body.kind();
        let mut mirror = true;

        match &mut msg.body {
            Gossip::Mode(m) => {
                if let Some(c) = self.clients.get_mut(id) {
                    if c.match_id.is_none() {
                        c.match_id = Some(m.match_id.clone());
                    }
                }
                self.directory.set_mode(m.clone(), now);
            }
            Gossip::Presence(p) => self.directory.upsert_presence(p.clone(), now),
            Gossip::MatchListReq => {
                self.send_local_snapshot(id);
                mirror = false;
            }
            Gossip::MatchAnnounce(info) | Gossip::MatchUpdate(info) | Gossip::MatchStart(info) => {
                if info.match_topic.is_none() {
                    let known = self.known_topic(&info.match_id);
                    let topic = Topic::resolve(&self.cfg.relay.channel, &info.match_id, known.as_deref());
                    info.match_topic = Some(topic.to_hex());
                }
                let hosting = info.host.as_ref() == Some(&me)
                    || self
                        .directory
                        .get_match(&info.match_id)
                        .is_some_and(|m| m.host.as_ref() == Some(&me));
                self.record_match(info.clone(), now);
                if hosting {
                    self.on_local_host_match(kind, info);
                }
            }
            Gossip::MatchEnd(e) => {
                let hosting = self
                    .directory
                    .get_match(&e.match_id)
                    .is_some_and(|m| m.host.as_ref() == Some(&me));
                let match_id = e.match_id.clone();
                self.end_match(&match_id);
                if hosting {
                    self.with_hosting(&match_id, HostAction::EndGame, now);
                }
            }
            // A local `hello` always parses as the slot-binding command.
            Gossip::Hello(_)
            | Gossip::MatchJoin(_)
            | Gossip::MatchAccept(_)
            | Gossip::MatchDeny(_)
            | Gossip::MatchLeave(_)
            | Gossip::Chat(_) => {}
        }

        self.send_gossip(&msg, mirror, Some(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hosted() -> MatchInfo {
        let mut m = MatchInfo::new("m");
        m.host = Some(Address::new("aa"));
        m.players = vec![Address::new("aa")];
        m
    }

    fn join(from: &str) -> MatchJoin {
        MatchJoin {
            match_id: "m".into(),
            from: Address::new(from),
            iwad_hash: None,
            pwad_hashes: Vec::new(),
            wad_hash: None,
        }
    }

    #[test]
    fn iwad_must_match_when_host_declares_one() {
        let mut m = hosted();
        m.iwad_hash = Some("doom2".into());
        assert_eq!(check_admission(&m, &join("bb")), Some(DenyReason::WadMismatch));
        let mut j = join("bb");
        j.iwad_hash = Some("doom2".into());
        assert_eq!(check_admission(&m, &j), None);
    }

    #[test]
    fn pwad_list_must_match_in_order() {
        let mut m = hosted();
        m.pwad_hashes = vec!["x".into(), "y".into()];
        let mut j = join("bb");
        j.pwad_hashes = vec!["y".into(), "x".into()];
        assert_eq!(check_admission(&m, &j), Some(DenyReason::WadMismatch));
        j.pwad_hashes.reverse();
        assert_eq!(check_admission(&m, &j), None);
    }

    #[test]
    fn combined_hash_only_compared_when_both_sides_have_it() {
        let mut m = hosted();
        m.wad_hash = Some("h1".into());
        assert_eq!(check_admission(&m, &join("bb")), None);
        let mut j = join("bb");
        j.wad_hash = Some("h2".into());
        assert_eq!(check_admission(&m, &j), Some(DenyReason::WadMismatch));
    }

    #[test]
    fn full_match_denies_newcomers_but_not_members() {
        let mut m = hosted();
        m.max_players = Some(2);
        m.players.push(Address::new("bb"));
        assert_eq!(check_admission(&m, &join("cc")), Some(DenyReason::MatchFull));
        assert_eq!(check_admission(&m, &join("bb")), None);
    }

    #[test]
    fn max_players_is_clamped() {
        let mut m = hosted();
        assert_eq!(max_players(&m), 4);
        m.max_players = Some(16);
        assert_eq!(max_players(&m), 4);
        m.max_players = Some(0);
        assert_eq!(max_players(&m), 1);
    }

    #[test]
    fn roster_status_tracks_capacity_until_started() {
        let mut m = hosted();
        m.max_players = Some(2);
        roster_status(&mut m);
        assert_eq!(m.status, Some(MatchStatus::Open));
        m.players.push(Address::new("bb"));
        roster_status(&mut m);
        assert_eq!(m.status, Some(MatchStatus::Full));
        m.status = Some(MatchStatus::InGame);
        m.players.pop();
        roster_status(&mut m);
        assert_eq!(m.status, Some(MatchStatus::InGame));
    }

    #[test]
    fn dedup_key_prefers_rid() {
        assert_eq!(dedup_key(&json!({"t": "chat", "rid": "r1", "text": "a"})), "rid:r1");
        let raw = dedup_key(&json!({"t": "chat", "text": "a"}));
        assert!(raw.starts_with("raw:"));
        assert_ne!(raw, dedup_key(&json!({"t": "chat", "text": "b"})));
    }

    #[test]
    fn hello_and_list_requests_are_not_mirrored() {
        assert!(!mirrored(&Gossip::MatchListReq));
        assert!(mirrored(&Gossip::MatchEnd(doommesh_core::protocol::control::MatchEnd {
            match_id: "m".into(),
            reason: None,
        })));
    }

    #[test]
    fn rids_are_unique() {
        assert_ne!(new_rid(), new_rid());
    }
}
