//! Gameplay path: peer envelopes in, local frames out.

use std::time::Instant;

use bytes::Bytes;

use doommesh_core::error::DropCode;
use doommesh_core::protocol::envelope::{decode_envelope, Envelope};
use doommesh_core::protocol::frame::{GameFrame, BROADCAST_SLOT, HOST_SLOT};

use super::{HostBeacon, Relay, RelayEvent};
use crate::ledger::{fetch_roster, RosterEntry};
use crate::policy::{fnv1a32, Decision, RosterView, SlotKey};
use crate::realtime::{ClientId, Route};
use crate::swarm::{Channel, ChannelPayload, LinkId};

impl Relay {
    pub(super) fn count_drop(&mut self, code: DropCode) {
        self.stats.game_drop += 1;
        match code {
            DropCode::Forged => self.stats.invalid_sig += 1,
            DropCode::Replay => self.stats.replay += 1,
            DropCode::RateLimited => self.stats.rate_limited += 1,
            _ => {}
        }
        self.metrics.drops.inc(&[("code", code.as_str())]);
    }

    /// Anything arriving on a peer link.
    pub(super) fn on_channel_message(
        &mut self,
        link: LinkId,
        channel: Channel,
        payload: ChannelPayload,
        now: Instant,
    ) {
        match (channel, payload) {
            (Channel::Meta, ChannelPayload::Json(v)) if self.router.has_link(Route::Base, link) => {
                self.on_peer_gossip(link, v, now);
            }
            (Channel::Match(match_id), ChannelPayload::Raw(raw))
                if self.router.has_link(Route::Match, link) && self.router.has_match(&match_id) =>
            {
                let channel_key = Channel::Match(match_id.clone()).name();
                if self.frame_seen.seen_once((channel_key, fnv1a32(&raw)), now) {
                    return;
                }
                self.on_envelope(link, Route::Match, Some(&match_id), raw, now);
            }
            (Channel::Default, ChannelPayload::Raw(raw)) if self.router.has_link(Route::Base, link) => {
                if self
                    .frame_seen
                    .seen_once((Channel::Default.name(), fnv1a32(&raw)), now)
                {
                    return;
                }
                self.on_envelope(link, Route::Base, None, raw, now);
            }
            (channel, _) => {
                tracing::debug!(conn = %link, channel = %channel.name(), "message on unopened channel");
                self.count_drop(DropCode::BadRequest);
            }
        }
    }

    /// Verify, admit and deliver one peer envelope.
    fn on_envelope(
        &mut self,
        link: LinkId,
        route: Route,
        expected: Option<&str>,
        raw: Bytes,
        now: Instant,
    ) {
        let env = match decode_envelope(raw.clone()) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(conn = %link, reason = %e, "envelope dropped");
                self.count_drop(e.drop_code());
                return;
            }
        };
        if expected.is_some_and(|m| m != env.match_id) {
            tracing::debug!(conn = %link, match_id = %env.match_id, "envelope on wrong match channel");
            self.count_drop(DropCode::Malformed);
            return;
        }
        // Source slot check runs before admission so a forged frame never
        // advances the slot's sequence.
        if let Err(e) = env.frame() {
            tracing::debug!(conn = %link, match_id = %env.match_id, slot = env.slot_id, reason = %e, "envelope dropped");
            self.count_drop(e.drop_code());
            return;
        }

        let key = SlotKey::new(env.match_id.clone(), env.slot_id);
        let cached = self.roster.resolve(&key, now).cloned();
        if cached.is_none() {
            self.request_roster(&key);
        }
        let view = cached.as_ref().map_or(RosterView::Unknown, RosterEntry::view);
        if matches!(view, RosterView::Known(_)) {
            // Earlier arrivals first.
            self.replay_pending(&key, now);
        }

        let decision = self
            .guard
            .admit(&key, env.seq, view, |addr| env.verify(addr), now);
        match decision {
            Decision::Accept => self.on_verified(&env, raw, link, route),
            Decision::DropUnauthorized { pending: true } => {
                self.stats.unknown_slot += 1;
                let event = if self.pending.push(key, env, raw, link, route, now) {
                    "queued"
                } else {
                    "overflow"
                };
                self.metrics
                    .queue_events
                    .inc(&[("queue", "pending"), ("event", event)]);
            }
            other => {
                tracing::debug!(conn = %link, match_id = %env.match_id, slot = env.slot_id, seq = env.seq, decision = ?other, "envelope dropped");
                if let Some(code) = other.drop_code() {
                    self.count_drop(code);
                }
            }
        }
    }

    /// Deliver locally and forward to other links (multi-hop).
    fn on_verified(&mut self, env: &Envelope, raw: Bytes, link: LinkId, route: Route) {
        let Ok(frame) = env.frame() else { return };
        self.router.remember_route(frame.from, link);
        self.stats.game_rx += 1;
        self.metrics.frames.inc(&[("dir", "rx")]);

        let delivered = self.clients.deliver_game(&frame);
        if delivered == 0 {
            tracing::debug!(match_id = %env.match_id, to = frame.to, from = frame.from, "no local client for frame");
        }

        let channel = match route {
            Route::Match => Channel::Match(env.match_id.clone()),
            Route::Base => Channel::Default,
        };
        let fwd = self
            .router
            .fan_out(route, frame.to, Some(link), &channel, &ChannelPayload::Raw(raw));
        if fwd > 0 {
            self.stats.game_fwd += fwd as u64;
            self.metrics.frames.add(&[("dir", "fwd")], fwd as u64);
            tracing::debug!(match_id = %env.match_id, to = frame.to, from = frame.from, hops = fwd, "frame forwarded");
        }
    }

    /// Re-validate held envelopes for `key` once its roster entry is known.
    fn replay_pending(&mut self, key: &SlotKey, now: Instant) {
        let address = match self.roster.resolve(key, now).map(RosterEntry::view) {
            Some(RosterView::Known(a)) => a.clone(),
            _ => return,
        };
        for p in self.pending.take(key, now) {
            let decision = self
                .guard
                .readmit(key, p.envelope.seq, &address, |a| p.envelope.verify(a));
            match decision {
                Decision::Accept => {
                    self.metrics
                        .queue_events
                        .inc(&[("queue", "pending"), ("event", "replayed")]);
                    self.on_verified(&p.envelope, p.raw, p.link, p.route);
                }
                other => {
                    if let Some(code) = other.drop_code() {
                        self.count_drop(code);
                    }
                }
            }
        }
    }

    /// Start a ledger read for `key` unless one is already in flight.
    pub(super) fn request_roster(&mut self, key: &SlotKey) {
        if !self.roster.begin_fetch(key) {
            return;
        }
        let ledger = self.ledger.clone();
        let metrics = self.metrics.clone();
        let key = key.clone();
        self.spawn_with_events(move |tx| async move {
            let started = Instant::now();
            let result = fetch_roster(ledger.as_ref(), &key).await;
            metrics
                .ledger_read_duration
                .observe(&[("op", "roster")], started.elapsed());
            let entry = match result {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::debug!(match_id = %key.match_id, slot = key.slot, error = %e, "roster read failed");
                    metrics
                        .ledger_ops
                        .inc(&[("op", "roster"), ("outcome", "error")]);
                    None
                }
            };
            let _ = tx.send(RelayEvent::RosterResolved { key, entry }).await;
        });
    }

    pub(super) fn on_roster_resolved(&mut self, key: SlotKey, entry: Option<RosterEntry>, now: Instant) {
        // A failed read caches "unknown" so the slot is retried after the TTL.
        let entry = entry.unwrap_or_else(RosterEntry::unknown);
        let view = entry.view();
        let denied = matches!(view, RosterView::Denied);
        let known = matches!(view, RosterView::Known(_));
        self.roster.store(key.clone(), entry, now);
        if known {
            self.replay_pending(&key, now);
        } else if denied {
            let dropped = self.pending.take(&key, now).len();
            for _ in 0..dropped {
                self.count_drop(DropCode::Unauthorized);
            }
        }
    }

    /// Local game client frame: same-process delivery first, otherwise
    /// sign and send into the match swarm.
    pub(super) fn on_local_frame(&mut self, id: ClientId, frame: GameFrame, now: Instant) {
        let Some(client) = self.clients.get_mut(id) else { return };
        if client.slot.is_none() {
            client.slot = Some(frame.from);
        }
        let client_match = client.match_id.clone();

        let local = self.clients.deliver_local(id, &frame);
        if local > 0 {
            self.metrics.frames.add(&[("dir", "local")], local as u64);
            tracing::debug!(to = frame.to, from = frame.from, count = local, "frame delivered locally");
            return;
        }

        let Some(match_id) = client_match
            .or_else(|| self.last_match.clone())
            .or_else(|| self.router.only_game().map(str::to_string))
        else {
            tracing::debug!(to = frame.to, from = frame.from, "frame without match id dropped");
            self.count_drop(DropCode::BadRequest);
            return;
        };

        if !self.lifecycle.is_active() {
            let topic = self.known_topic(&match_id);
            self.ensure_swarm(&match_id, topic.as_deref(), "local-frame");
        }
        self.router.ensure_match(&match_id);
        self.ensure_join_game(&match_id, frame.from, now);

        let key = SlotKey::new(match_id.clone(), frame.from);
        let seq = self.seq_out.next(&key);
        let signed = Envelope::sign(&self.identity, &match_id, frame.from, seq, frame.encode())
            .and_then(|env| env.encode());
        let raw = match signed {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(match_id = %match_id, slot = frame.from, reason = %e, "frame not signable");
                self.count_drop(e.drop_code());
                return;
            }
        };

        let match_links = self.router.link_count(Route::Match);
        if match_links == 0 && frame.from != HOST_SLOT {
            let evicted = self.bootstrap.push(&match_id, raw, frame.to, frame.from, now);
            self.metrics
                .queue_events
                .inc(&[("queue", "bootstrap"), ("event", "queued")]);
            if evicted > 0 {
                self.metrics
                    .queue_events
                    .add(&[("queue", "bootstrap"), ("event", "overflow")], evicted as u64);
            }
            tracing::debug!(match_id = %match_id, to = frame.to, from = frame.from, "frame queued until match link");
            return;
        }

        let payload = ChannelPayload::Raw(raw.clone());
        let mut sent = self.router.fan_out(
            Route::Match,
            frame.to,
            None,
            &Channel::Match(match_id.clone()),
            &payload,
        );
        if match_links == 0 {
            // Host traffic before any match link exists rides the base swarm.
            sent += self
                .router
                .broadcast(Route::Base, None, &Channel::Default, &payload);
        }
        self.stats.game_tx += sent as u64;
        self.metrics.frames.add(&[("dir", "tx")], sent as u64);
        tracing::debug!(match_id = %match_id, to = frame.to, from = frame.from, seq, conns = sent, "frame sent");

        if frame.to == BROADCAST_SLOT && frame.from == HOST_SLOT {
            self.beacon = Some(HostBeacon {
                match_id,
                frame,
                envelope: raw,
            });
        }
    }

    /// Submit `joinGame` for a local slot, at most once per retry window.
    fn ensure_join_game(&mut self, match_id: &str, slot: u32, now: Instant) {
        if slot == 0 {
            return;
        }
        let key = SlotKey::new(match_id, slot);
        let retry = self.cfg.limits.join_retry();
        if self
            .join_attempts
            .get(&key)
            .is_some_and(|at| now.saturating_duration_since(*at) < retry)
        {
            return;
        }
        self.join_attempts.insert(key.clone(), now);

        let ledger = self.ledger.clone();
        let metrics = self.metrics.clone();
        self.spawn_with_events(move |tx| async move {
            match ledger.join_game(&key.match_id, key.slot).await {
                Ok(()) => {
                    metrics.ledger_ops.inc(&[("op", "join_game"), ("outcome", "ok")]);
                }
                Err(e) => {
                    metrics
                        .ledger_ops
                        .inc(&[("op", "join_game"), ("outcome", "error")]);
                    tracing::warn!(match_id = %key.match_id, slot = key.slot, error = %e, "joinGame failed");
                    let _ = tx.send(RelayEvent::JoinGameFailed { key }).await;
                }
            }
        });
    }
}
