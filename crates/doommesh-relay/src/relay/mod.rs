//! The relay actor.
//!
//! One task owns every table (clients, directory, router, roster cache,
//! guard, queues) and handles events one at a time: local client traffic,
//! swarm traffic, ledger results, and the periodic sweep. Ledger calls and
//! swarm joins run in spawned tasks and report back as events, so nothing
//! on the delivery path waits on the network.

mod control;
mod game;
mod gossip;
mod handle;
mod lifecycle;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use doommesh_core::identity::Identity;
use doommesh_core::protocol::frame::GameFrame;

use crate::config::RelayConfig;
use crate::ledger::{Ledger, RosterCache, RosterEntry};
use crate::obs::RelayMetrics;
use crate::policy::{ReplayGuard, SeenSet, SeqTable, SlotKey};
use crate::realtime::{
    BootstrapQueue, ChannelRouter, ClientId, ClientKind, Directory, LocalClients, PendingAdmission,
    PreparedMsg,
};
use crate::swarm::{MatchSwarm, SwarmEvent, SwarmTransport, Topic};

pub use handle::{LocalSession, RelayHandle, RelayInfo};
pub use lifecycle::SwarmOp;

const EVENT_QUEUE: usize = 4096;

/// Host-only follow-up waiting on `isHostingMatchActive`.
#[derive(Debug)]
pub enum HostAction {
    RecordKill {
        client: ClientId,
        killer: u32,
        victim: u32,
    },
    EndGame,
}

#[derive(Debug)]
pub enum RelayEvent {
    ClientAttached {
        id: ClientId,
        kind: ClientKind,
        tx: mpsc::Sender<PreparedMsg>,
    },
    ClientDetached {
        id: ClientId,
    },
    ClientText {
        id: ClientId,
        text: String,
    },
    ClientFrame {
        id: ClientId,
        frame: GameFrame,
    },
    /// `None` when the ledger read failed.
    RosterResolved {
        key: SlotKey,
        entry: Option<RosterEntry>,
    },
    HostChecked {
        match_id: String,
        ok: bool,
        action: HostAction,
    },
    JoinGameFailed {
        key: SlotKey,
    },
    SwarmJoinFailed {
        topic: Topic,
    },
    Info {
        reply: oneshot::Sender<RelayInfo>,
    },
}

/// Counters reported by `/v1/info`.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStats {
    pub game_rx: u64,
    pub game_tx: u64,
    pub game_fwd: u64,
    pub game_drop: u64,
    pub invalid_sig: u64,
    pub unknown_slot: u64,
    pub replay: u64,
    pub rate_limited: u64,
}

/// Host's latest broadcast frame, replayed to late joiners.
#[derive(Debug, Clone)]
struct HostBeacon {
    match_id: String,
    frame: GameFrame,
    envelope: Bytes,
}

pub struct Relay {
    cfg: Arc<RelayConfig>,
    identity: Identity,
    ledger: Arc<dyn Ledger>,
    metrics: Arc<RelayMetrics>,
    events: mpsc::WeakSender<RelayEvent>,
    swarm_ops: mpsc::UnboundedSender<SwarmOp>,
    base_topic: Topic,

    clients: LocalClients,
    directory: Directory,
    router: ChannelRouter,
    lifecycle: MatchSwarm,
    roster: RosterCache,
    guard: ReplayGuard,
    seq_out: SeqTable,
    pending: PendingAdmission,
    bootstrap: BootstrapQueue,
    frame_seen: SeenSet<(String, u32)>,
    gossip_seen: SeenSet<String>,
    join_attempts: HashMap<SlotKey, Instant>,
    last_match: Option<String>,
    beacon: Option<HostBeacon>,
    stats: RelayStats,
}

/// Start a relay on the current runtime.
///
/// `connect` receives the sink for swarm events and returns the transport
/// the relay drives. The base topic is joined immediately.
pub fn spawn<T, F>(
    cfg: Arc<RelayConfig>,
    identity: Identity,
    ledger: Arc<dyn Ledger>,
    metrics: Arc<RelayMetrics>,
    connect: F,
) -> RelayHandle
where
    T: SwarmTransport,
    F: FnOnce(mpsc::Sender<SwarmEvent>) -> T,
{
    let (ev_tx, ev_rx) = mpsc::channel(EVENT_QUEUE);
    let (swarm_tx, swarm_rx) = mpsc::channel(EVENT_QUEUE);
    let (ops_tx, ops_rx) = mpsc::unbounded_channel();

    let transport = connect(swarm_tx);
    tokio::spawn(lifecycle::run_swarm_ops(transport, ops_rx, ev_tx.downgrade()));

    let address = identity.address().clone();
    let relay = Relay::new(cfg, identity, ledger, metrics, ev_tx.downgrade(), ops_tx);
    relay.swarm_op(SwarmOp::Join(relay.base_topic));
    tokio::spawn(relay.run(ev_rx, swarm_rx));

    RelayHandle::new(ev_tx, address)
}

impl Relay {
    fn new(
        cfg: Arc<RelayConfig>,
        identity: Identity,
        ledger: Arc<dyn Ledger>,
        metrics: Arc<RelayMetrics>,
        events: mpsc::WeakSender<RelayEvent>,
        swarm_ops: mpsc::UnboundedSender<SwarmOp>,
    ) -> Self {
        let l = &cfg.limits;
        Self {
            base_topic: Topic::base(&cfg.relay.channel),
            roster: RosterCache::new(l.roster_cache(), l.host_check_cache()),
            guard: ReplayGuard::new(l.rate_per_sec, l.rate_burst),
            pending: PendingAdmission::new(l.pending_ttl(), l.pending_max),
            bootstrap: BootstrapQueue::new(l.bootstrap_max_age(), l.bootstrap_max_items),
            frame_seen: SeenSet::new(l.frame_dedup_ttl(), l.dedup_cap, l.dedup_evict),
            gossip_seen: SeenSet::new(l.gossip_dedup_ttl(), l.dedup_cap, l.dedup_evict),
            clients: LocalClients::default(),
            directory: Directory::default(),
            router: ChannelRouter::default(),
            lifecycle: MatchSwarm::default(),
            seq_out: SeqTable::default(),
            join_attempts: HashMap::new(),
            last_match: None,
            beacon: None,
            stats: RelayStats::default(),
            cfg,
            identity,
            ledger,
            metrics,
            events,
            swarm_ops,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<RelayEvent>,
        mut swarm: mpsc::Receiver<SwarmEvent>,
    ) {
        let mut sweep = tokio::time::interval(self.cfg.ttl.sweep());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(address = %self.identity.address(), channel = %self.cfg.relay.channel, "relay started");

        loop {
            tokio::select! {
                ev = events.recv() => match ev {
                    Some(ev) => self.on_event(ev),
                    None => break,
                },
                Some(ev) = swarm.recv() => self.on_swarm(ev),
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }
        tracing::info!("relay stopped");
    }

    fn on_event(&mut self, ev: RelayEvent) {
        let now = Instant::now();
        match ev {
            RelayEvent::ClientAttached { id, kind, tx } => self.on_client_attached(id, kind, tx),
            RelayEvent::ClientDetached { id } => self.on_client_detached(id),
            RelayEvent::ClientText { id, text } => self.on_client_text(id, &text, now),
            RelayEvent::ClientFrame { id, frame } => self.on_local_frame(id, frame, now),
            RelayEvent::RosterResolved { key, entry } => self.on_roster_resolved(key, entry, now),
            RelayEvent::HostChecked {
                match_id,
                ok,
                action,
            } => {
                self.roster.store_hosting(&match_id, ok, now);
                self.on_host_checked(&match_id, ok, action);
            }
            RelayEvent::JoinGameFailed { key } => {
                self.join_attempts.remove(&key);
            }
            RelayEvent::SwarmJoinFailed { topic } => self.on_swarm_join_failed(topic),
            RelayEvent::Info { reply } => {
                let _ = reply.send(self.info());
            }
        }
    }

    fn on_swarm(&mut self, ev: SwarmEvent) {
        let now = Instant::now();
        match ev {
            SwarmEvent::Connected { topic, link } => self.on_link_connected(topic, link),
            SwarmEvent::Disconnected { topic, link } => self.on_link_disconnected(topic, link),
            SwarmEvent::Message {
                link,
                channel,
                payload,
            } => self.on_channel_message(link, channel, payload, now),
        }
    }

    /// Post an event back to this relay from a spawned task.
    fn spawn_with_events<Fut>(&self, task: impl FnOnce(mpsc::Sender<RelayEvent>) -> Fut)
    where
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        if let Some(tx) = self.events.upgrade() {
            tokio::spawn(task(tx));
        }
    }

    fn sweep(&mut self, now: Instant) {
        let ttl = &self.cfg.ttl;
        let (presence, matches) = self.directory.prune(now, ttl.presence(), ttl.matches());
        if presence + matches > 0 {
            tracing::debug!(presence, matches, "directory entries expired");
        }

        let expired = self.pending.prune(now);
        if expired > 0 {
            self.metrics
                .queue_events
                .add(&[("queue", "pending"), ("event", "expired")], expired as u64);
        }
        let expired = self.bootstrap.prune(now);
        if expired > 0 {
            self.metrics
                .queue_events
                .add(&[("queue", "bootstrap"), ("event", "expired")], expired as u64);
        }
        self.frame_seen.prune(now);
        self.gossip_seen.prune(now);

        let roster = self.roster.prune(now);
        let buckets = self.guard.prune(now);
        let retry = self.cfg.limits.join_retry();
        self.join_attempts
            .retain(|_, at| now.saturating_duration_since(*at) < retry);
        if roster + buckets > 0 {
            tracing::debug!(roster, buckets, "idle admission state pruned");
        }

        for key in self.pending.keys() {
            if self.roster.resolve(&key, now).is_none() {
                self.request_roster(&key);
            }
        }
    }

    fn info(&self) -> RelayInfo {
        RelayInfo {
            address: self.identity.address().to_string(),
            game_clients: self.clients.count(ClientKind::Game),
            meta_clients: self.clients.count(ClientKind::Meta),
            games: self.router.games().map(str::to_string).collect(),
            last_match: self.last_match.clone(),
            active_match: self.lifecycle.match_id().map(str::to_string),
            match_topic: self.lifecycle.topic().map(|t| t.to_hex()),
            match_links: self.router.link_count(crate::realtime::Route::Match),
            base_links: self.router.link_count(crate::realtime::Route::Base),
            known_matches: self.directory.match_ids(),
            presence: self.directory.presence_len(),
            pending: self.pending.len(),
            bootstrap: self.bootstrap.len(),
            roster_entries: self.roster.len(),
            rate_buckets: self.guard.rate_buckets(),
            stats: self.stats.clone(),
        }
    }
}
