//! Cloneable entry point into a running relay.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

use doommesh_core::error::{RelayError, Result};
use doommesh_core::identity::Address;
use doommesh_core::protocol::frame::{decode_game_frame, GameFrame};

use super::{RelayEvent, RelayStats};
use crate::realtime::{ClientId, ClientKind, PreparedMsg};

fn stopped() -> RelayError {
    RelayError::Transport("relay stopped".into())
}

/// Snapshot served by `/v1/info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayInfo {
    pub address: String,
    pub game_clients: usize,
    pub meta_clients: usize,
    pub games: Vec<String>,
    pub last_match: Option<String>,
    pub active_match: Option<String>,
    pub match_topic: Option<String>,
    pub match_links: usize,
    pub base_links: usize,
    pub known_matches: Vec<String>,
    pub presence: usize,
    pub pending: usize,
    pub bootstrap: usize,
    pub roster_entries: usize,
    pub rate_buckets: usize,
    pub stats: RelayStats,
}

#[derive(Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayEvent>,
    next_client: Arc<AtomicU64>,
    address: Address,
}

impl RelayHandle {
    pub(super) fn new(tx: mpsc::Sender<RelayEvent>, address: Address) -> Self {
        Self {
            tx,
            next_client: Arc::new(AtomicU64::new(1)),
            address,
        }
    }

    /// This relay's signing address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Register a local client. Outbound messages arrive on the session's
    /// queue of `queue` entries; a full queue drops messages.
    pub async fn attach(&self, kind: ClientKind, queue: usize) -> Result<LocalSession> {
        let id = self.next_client.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(queue.max(1));
        self.tx
            .send(RelayEvent::ClientAttached { id, kind, tx })
            .await
            .map_err(|_| stopped())?;
        Ok(LocalSession {
            id,
            kind,
            rx,
            events: self.tx.clone(),
        })
    }

    pub async fn info(&self) -> Result<RelayInfo> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RelayEvent::Info { reply })
            .await
            .map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }
}

/// One attached local client. Dropping it detaches the client.
pub struct LocalSession {
    id: ClientId,
    kind: ClientKind,
    rx: mpsc::Receiver<PreparedMsg>,
    events: mpsc::Sender<RelayEvent>,
}

impl LocalSession {
    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// Next outbound message for this client.
    pub async fn recv(&mut self) -> Option<PreparedMsg> {
        self.rx.recv().await
    }

    /// Control message (JSON text).
    pub async fn send_text(&self, text: String) -> Result<()> {
        self.events
            .send(RelayEvent::ClientText { id: self.id, text })
            .await
            .map_err(|_| stopped())
    }

    /// Gameplay frame `[to][from][body]`. Short frames are rejected here.
    pub async fn send_frame(&self, raw: Bytes) -> Result<()> {
        self.send_game_frame(decode_game_frame(raw)?).await
    }

    pub async fn send_game_frame(&self, frame: GameFrame) -> Result<()> {
        self.events
            .send(RelayEvent::ClientFrame { id: self.id, frame })
            .await
            .map_err(|_| stopped())
    }
}

impl Drop for LocalSession {
    fn drop(&mut self) {
        let ev = RelayEvent::ClientDetached { id: self.id };
        if let Err(TrySendError::Full(ev)) = self.events.try_send(ev) {
            let tx = self.events.clone();
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    let _ = tx.send(ev).await;
                });
            }
        }
    }
}
