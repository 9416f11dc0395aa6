//! Directly attached local clients (`/doom` game sockets, `/meta` control
//! sockets) and frame fan-out to them.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use doommesh_core::protocol::frame::{GameFrame, BROADCAST_SLOT, HOST_SLOT};

use crate::realtime::types::PreparedMsg;

pub type ClientId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    Game,
    Meta,
}

impl ClientKind {
    /// Metric label, matching the endpoint path.
    pub fn as_str(self) -> &'static str {
        match self {
            ClientKind::Game => "doom",
            ClientKind::Meta => "meta",
        }
    }
}

#[derive(Debug)]
pub struct LocalClient {
    pub kind: ClientKind,
    /// Game slot, learned from the first frame or a `hello`.
    pub slot: Option<u32>,
    pub is_server: bool,
    pub match_id: Option<String>,
    /// Kill log sequence for `match_id`; reset when the match changes.
    pub kill_seq: u32,
    tx: mpsc::Sender<PreparedMsg>,
}

impl LocalClient {
    pub fn new(kind: ClientKind, tx: mpsc::Sender<PreparedMsg>) -> Self {
        Self {
            kind,
            slot: None,
            is_server: false,
            match_id: None,
            kill_seq: 0,
            tx,
        }
    }

    /// Lossy: a full queue drops the message.
    pub fn send(&self, msg: PreparedMsg) -> bool {
        self.tx.try_send(msg).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct LocalClients {
    clients: BTreeMap<ClientId, LocalClient>,
}

impl LocalClients {
    pub fn insert(&mut self, id: ClientId, client: LocalClient) {
        self.clients.insert(id, client);
    }

    pub fn remove(&mut self, id: ClientId) -> Option<LocalClient> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&LocalClient> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut LocalClient> {
        self.clients.get_mut(&id)
    }

    pub fn count(&self, kind: ClientKind) -> usize {
        self.clients.values().filter(|c| c.kind == kind).count()
    }

    fn games(&self) -> impl Iterator<Item = (&ClientId, &LocalClient)> {
        self.clients.iter().filter(|(_, c)| c.kind == ClientKind::Game)
    }

    /// Deliver a peer-relayed frame to local game clients.
    ///
    /// Targets the client whose slot equals `to`, or every game client on
    /// broadcast. When nothing matched a unicast and exactly one client has
    /// not reported its slot yet, that client gets the frame.
    pub fn deliver_game(&self, frame: &GameFrame) -> usize {
        let msg = PreparedMsg::Binary(frame.delivery());
        let mut delivered = 0;
        let mut unknown = Vec::new();
        for (_, c) in self.games() {
            if frame.to != BROADCAST_SLOT {
                match c.slot {
                    None => {
                        unknown.push(c);
                        continue;
                    }
                    Some(s) if s != frame.to => continue,
                    Some(_) => {}
                }
            }
            if c.send(msg.clone()) {
                delivered += 1;
            }
        }
        if delivered == 0 && unknown.len() == 1 && unknown[0].send(msg) {
            delivered += 1;
        }
        delivered
    }

    /// Same-process delivery of a frame from local client `sender`. Only
    /// clients with a known slot qualify for unicast.
    pub fn deliver_local(&self, sender: ClientId, frame: &GameFrame) -> usize {
        let msg = PreparedMsg::Binary(frame.delivery());
        self.games()
            .filter(|(id, _)| **id != sender)
            .filter(|(_, c)| frame.to == BROADCAST_SLOT || c.slot == Some(frame.to))
            .filter(|(_, c)| c.send(msg.clone()))
            .count()
    }

    /// Mirror a control message to every meta client except `except`.
    pub fn send_meta(&self, msg: &PreparedMsg, except: Option<ClientId>) -> usize {
        self.clients
            .iter()
            .filter(|(id, c)| c.kind == ClientKind::Meta && Some(**id) != except)
            .filter(|(_, c)| c.send(msg.clone()))
            .count()
    }

    pub fn send_to(&self, id: ClientId, msg: PreparedMsg) -> bool {
        self.clients.get(&id).is_some_and(|c| c.send(msg))
    }

    /// A client announced itself as the hosting server: slot-less game
    /// clients on this relay belong to the host.
    pub fn seed_host_slot(&mut self) {
        for c in self.clients.values_mut() {
            if c.kind == ClientKind::Game && c.slot.is_none() {
                c.slot = Some(HOST_SLOT);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use bytes::Bytes;

    fn attach(
        set: &mut LocalClients,
        id: ClientId,
        kind: ClientKind,
        slot: Option<u32>,
    ) -> mpsc::Receiver<PreparedMsg> {
        let (tx, rx) = mpsc::channel(8);
        let mut c = LocalClient::new(kind, tx);
        c.slot = slot;
        set.insert(id, c);
        rx
    }

    fn frame(to: u32, from: u32) -> GameFrame {
        GameFrame::new(to, from, Bytes::from_static(b"x"))
    }

    #[test]
    fn unicast_hits_matching_slot_only() {
        let mut set = LocalClients::default();
        let mut a = attach(&mut set, 1, ClientKind::Game, Some(1));
        let mut b = attach(&mut set, 2, ClientKind::Game, Some(2));
        assert_eq!(set.deliver_game(&frame(2, 3)), 1);
        assert!(a.try_recv().is_err());
        assert_eq!(
            b.try_recv().unwrap(),
            PreparedMsg::Binary(Bytes::from_static(&[3, 0, 0, 0, b'x']))
        );
    }

    #[test]
    fn single_unknown_client_receives_unmatched_unicast() {
        let mut set = LocalClients::default();
        let mut a = attach(&mut set, 1, ClientKind::Game, None);
        assert_eq!(set.deliver_game(&frame(4, 1)), 1);
        assert!(a.try_recv().is_ok());

        let _b = attach(&mut set, 2, ClientKind::Game, None);
        assert_eq!(set.deliver_game(&frame(4, 1)), 0);
    }

    #[test]
    fn broadcast_skips_meta_clients() {
        let mut set = LocalClients::default();
        let _a = attach(&mut set, 1, ClientKind::Game, Some(1));
        let _b = attach(&mut set, 2, ClientKind::Game, None);
        let mut m = attach(&mut set, 3, ClientKind::Meta, None);
        assert_eq!(set.deliver_game(&frame(0, 5)), 2);
        assert!(m.try_recv().is_err());
    }

    #[test]
    fn local_delivery_excludes_sender_and_unknown_slots() {
        let mut set = LocalClients::default();
        let mut a = attach(&mut set, 1, ClientKind::Game, Some(1));
        let _b = attach(&mut set, 2, ClientKind::Game, None);
        assert_eq!(set.deliver_local(1, &frame(0, 1)), 1);
        assert!(a.try_recv().is_err());
        assert_eq!(set.deliver_local(1, &frame(2, 1)), 0);
    }

    #[test]
    fn server_hello_seeds_host_slot() {
        let mut set = LocalClients::default();
        let _a = attach(&mut set, 1, ClientKind::Game, None);
        let _m = attach(&mut set, 2, ClientKind::Meta, None);
        set.seed_host_slot();
        assert_eq!(set.get(1).unwrap().slot, Some(HOST_SLOT));
        assert_eq!(set.get(2).unwrap().slot, None);
        assert_eq!(set.count(ClientKind::Game), 1);
    }
}
