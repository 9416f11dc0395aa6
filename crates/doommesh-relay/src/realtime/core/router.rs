//! Channel router: peer links per swarm, open match channels, and the
//! best-known link per slot.
//!
//! Base-swarm links carry the control channel and the transitional default
//! channel; match-swarm links carry one channel per open match id. Routes are
//! last-writer-wins, updated on every authenticated receipt.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use doommesh_core::protocol::frame::BROADCAST_SLOT;

use crate::swarm::{Channel, ChannelPayload, LinkId, PeerLink};

/// Which swarm's links a send fans out over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Base,
    Match,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Base => "base",
            Route::Match => "match",
        }
    }
}

#[derive(Debug, Default)]
pub struct ChannelRouter {
    base: BTreeMap<LinkId, PeerLink>,
    matched: BTreeMap<LinkId, PeerLink>,
    games: BTreeSet<String>,
    routes: HashMap<u32, LinkId>,
}

impl ChannelRouter {
    fn set(&self, route: Route) -> &BTreeMap<LinkId, PeerLink> {
        match route {
            Route::Base => &self.base,
            Route::Match => &self.matched,
        }
    }

    fn set_mut(&mut self, route: Route) -> &mut BTreeMap<LinkId, PeerLink> {
        match route {
            Route::Base => &mut self.base,
            Route::Match => &mut self.matched,
        }
    }

    pub fn add_link(&mut self, route: Route, link: PeerLink) {
        self.set_mut(route).insert(link.id, link);
    }

    /// Drop a link and every slot route through it.
    pub fn remove_link(&mut self, route: Route, id: LinkId) -> bool {
        let removed = self.set_mut(route).remove(&id).is_some();
        if removed {
            self.routes.retain(|_, l| *l != id);
        }
        removed
    }

    pub fn link(&self, route: Route, id: LinkId) -> Option<&PeerLink> {
        self.set(route).get(&id)
    }

    pub fn has_link(&self, route: Route, id: LinkId) -> bool {
        self.set(route).contains_key(&id)
    }

    pub fn link_count(&self, route: Route) -> usize {
        self.set(route).len()
    }

    pub fn links(&self, route: Route) -> impl Iterator<Item = &PeerLink> {
        self.set(route).values()
    }

    /// Open a match channel; `true` if it was not open yet.
    pub fn ensure_match(&mut self, match_id: &str) -> bool {
        if match_id.is_empty() || self.games.contains(match_id) {
            return false;
        }
        self.games.insert(match_id.to_string())
    }

    pub fn has_match(&self, match_id: &str) -> bool {
        self.games.contains(match_id)
    }

    pub fn games(&self) -> impl Iterator<Item = &str> {
        self.games.iter().map(String::as_str)
    }

    /// The open match id when exactly one is open.
    pub fn only_game(&self) -> Option<&str> {
        if self.games.len() == 1 {
            self.games.iter().next().map(String::as_str)
        } else {
            None
        }
    }

    pub fn remember_route(&mut self, slot: u32, link: LinkId) {
        self.routes.insert(slot, link);
    }

    pub fn route_of(&self, slot: u32) -> Option<LinkId> {
        self.routes.get(&slot).copied()
    }

    /// Destination links for a frame addressed to `to`.
    ///
    /// Unicast when `to` has a live known route in `route`'s set other than
    /// `except`; otherwise every link in the set except `except`.
    pub fn targets(&self, route: Route, to: u32, except: Option<LinkId>) -> Vec<&PeerLink> {
        let set = self.set(route);
        if to != BROADCAST_SLOT {
            if let Some(link) = self
                .routes
                .get(&to)
                .filter(|id| Some(**id) != except)
                .and_then(|id| set.get(id))
                .filter(|l| l.is_alive())
            {
                return vec![link];
            }
        }
        set.values().filter(|l| Some(l.id) != except).collect()
    }

    /// Send `payload` on `channel` to the links picked by `targets`.
    /// Returns how many links accepted it.
    pub fn fan_out(
        &self,
        route: Route,
        to: u32,
        except: Option<LinkId>,
        channel: &Channel,
        payload: &ChannelPayload,
    ) -> usize {
        self.targets(route, to, except)
            .into_iter()
            .filter(|l| l.send(channel.clone(), payload.clone()))
            .count()
    }

    /// Send to every link in `route`'s set except `except`.
    pub fn broadcast(
        &self,
        route: Route,
        except: Option<LinkId>,
        channel: &Channel,
        payload: &ChannelPayload,
    ) -> usize {
        self.fan_out(route, BROADCAST_SLOT, except, channel, payload)
    }

    /// Forget match links, open match channels, and slot routes.
    pub fn clear_match(&mut self) -> usize {
        let n = self.matched.len();
        self.matched.clear();
        self.games.clear();
        self.routes.clear();
        n
    }
}
