//! Control plane messages (JSON).
//!
//! Two directions share the `t` discriminator:
//! - `Gossip`: flooded between relays on the control channel and mirrored to
//!   local control clients.
//! - `ClientCommand`: bootstrap/report messages only a local client sends.
//!
//! Both are closed tagged unions; unknown kinds fail to parse and are
//! rejected by the caller instead of being silently ignored.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{RelayError, Result};
use crate::identity::Address;

/// Game ruleset. Unknown strings normalize to deathmatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    Altdeath,
    Coop,
    #[default]
    #[serde(other)]
    Deathmatch,
}

impl GameMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Deathmatch => "deathmatch",
            GameMode::Altdeath => "altdeath",
            GameMode::Coop => "coop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Open,
    Full,
    Starting,
    InGame,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Host,
    Joining,
    InGame,
    #[default]
    #[serde(other)]
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    MatchFull,
    WadMismatch,
    #[serde(other)]
    Unspecified,
}

/// Clients historically send `maxPlayers` either as a number or a numeric string.
fn de_lenient_u32<'de, D>(d: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u32),
        Str(String),
    }
    Ok(match Option::<NumOrStr>::deserialize(d)? {
        Some(NumOrStr::Num(n)) => Some(n),
        Some(NumOrStr::Str(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Match record as carried by announce/update/start/accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchInfo {
    pub match_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<GameMode>,
    #[serde(
        default,
        deserialize_with = "de_lenient_u32",
        skip_serializing_if = "Option::is_none"
    )]
    pub max_players: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub players: Vec<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MatchStatus>,
    /// Hex sha256 swarm topic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iwad_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pwad_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wad_hash: Option<String>,
}

impl MatchInfo {
    pub fn new(match_id: impl Into<String>) -> Self {
        Self {
            match_id: match_id.into(),
            host: None,
            mode: None,
            max_players: None,
            players: Vec::new(),
            status: None,
            match_topic: None,
            iwad_hash: None,
            pwad_hashes: Vec::new(),
            wad_hash: None,
        }
    }

    /// Overlay the fields `update` carries; absent fields keep their value.
    pub fn merge_from(&mut self, update: &MatchInfo) {
        if update.host.is_some() {
            self.host.clone_from(&update.host);
        }
        if update.mode.is_some() {
            self.mode = update.mode;
        }
        if update.max_players.is_some() {
            self.max_players = update.max_players;
        }
        if !update.players.is_empty() {
            self.players.clone_from(&update.players);
        }
        if update.status.is_some() {
            self.status = update.status;
        }
        if update.match_topic.is_some() {
            self.match_topic.clone_from(&update.match_topic);
        }
        if update.iwad_hash.is_some() {
            self.iwad_hash.clone_from(&update.iwad_hash);
        }
        if !update.pwad_hashes.is_empty() {
            self.pwad_hashes.clone_from(&update.pwad_hashes);
        }
        if update.wad_hash.is_some() {
            self.wad_hash.clone_from(&update.wad_hash);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerHello {
    pub slot_id: u32,
    pub address: Address,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeInfo {
    pub match_id: String,
    #[serde(default)]
    pub mode: GameMode,
    #[serde(default)]
    pub no_monsters: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    pub address: Address,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub status: PresenceStatus,
    #[serde(default)]
    pub match_id: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEnd {
    pub match_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchJoin {
    pub match_id: String,
    pub from: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iwad_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pwad_hashes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wad_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAccept {
    pub match_id: String,
    pub to: Address,
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub info: Option<MatchInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDeny {
    pub match_id: String,
    pub to: Address,
    pub reason: DenyReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchLeave {
    pub match_id: String,
    pub from: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    #[serde(default)]
    pub from: Option<Address>,
    #[serde(default)]
    pub nick: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_id: Option<String>,
}

/// Gossiped control message kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum Gossip {
    Hello(PeerHello),
    Mode(ModeInfo),
    Presence(PresenceInfo),
    MatchAnnounce(MatchInfo),
    MatchUpdate(MatchInfo),
    MatchStart(MatchInfo),
    MatchEnd(MatchEnd),
    MatchJoin(MatchJoin),
    MatchAccept(MatchAccept),
    MatchDeny(MatchDeny),
    MatchLeave(MatchLeave),
    MatchListReq,
    Chat(Chat),
}

impl Gossip {
    /// Wire discriminator, also used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Gossip::Hello(_) => "hello",
            Gossip::Mode(_) => "mode",
            Gossip::Presence(_) => "presence",
            Gossip::MatchAnnounce(_) => "match-announce",
            Gossip::MatchUpdate(_) => "match-update",
            Gossip::MatchStart(_) => "match-start",
            Gossip::MatchEnd(_) => "match-end",
            Gossip::MatchJoin(_) => "match-join",
            Gossip::MatchAccept(_) => "match-accept",
            Gossip::MatchDeny(_) => "match-deny",
            Gossip::MatchLeave(_) => "match-leave",
            Gossip::MatchListReq => "match-list-req",
            Gossip::Chat(_) => "chat",
        }
    }

    pub fn match_id(&self) -> Option<&str> {
        match self {
            Gossip::Hello(m) => m.match_id.as_deref(),
            Gossip::Mode(m) => Some(&m.match_id),
            Gossip::Presence(m) => m.match_id.as_deref(),
            Gossip::MatchAnnounce(m) | Gossip::MatchUpdate(m) | Gossip::MatchStart(m) => {
                Some(&m.match_id)
            }
            Gossip::MatchEnd(m) => Some(&m.match_id),
            Gossip::MatchJoin(m) => Some(&m.match_id),
            Gossip::MatchAccept(m) => Some(&m.match_id),
            Gossip::MatchDeny(m) => Some(&m.match_id),
            Gossip::MatchLeave(m) => Some(&m.match_id),
            Gossip::MatchListReq => None,
            Gossip::Chat(m) => m.match_id.as_deref(),
        }
    }
}

/// A gossip message plus its random correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GossipMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    #[serde(flatten)]
    pub body: Gossip,
}

impl GossipMessage {
    pub fn new(rid: impl Into<String>, body: Gossip) -> Self {
        Self {
            rid: Some(rid.into()),
            body,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| RelayError::Internal(format!("gossip encode failed: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHello {
    #[serde(default)]
    pub is_server: bool,
    #[serde(default)]
    pub slot_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientGid {
    #[serde(default)]
    pub match_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotIdentity {
    pub slot_id: u32,
    pub address: Address,
    #[serde(default)]
    pub nick: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillReport {
    pub killer_slot: u32,
    pub victim_slot: u32,
}

/// Messages only a directly attached client sends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "t", rename_all = "kebab-case")]
pub enum ClientCommand {
    Hello(ClientHello),
    Gid(ClientGid),
    Mhello(SlotIdentity),
    Klog(KillReport),
}

/// Anything a local client may put on the control stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ClientMessage {
    Command(ClientCommand),
    Gossip(GossipMessage),
}

/// Parse a control message from a local client.
pub fn parse_client_message(s: &str) -> Result<ClientMessage> {
    serde_json::from_str(s)
        .map_err(|e| RelayError::BadRequest(format!("unknown or invalid control message: {e}")))
}

/// Parse a gossip message received from a peer.
pub fn parse_gossip(value: serde_json::Value) -> Result<GossipMessage> {
    serde_json::from_value(value)
        .map_err(|e| RelayError::BadRequest(format!("unknown or invalid gossip message: {e}")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;
    use serde_json::json;

    #[test]
    fn announce_parses_with_string_max_players() {
        let msg = parse_gossip(json!({
            "t": "match-announce",
            "rid": "r1",
            "matchId": "doom-abc-1",
            "host": "aa",
            "mode": "altdeath",
            "maxPlayers": "4",
            "status": "open"
        }))
        .unwrap();
        assert_eq!(msg.rid.as_deref(), Some("r1"));
        match msg.body {
            Gossip::MatchAnnounce(info) => {
                assert_eq!(info.max_players, Some(4));
                assert_eq!(info.mode, Some(GameMode::Altdeath));
                assert_eq!(info.status, Some(MatchStatus::Open));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = parse_gossip(json!({ "t": "match-explode", "matchId": "x" })).unwrap_err();
        assert_eq!(err.drop_code().as_str(), "BAD_REQUEST");
    }

    #[test]
    fn unknown_mode_normalizes_to_deathmatch() {
        let msg = parse_gossip(json!({ "t": "mode", "matchId": "m", "mode": "ctf" })).unwrap();
        assert_eq!(
            msg.body,
            Gossip::Mode(ModeInfo {
                match_id: "m".into(),
                mode: GameMode::Deathmatch,
                no_monsters: false
            })
        );
    }

    #[test]
    fn unknown_presence_status_falls_back_to_idle() {
        let msg = parse_gossip(json!({
            "t": "presence",
            "address": "ab",
            "status": "spectating"
        }))
        .unwrap();
        match msg.body {
            Gossip::Presence(p) => assert_eq!(p.status, PresenceStatus::Idle),
            other => panic!("unexpected {other:?}"),
        }
        let msg =
            parse_gossip(json!({ "t": "presence", "address": "ab", "status": "in_game" })).unwrap();
        match msg.body {
            Gossip::Presence(p) => assert_eq!(p.status, PresenceStatus::InGame),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn local_commands_win_over_gossip() {
        let m = parse_client_message(r#"{"t":"hello","isServer":true}"#).unwrap();
        assert_eq!(
            m,
            ClientMessage::Command(ClientCommand::Hello(ClientHello {
                is_server: true,
                slot_id: None
            }))
        );
        let m = parse_client_message(r#"{"t":"hello","slotId":2,"address":"ab"}"#).unwrap();
        assert!(matches!(m, ClientMessage::Command(ClientCommand::Hello(_))));
        let m = parse_client_message(r#"{"t":"match-leave","matchId":"m","from":"ab"}"#).unwrap();
        assert!(matches!(m, ClientMessage::Gossip(_)));
        assert!(parse_client_message(r#"{"t":"bogus"}"#).is_err());
    }

    #[test]
    fn serialized_gossip_keeps_tag_and_rid() {
        let msg = GossipMessage::new(
            "abc",
            Gossip::MatchEnd(MatchEnd {
                match_id: "m".into(),
                reason: None,
            }),
        );
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["t"], "match-end");
        assert_eq!(v["rid"], "abc");
        assert_eq!(v["matchId"], "m");
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let mut base = MatchInfo::new("m");
        base.host = Some(Address::new("aa"));
        base.max_players = Some(4);
        let mut upd = MatchInfo::new("m");
        upd.status = Some(MatchStatus::Full);
        base.merge_from(&upd);
        assert_eq!(base.max_players, Some(4));
        assert_eq!(base.status, Some(MatchStatus::Full));
        assert_eq!(base.host, Some(Address::new("aa")));
    }
}
