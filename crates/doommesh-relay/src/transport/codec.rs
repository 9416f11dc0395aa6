//! Decode-once codec for local client sockets.
//!
//! - Text frames => control message text (parsed by the relay)
//! - Binary frames => `GameFrame` (panic-free, header checked here)
//! - Ping/Pong/Close are surfaced for lifecycle management

use axum::extract::ws::Message;
use bytes::Bytes;

use doommesh_core::error::Result;
use doommesh_core::protocol::frame::{decode_game_frame, GameFrame};

#[derive(Debug)]
pub enum Inbound {
    Control(String),
    Frame(GameFrame),
    Ping(Vec<u8>),
    Pong,
    Close,
}

pub fn decode(msg: Message) -> Result<Inbound> {
    match msg {
        Message::Text(s) => Ok(Inbound::Control(s)),
        Message::Binary(b) => Ok(Inbound::Frame(decode_game_frame(Bytes::from(b))?)),
        Message::Ping(v) => Ok(Inbound::Ping(v)),
        Message::Pong(_) => Ok(Inbound::Pong),
        Message::Close(_) => Ok(Inbound::Close),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use super::*;

    #[test]
    fn binary_becomes_game_frame() {
        let raw = vec![0, 0, 0, 0, 2, 0, 0, 0, 9];
        match decode(Message::Binary(raw)).unwrap() {
            Inbound::Frame(f) => {
                assert_eq!(f.to, 0);
                assert_eq!(f.from, 2);
                assert_eq!(&f.body[..], &[9]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn short_binary_is_malformed() {
        let err = decode(Message::Binary(vec![1, 2, 3])).unwrap_err();
        assert_eq!(err.drop_code().as_str(), "MALFORMED");
    }

    #[test]
    fn text_passes_through() {
        let m = decode(Message::Text(r#"{"t":"gid","matchId":"m"}"#.into())).unwrap();
        assert!(matches!(m, Inbound::Control(s) if s.contains("gid")));
    }
}
