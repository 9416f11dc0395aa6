use axum::extract::ws::Message;
use bytes::Bytes;
use serde::Serialize;

use doommesh_core::error::{RelayError, Result};

/// Prepared message for a local client queue (serialize once, send N times).
#[derive(Debug, Clone, PartialEq)]
pub enum PreparedMsg {
    Text(String),
    Binary(Bytes),
}

impl PreparedMsg {
    pub fn json<T: Serialize>(v: &T) -> Result<Self> {
        serde_json::to_string(v)
            .map(PreparedMsg::Text)
            .map_err(|e| RelayError::Internal(format!("json encode failed: {e}")))
    }

    /// Convert to axum::ws::Message for transport.
    /// NOTE: axum::Message::Binary requires Vec<u8>, so Binary path clones into Vec.
    pub fn to_ws_message(&self) -> Message {
        match self {
            PreparedMsg::Text(s) => Message::Text(s.clone()),
            PreparedMsg::Binary(b) => Message::Binary(b.to_vec()),
        }
    }
}
