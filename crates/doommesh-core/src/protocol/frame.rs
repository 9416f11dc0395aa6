//! Local gameplay frame: `[to:u32 LE][from:u32 LE][body]`.
//!
//! This is what game clients emit on the local socket, unauthenticated. The
//! same bytes become the Envelope payload once the relay signs them. On the
//! way back to a local client the `to` word is stripped: `[from][body]`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{RelayError, Result};

/// Header size: destination slot + source slot.
pub const FRAME_HEADER_LEN: usize = 8;

/// Destination slot meaning "every participant".
pub const BROADCAST_SLOT: u32 = 0;

/// Slot id of the hosting player, fixed by the game protocol.
pub const HOST_SLOT: u32 = 1;

/// Parsed gameplay frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameFrame {
    pub to: u32,
    pub from: u32,
    /// Game-specific bytes after the 8-byte header (zero-copy).
    pub body: Bytes,
}

impl GameFrame {
    pub fn new(to: u32, from: u32, body: impl Into<Bytes>) -> Self {
        Self {
            to,
            from,
            body: body.into(),
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == BROADCAST_SLOT
    }

    /// Wire form as emitted by a game client.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + self.body.len());
        out.put_u32_le(self.to);
        out.put_u32_le(self.from);
        out.put_slice(&self.body);
        out.freeze()
    }

    /// Form handed to a local game client: `[from][body]`.
    pub fn delivery(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + self.body.len());
        out.put_u32_le(self.from);
        out.put_slice(&self.body);
        out.freeze()
    }
}

/// Decode a gameplay frame. Fails on buffers shorter than the header.
pub fn decode_game_frame(mut buf: Bytes) -> Result<GameFrame> {
    if buf.remaining() < FRAME_HEADER_LEN {
        return Err(RelayError::Malformed("game frame shorter than header".into()));
    }
    let to = buf.get_u32_le();
    let from = buf.get_u32_le();
    let body = buf.copy_to_bytes(buf.remaining());
    Ok(GameFrame { to, from, body })
}
