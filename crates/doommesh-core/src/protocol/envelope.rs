//! Signed peer Envelope (panic-free).
//!
//! Layout, all little-endian:
//! `[version:u8][matchIdLen:u16][matchId][slotId:u32][seq:u32][signature:64][payload]`
//!
//! The signature covers `sha256(matchIdLen | matchId | slotId | seq | payload)`
//! and must verify against the roster address for `(matchId, slotId)`.
//!
//! Parsing rules:
//! - Never index raw buffers; use `Buf` and `remaining()` checks.
//! - Every malformed input becomes `RelayError`, never a panic.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use sha2::{Digest, Sha256};

use crate::error::{RelayError, Result};
use crate::identity::{Address, Identity, SIGNATURE_LEN};
use crate::protocol::frame::{decode_game_frame, GameFrame, FRAME_HEADER_LEN};

/// Envelope version for this protocol revision.
pub const ENVELOPE_VERSION: u8 = 1;

/// Fixed bytes before the match id and after it (excluding payload).
const FIXED_PREFIX: usize = 1 + 2;
const FIXED_SUFFIX: usize = 4 + 4 + SIGNATURE_LEN;

/// Parsed or locally built envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub match_id: String,
    pub slot_id: u32,
    pub seq: u32,
    pub signature: [u8; SIGNATURE_LEN],
    /// Raw gameplay frame `[to][from][body]` (zero-copy).
    pub payload: Bytes,
}

/// Canonical hash signed by the sender.
pub fn signing_hash(match_id: &str, slot_id: u32, seq: u32, payload: &[u8]) -> [u8; 32] {
    let id = match_id.as_bytes();
    let mut h = Sha256::new();
    h.update((id.len() as u16).to_le_bytes());
    h.update(id);
    h.update(slot_id.to_le_bytes());
    h.update(seq.to_le_bytes());
    h.update(payload);
    h.finalize().into()
}

impl Envelope {
    /// Build and sign an envelope with the local identity.
    pub fn sign(
        identity: &Identity,
        match_id: &str,
        slot_id: u32,
        seq: u32,
        payload: Bytes,
    ) -> Result<Self> {
        if match_id.len() > u16::MAX as usize {
            return Err(RelayError::BadRequest("match id longer than u16::MAX".into()));
        }
        if payload.len() < FRAME_HEADER_LEN {
            return Err(RelayError::Malformed("payload shorter than frame header".into()));
        }
        let hash = signing_hash(match_id, slot_id, seq, &payload);
        Ok(Self {
            match_id: match_id.to_string(),
            slot_id,
            seq,
            signature: identity.sign(&hash),
            payload,
        })
    }

    pub fn signing_hash(&self) -> [u8; 32] {
        signing_hash(&self.match_id, self.slot_id, self.seq, &self.payload)
    }

    /// Check the signature against a roster-resolved address.
    pub fn verify(&self, address: &Address) -> bool {
        address.verify(&self.signing_hash(), &self.signature)
    }

    /// Decode the embedded gameplay frame, enforcing that its source slot
    /// equals the envelope slot.
    pub fn frame(&self) -> Result<GameFrame> {
        let frame = decode_game_frame(self.payload.clone())?;
        if frame.from != self.slot_id {
            return Err(RelayError::Forged(format!(
                "payload source slot {} != envelope slot {}",
                frame.from, self.slot_id
            )));
        }
        Ok(frame)
    }

    pub fn encoded_len(&self) -> usize {
        FIXED_PREFIX + self.match_id.len() + FIXED_SUFFIX + self.payload.len()
    }

    /// Wire form. Fails for hand-built envelopes whose match id does not fit
    /// the u16 length prefix.
    pub fn encode(&self) -> Result<Bytes> {
        let id = self.match_id.as_bytes();
        if id.len() > u16::MAX as usize {
            return Err(RelayError::BadRequest("match id longer than u16::MAX".into()));
        }
        let mut out = BytesMut::with_capacity(self.encoded_len());
        out.put_u8(ENVELOPE_VERSION);
        out.put_u16_le(id.len() as u16);
        out.put_slice(id);
        out.put_u32_le(self.slot_id);
        out.put_u32_le(self.seq);
        out.put_slice(&self.signature);
        out.put_slice(&self.payload);
        Ok(out.freeze())
    }
}

/// Decode an envelope from bytes. Fails closed on truncation, version
/// mismatch, overrunning match id, non-UTF-8 match id, or a payload too
/// short to carry a gameplay header.
pub fn decode_envelope(mut buf: Bytes) -> Result<Envelope> {
    if buf.remaining() < FIXED_PREFIX + FIXED_SUFFIX {
        return Err(RelayError::Malformed("envelope too short".into()));
    }

    let v = buf.get_u8();
    if v != ENVELOPE_VERSION {
        return Err(RelayError::UnsupportedVersion);
    }

    let id_len = buf.get_u16_le() as usize;
    if buf.remaining() < id_len + FIXED_SUFFIX {
        return Err(RelayError::Malformed("match id overruns envelope".into()));
    }
    let id_raw = buf.copy_to_bytes(id_len);
    let match_id = std::str::from_utf8(&id_raw)
        .map_err(|e| RelayError::Malformed(format!("match id not utf-8: {e}")))?
        .to_string();

    let slot_id = buf.get_u32_le();
    let seq = buf.get_u32_le();
    let mut signature = [0u8; SIGNATURE_LEN];
    buf.copy_to_slice(&mut signature);

    if buf.remaining() < FRAME_HEADER_LEN {
        return Err(RelayError::Malformed("payload shorter than frame header".into()));
    }
    let payload = buf.copy_to_bytes(buf.remaining());

    Ok(Envelope {
        match_id,
        slot_id,
        seq,
        signature,
        payload,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn frame(to: u32, from: u32) -> Bytes {
        GameFrame::new(to, from, Bytes::from_static(b"tic")).encode()
    }

    #[test]
    fn encode_then_decode_preserves_fields() {
        let id = Identity::from_secret_bytes([3u8; 32]);
        let env = Envelope::sign(&id, "doom-abc-1", 2, 41, frame(1, 2)).unwrap();
        let back = decode_envelope(env.encode().unwrap()).unwrap();
        assert_eq!(back, env);
        assert!(back.verify(id.address()));
    }

    #[test]
    fn tampered_payload_fails_verification() {
        let id = Identity::from_secret_bytes([3u8; 32]);
        let env = Envelope::sign(&id, "m", 2, 1, frame(1, 2)).unwrap();
        let mut raw = env.encode().unwrap().to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let back = decode_envelope(Bytes::from(raw)).unwrap();
        assert!(!back.verify(id.address()));
    }

    #[test]
    fn signature_from_other_key_is_rejected() {
        let signer = Identity::from_secret_bytes([3u8; 32]);
        let roster = Identity::from_secret_bytes([4u8; 32]);
        let env = Envelope::sign(&signer, "m", 2, 1, frame(1, 2)).unwrap();
        assert!(!env.verify(roster.address()));
    }

    #[test]
    fn source_slot_mismatch_is_forged() {
        let id = Identity::from_secret_bytes([3u8; 32]);
        let env = Envelope::sign(&id, "m", 2, 1, frame(1, 3)).unwrap();
        let err = env.frame().unwrap_err();
        assert_eq!(err.drop_code().as_str(), "FORGED");
    }

    #[test]
    fn overrunning_match_id_is_malformed() {
        let id = Identity::from_secret_bytes([3u8; 32]);
        let env = Envelope::sign(&id, "m", 2, 1, frame(1, 2)).unwrap();
        let mut raw = env.encode().unwrap().to_vec();
        raw[1] = 0xff;
        raw[2] = 0x7f;
        let err = decode_envelope(Bytes::from(raw)).unwrap_err();
        assert_eq!(err.drop_code().as_str(), "MALFORMED");
    }

    #[test]
    fn oversized_match_id_does_not_encode() {
        let id = Identity::from_secret_bytes([3u8; 32]);
        let mut env = Envelope::sign(&id, "m", 2, 1, frame(1, 2)).unwrap();
        env.match_id = "x".repeat(u16::MAX as usize + 1);
        let err = env.encode().unwrap_err();
        assert_eq!(err.drop_code().as_str(), "BAD_REQUEST");
    }

    #[test]
    fn wrong_version_is_rejected() {
        let id = Identity::from_secret_bytes([3u8; 32]);
        let env = Envelope::sign(&id, "m", 2, 1, frame(1, 2)).unwrap();
        let mut raw = env.encode().unwrap().to_vec();
        raw[0] = 2;
        let err = decode_envelope(Bytes::from(raw)).unwrap_err();
        assert_eq!(err.drop_code().as_str(), "UNSUPPORTED_VERSION");
    }
}
