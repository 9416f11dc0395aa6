//! Swarm topics: 32-byte digests, hex on the wire.

use std::fmt;

use sha2::{Digest, Sha256};

const MATCH_TAG: &str = "tracdoom-match:";
const BASE_TAG: &str = "tracdoom-base:";

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic([u8; 32]);

impl Topic {
    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    /// Parse exactly 64 hex chars (either case).
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 64 {
            return None;
        }
        let mut raw = [0u8; 32];
        hex::decode_to_slice(s, &mut raw).ok()?;
        Some(Self(raw))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `sha256("tracdoom-match:" + channel + ":" + match_id)`.
    pub fn for_match(channel: &str, match_id: &str) -> Self {
        let mut h = Sha256::new();
        h.update(MATCH_TAG.as_bytes());
        h.update(channel.as_bytes());
        h.update(b":");
        h.update(match_id.as_bytes());
        Self(h.finalize().into())
    }

    /// Deployment-wide topic every relay joins at startup.
    pub fn base(channel: &str) -> Self {
        let mut h = Sha256::new();
        h.update(BASE_TAG.as_bytes());
        h.update(channel.as_bytes());
        Self(h.finalize().into())
    }

    /// A supplied valid topic wins; anything else falls back to derivation.
    pub fn resolve(channel: &str, match_id: &str, supplied: Option<&str>) -> Self {
        supplied
            .and_then(Self::from_hex)
            .unwrap_or_else(|| Self::for_match(channel, match_id))
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "Topic({})", &self.to_hex()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_topic_is_deterministic_and_scoped() {
        let a = Topic::for_match("tracdoom", "doom-abc-1");
        assert_eq!(a, Topic::for_match("tracdoom", "doom-abc-1"));
        assert_ne!(a, Topic::for_match("tracdoom", "doom-abc-2"));
        assert_ne!(a, Topic::for_match("other", "doom-abc-1"));
        assert_ne!(a, Topic::base("tracdoom"));
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn supplied_topic_must_be_64_hex() {
        let derived = Topic::for_match("c", "g");
        let hex = "AB".repeat(32);
        assert_eq!(Topic::resolve("c", "g", Some(&hex)), Topic::from_bytes([0xab; 32]));
        assert_eq!(Topic::resolve("c", "g", Some("abcd")), derived);
        assert_eq!(Topic::resolve("c", "g", Some(&"zz".repeat(32))), derived);
        assert_eq!(Topic::resolve("c", "g", None), derived);
    }
}
