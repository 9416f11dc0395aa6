//! Shared error type across doommesh crates.

use thiserror::Error;

/// Stable drop/reject codes used as metric labels and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropCode {
    /// Truncated buffer, bad length prefix, short payload.
    Malformed,
    /// Envelope version byte does not match this protocol revision.
    UnsupportedVersion,
    /// Signature or embedded source slot does not match the roster.
    Forged,
    /// Roster unknown or inactive for the sender.
    Unauthorized,
    /// Sequence number not above the last accepted one.
    Replay,
    /// Sender's token bucket is empty.
    RateLimited,
    /// Ledger read/write failed.
    LedgerUnavailable,
    /// Peer or local socket failure.
    Transport,
    /// Invalid control message or request.
    BadRequest,
    /// Internal error.
    Internal,
}

impl DropCode {
    /// String representation used in metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            DropCode::Malformed => "MALFORMED",
            DropCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            DropCode::Forged => "FORGED",
            DropCode::Unauthorized => "UNAUTHORIZED",
            DropCode::Replay => "REPLAY",
            DropCode::RateLimited => "RATE_LIMITED",
            DropCode::LedgerUnavailable => "LEDGER_UNAVAILABLE",
            DropCode::Transport => "TRANSPORT",
            DropCode::BadRequest => "BAD_REQUEST",
            DropCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Unified error type used by core and relay.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("malformed: {0}")]
    Malformed(String),
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("forged: {0}")]
    Forged(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("replayed sequence")]
    Replay,
    #[error("rate limited")]
    RateLimited,
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("transport: {0}")]
    Transport(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl RelayError {
    /// Map an error to its stable drop code.
    pub fn drop_code(&self) -> DropCode {
        match self {
            RelayError::Malformed(_) => DropCode::Malformed,
            RelayError::UnsupportedVersion => DropCode::UnsupportedVersion,
            RelayError::Forged(_) => DropCode::Forged,
            RelayError::Unauthorized => DropCode::Unauthorized,
            RelayError::Replay => DropCode::Replay,
            RelayError::RateLimited => DropCode::RateLimited,
            RelayError::LedgerUnavailable(_) => DropCode::LedgerUnavailable,
            RelayError::Transport(_) => DropCode::Transport,
            RelayError::BadRequest(_) => DropCode::BadRequest,
            RelayError::Internal(_) => DropCode::Internal,
        }
    }
}
