//! Error taxonomy for the handshake/cell/onion core.
//!
//! Mirrors the kinds in spec §7: most failures surface as a generic
//! `TorError` that the caller tears the circuit down over; AUTH mismatch
//! gets its own variant so callers can zeroize and report it distinctly
//! from a plain protocol error.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TorError>;

/// Error codes for programmatic handling, grouped the way the taxonomy in
/// spec §7 groups them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ProtocolViolation = 200,
    HandshakeFailed = 203,
    AuthVerificationFailed = 403,
    CryptoError = 500,
    KeyDerivationFailed = 501,
}

#[derive(Error, Debug, Clone)]
pub enum TorError {
    /// Malformed cell: short buffer, bad length field, unknown command.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// RNG refusal, KEM/DH/HKDF/HMAC primitive failure, decapsulation
    /// failure — spec §7's "RNG / primitive failure" and "Decapsulation
    /// failure" rows collapse into this single non-distinguished kind,
    /// since both just tear the circuit down.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// relay_id mismatch at the server half of a handshake.
    #[error("relay identity mismatch")]
    RelayIdentityMismatch,

    /// Handshake failed for a reason other than AUTH (bad transcript,
    /// peer refused, decapsulation failure surfaced through the
    /// handshake layer).
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// AUTH mismatch. Callers MUST zeroize all derived material before
    /// propagating this (spec §4.1 / invariant I5).
    #[error("authentication failed")]
    AuthFailed,
}

impl TorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TorError::Protocol(_) => ErrorCode::ProtocolViolation,
            TorError::Crypto(_) => ErrorCode::CryptoError,
            TorError::RelayIdentityMismatch => ErrorCode::HandshakeFailed,
            TorError::HandshakeFailed(_) => ErrorCode::HandshakeFailed,
            TorError::AuthFailed => ErrorCode::AuthVerificationFailed,
        }
    }

    /// Whether this failure implies derived key material must be
    /// zeroized before the error is propagated (spec §4.1, §7).
    pub fn requires_zeroize(&self) -> bool {
        matches!(
            self,
            TorError::AuthFailed | TorError::HandshakeFailed(_) | TorError::RelayIdentityMismatch
        )
    }
}
