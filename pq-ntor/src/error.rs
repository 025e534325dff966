//! Error taxonomy for the networked half of the protocol (spec §7), layered
//! on top of `pq_ntor_core::TorError` for the purely cryptographic kinds.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ProtocolViolation = 200,
    HandshakeFailed = 203,
    CircuitBuildFailed = 300,
    ExtensionFailed = 301,
    AuthVerificationFailed = 403,
    CryptoError = 500,
    DirectoryError = 600,
    ConnectionFailed = 100,
    ConnectionTimeout = 101,
    InternalError = 900,
}

#[derive(Error, Debug)]
pub enum NetError {
    /// Any handshake/cell/onion-layer failure from the core library.
    #[error(transparent)]
    Protocol(#[from] pq_ntor_core::TorError),

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    /// A receive deadline elapsed with no data delivered yet (spec §5,
    /// reference value 5s on the Guard fd during circuit build).
    #[error("operation timed out")]
    Timeout,

    #[error("directory error: {0}")]
    Directory(String),

    /// Next hop refused, timed out, or replied with the wrong sub-cell
    /// (spec §7 "Extension failure" — always a full circuit teardown).
    #[error("circuit extension failed: {0}")]
    ExtensionFailed(String),

    #[error("unexpected relay command: {0}")]
    UnexpectedCommand(String),
}

impl NetError {
    pub fn code(&self) -> ErrorCode {
        match self {
            NetError::Protocol(e) => match e.code() {
                pq_ntor_core::ErrorCode::ProtocolViolation => ErrorCode::ProtocolViolation,
                pq_ntor_core::ErrorCode::HandshakeFailed => ErrorCode::HandshakeFailed,
                pq_ntor_core::ErrorCode::AuthVerificationFailed => {
                    ErrorCode::AuthVerificationFailed
                }
                pq_ntor_core::ErrorCode::CryptoError => ErrorCode::CryptoError,
                pq_ntor_core::ErrorCode::KeyDerivationFailed => ErrorCode::CryptoError,
            },
            NetError::Io(_) => ErrorCode::ConnectionFailed,
            NetError::Timeout => ErrorCode::ConnectionTimeout,
            NetError::Directory(_) => ErrorCode::DirectoryError,
            NetError::ExtensionFailed(_) => ErrorCode::ExtensionFailed,
            NetError::UnexpectedCommand(_) => ErrorCode::ProtocolViolation,
        }
    }

    /// Whether this failure requires the *entire* circuit (not just one
    /// cell) to be torn down (spec §7).
    pub fn is_fatal(&self) -> bool {
        !matches!(self, NetError::Timeout)
    }
}

/// A timed-out or would-block read/write surfaces as `NetError::Timeout`
/// rather than a generic I/O error, so callers can apply spec §7's "partial
/// success after `established`" rule without matching on `io::ErrorKind`.
impl From<std::io::Error> for NetError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) {
            NetError::Timeout
        } else {
            NetError::Io(e)
        }
    }
}
