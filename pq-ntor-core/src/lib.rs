//! Core protocol and crypto library for the pq-ntor anonymous circuit
//! protocol: the NTOR handshake family, the fixed/variable-length cell
//! codec, and onion (layered) crypto. Platform-agnostic — no sockets, no
//! threads, no I/O beyond `Read`/`Write` on cell framing.

pub mod cell;
pub mod error;
pub mod handshake;
pub mod onion;
pub mod primitives;

pub use error::{ErrorCode, Result, TorError};
