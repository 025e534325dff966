//! Client circuit builder, relay node engine, and directory service for
//! the pq-ntor circuit protocol, built on the handshake/cell/onion
//! primitives in `pq_ntor_core`.

pub mod client;
pub mod config;
pub mod directory;
pub mod error;
pub mod node;
pub mod relay;

pub use error::{NetError, Result};
