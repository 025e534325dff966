//! The NTOR handshake family (C2): Classic-NTOR, PQ-NTOR, Hybrid-NTOR.
//!
//! All three variants share the same public contract (spec §4.1): a
//! client produces an onionskin and holds state; a server, given the
//! onionskin and its own identity, produces a reply and finalizes state;
//! the client, given the reply, finalizes its own state. All three derive
//! an 80-byte `K_enc` and a 32-byte `K_auth`.
//!
//! Modeled as a tagged variant rather than a trait object hierarchy
//! (spec "Design Notes"): each submodule exposes three plain functions —
//! `client_create`, `server_handle`, `client_finish` — over the
//! variant-specific state below.

pub mod classic;
pub mod hybrid;
pub mod pq;

use crate::error::{Result, TorError};
use crate::primitives::{ct_eq, hmac_sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Key material produced by a successful handshake: 32-byte auth key and
/// 80-byte encryption-key bundle (`Kf|Kb|IVf|IVb`), per spec §4.1.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct HandshakeResult {
    pub k_auth: [u8; 32],
    pub k_enc: [u8; 80],
}

impl HandshakeResult {
    fn from_okm(okm: &[u8]) -> Self {
        debug_assert_eq!(okm.len(), 32 + 80);
        let mut k_auth = [0u8; 32];
        let mut k_enc = [0u8; 80];
        k_auth.copy_from_slice(&okm[..32]);
        k_enc.copy_from_slice(&okm[32..]);
        Self { k_auth, k_enc }
    }
}

/// `AUTH = HMAC-SHA256(K_auth, transcript || "server")`, used identically
/// by all three variants.
fn compute_auth(k_auth: &[u8; 32], transcript: &[u8]) -> [u8; 32] {
    let mut input = Vec::with_capacity(transcript.len() + 6);
    input.extend_from_slice(transcript);
    input.extend_from_slice(b"server");
    hmac_sha256(k_auth, &input)
}

/// Verify AUTH in constant time (spec §4.1 / invariant I6). On mismatch,
/// the caller's handshake state must still be zeroized by the caller —
/// this function only reports the verdict.
fn verify_auth(k_auth: &[u8; 32], transcript: &[u8], auth: &[u8; 32]) -> Result<()> {
    let expected = compute_auth(k_auth, transcript);
    if ct_eq(&expected, auth) {
        Ok(())
    } else {
        Err(TorError::AuthFailed)
    }
}
