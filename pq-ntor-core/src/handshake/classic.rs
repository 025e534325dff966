//! Classic-NTOR (spec §4.1): reference/baseline X25519-only handshake.
//!
//! Onionskin (52B): `X25519_pk_c ‖ relay_id`.
//! Reply (64B): `X25519_pk_s ‖ AUTH(32)`.

use super::{compute_auth, verify_auth, HandshakeResult};
use crate::error::{Result, TorError};
use crate::primitives::{hkdf_sha256, x25519_dh, x25519_keypair};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

const INFO: &[u8] = b"classic-ntor-keys";

/// Client-side state held between `client_create` and `client_finish`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ClientState {
    #[zeroize(skip)]
    client_secret: StaticSecret,
    #[zeroize(skip)]
    client_public: PublicKey,
    relay_id: [u8; 20],
}

fn transcript(pk_c: &PublicKey, relay_id: &[u8; 20], pk_s: &PublicKey) -> Vec<u8> {
    let mut t = Vec::with_capacity(32 + 20 + 32);
    t.extend_from_slice(pk_c.as_bytes());
    t.extend_from_slice(relay_id);
    t.extend_from_slice(pk_s.as_bytes());
    t
}

/// Produce the 52-byte onionskin and hold client state for `client_finish`.
pub fn client_create(relay_id: [u8; 20]) -> (ClientState, Vec<u8>) {
    let (client_secret, client_public) = x25519_keypair();
    let mut onionskin = Vec::with_capacity(52);
    onionskin.extend_from_slice(client_public.as_bytes());
    onionskin.extend_from_slice(&relay_id);
    (
        ClientState {
            client_secret,
            client_public,
            relay_id,
        },
        onionskin,
    )
}

/// Server half: given our own identity and the onionskin, produce the
/// 64-byte reply and our own derived key material.
pub fn server_handle(
    our_relay_id: &[u8; 20],
    our_secret: &StaticSecret,
    our_public: &PublicKey,
    onionskin: &[u8],
) -> Result<(Vec<u8>, HandshakeResult)> {
    if onionskin.len() != 52 {
        return Err(TorError::Protocol("classic-ntor onionskin: bad length".into()));
    }
    let mut pk_c_bytes = [0u8; 32];
    pk_c_bytes.copy_from_slice(&onionskin[..32]);
    let pk_c = PublicKey::from(pk_c_bytes);

    let peer_relay_id = &onionskin[32..52];
    if peer_relay_id != our_relay_id {
        return Err(TorError::RelayIdentityMismatch);
    }

    let shared = x25519_dh(our_secret, &pk_c);
    let t = transcript(&pk_c, our_relay_id, our_public);
    let okm = hkdf_sha256(&t, &shared, INFO, 32 + 80)?;
    let result = HandshakeResult::from_okm(&okm);

    let auth = compute_auth(&result.k_auth, &t);
    let mut reply = Vec::with_capacity(64);
    reply.extend_from_slice(our_public.as_bytes());
    reply.extend_from_slice(&auth);

    Ok((reply, result))
}

/// Client half: given the 64-byte reply, verify AUTH and derive the same
/// key material the server holds.
pub fn client_finish(mut state: ClientState, reply: &[u8]) -> Result<HandshakeResult> {
    let outcome = client_finish_inner(&state, reply);
    state.zeroize();
    outcome
}

fn client_finish_inner(state: &ClientState, reply: &[u8]) -> Result<HandshakeResult> {
    if reply.len() != 64 {
        return Err(TorError::Protocol("classic-ntor reply: bad length".into()));
    }
    let mut pk_s_bytes = [0u8; 32];
    pk_s_bytes.copy_from_slice(&reply[..32]);
    let pk_s = PublicKey::from(pk_s_bytes);
    let mut auth = [0u8; 32];
    auth.copy_from_slice(&reply[32..64]);

    let shared = x25519_dh(&state.client_secret, &pk_s);
    let t = transcript(&state.client_public, &state.relay_id, &pk_s);
    let okm = hkdf_sha256(&t, &shared, INFO, 32 + 80)?;
    let result = HandshakeResult::from_okm(&okm);

    verify_auth(&result.k_auth, &t, &auth)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_ntor_matches_both_sides() {
        let relay_id = [0xABu8; 20];
        let (server_secret, server_public) = x25519_keypair();

        let (client_state, onionskin) = client_create(relay_id);
        let (reply, server_result) =
            server_handle(&relay_id, &server_secret, &server_public, &onionskin).unwrap();
        let client_result = client_finish(client_state, &reply).unwrap();

        assert_eq!(client_result.k_enc, server_result.k_enc);
        assert_eq!(client_result.k_auth, server_result.k_auth);
        assert_eq!(client_result.k_enc.len(), 80);
    }

    #[test]
    fn tampered_reply_fails_auth() {
        let relay_id = [0x42u8; 20];
        let (server_secret, server_public) = x25519_keypair();
        let (client_state, onionskin) = client_create(relay_id);
        let (mut reply, _) =
            server_handle(&relay_id, &server_secret, &server_public, &onionskin).unwrap();
        *reply.last_mut().unwrap() ^= 0x01;

        let err = client_finish(client_state, &reply).unwrap_err();
        assert!(matches!(err, TorError::AuthFailed));
    }

    #[test]
    fn wrong_relay_id_is_rejected() {
        let (server_secret, server_public) = x25519_keypair();
        let (_client_state, onionskin) = client_create([1u8; 20]);
        let err = server_handle(&[2u8; 20], &server_secret, &server_public, &onionskin)
            .unwrap_err();
        assert!(matches!(err, TorError::RelayIdentityMismatch));
    }
}
