//! PQ-NTOR (spec §4.1): standalone post-quantum handshake using Kyber-512.
//!
//! Onionskin (`|pk_Kyber|+20` bytes): `pk_c ‖ relay_id`.
//! Reply (`|ct|+32` bytes): `ct ‖ AUTH(32)`.

use super::{compute_auth, verify_auth, HandshakeResult};
use crate::error::{Result, TorError};
use crate::primitives::{
    hkdf_sha256, kyber512_decapsulate, kyber512_encapsulate, kyber512_keypair, KyberKeyPair,
    KyberPublicKey, KyberSecretKey, KYBER512_PUBLIC_KEY_BYTES,
};
use zeroize::Zeroize;

/// Client-side state held between `client_create` and `client_finish`.
pub struct ClientState {
    secret: KyberSecretKey,
    public: KyberPublicKey,
    relay_id: [u8; 20],
}

fn transcript(pk_c: &[u8], ct: &[u8], relay_id: &[u8; 20]) -> Vec<u8> {
    let mut t = Vec::with_capacity(pk_c.len() + ct.len() + 20);
    t.extend_from_slice(pk_c);
    t.extend_from_slice(ct);
    t.extend_from_slice(relay_id);
    t
}

pub fn client_create(relay_id: [u8; 20]) -> Result<(ClientState, Vec<u8>)> {
    let KyberKeyPair { public, secret } = kyber512_keypair()?;
    let mut onionskin = Vec::with_capacity(KYBER512_PUBLIC_KEY_BYTES + 20);
    onionskin.extend_from_slice(public.as_bytes());
    onionskin.extend_from_slice(&relay_id);
    Ok((
        ClientState {
            secret,
            public,
            relay_id,
        },
        onionskin,
    ))
}

/// Server half: verify `onionskin[|pk|..] == relay_id`, encapsulate
/// against `pk_c`, and derive keys bound to `info = transcript` (spec
/// §4.1's reference binding: the transcript is passed as HKDF `info`
/// rather than `salt`).
pub fn server_handle(our_relay_id: &[u8; 20], onionskin: &[u8]) -> Result<(Vec<u8>, HandshakeResult)> {
    if onionskin.len() != KYBER512_PUBLIC_KEY_BYTES + 20 {
        return Err(TorError::Protocol("pq-ntor onionskin: bad length".into()));
    }
    let pk_c_bytes = &onionskin[..KYBER512_PUBLIC_KEY_BYTES];
    let peer_relay_id = &onionskin[KYBER512_PUBLIC_KEY_BYTES..];
    if peer_relay_id != our_relay_id {
        return Err(TorError::RelayIdentityMismatch);
    }

    let pk_c = KyberPublicKey::from_bytes(pk_c_bytes)?;
    let (ct, k_kem) = kyber512_encapsulate(&pk_c)?;

    let t = transcript(pk_c_bytes, &ct, our_relay_id);
    let okm = hkdf_sha256(&[], &k_kem, &t, 32 + 80)?;
    let result = HandshakeResult::from_okm(&okm);

    let auth = compute_auth(&result.k_auth, &t);
    let mut reply = Vec::with_capacity(ct.len() + 32);
    reply.extend_from_slice(&ct);
    reply.extend_from_slice(&auth);

    Ok((reply, result))
}

pub fn client_finish(mut state: ClientState, reply: &[u8]) -> Result<HandshakeResult> {
    let outcome = client_finish_inner(&state, reply);
    state.secret.zeroize();
    outcome
}

fn client_finish_inner(state: &ClientState, reply: &[u8]) -> Result<HandshakeResult> {
    if reply.len() < 32 {
        return Err(TorError::Protocol("pq-ntor reply: bad length".into()));
    }
    let ct = &reply[..reply.len() - 32];
    let auth_bytes = &reply[reply.len() - 32..];
    let mut auth = [0u8; 32];
    auth.copy_from_slice(auth_bytes);

    let k_kem = kyber512_decapsulate(&state.secret, ct)
        .map_err(|_| TorError::HandshakeFailed("kyber decapsulation failed".into()))?;

    let t = transcript(state.public.as_bytes(), ct, &state.relay_id);
    let okm = hkdf_sha256(&[], &k_kem, &t, 32 + 80)?;
    let result = HandshakeResult::from_okm(&okm);

    verify_auth(&result.k_auth, &t, &auth)?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pq_ntor_matches_both_sides() {
        // Scenario A: PQ-NTOR single hop success.
        let relay_id = [0xABu8; 20];
        let (client_state, onionskin) = client_create(relay_id).unwrap();
        let (reply, server_result) = server_handle(&relay_id, &onionskin).unwrap();
        let client_result = client_finish(client_state, &reply).unwrap();

        assert_eq!(client_result.k_enc, server_result.k_enc);
        assert_eq!(client_result.k_enc.len(), 80);
    }

    #[test]
    fn tampered_reply_fails_auth_and_zeroizes() {
        let relay_id = [0x42u8; 20];
        let (client_state, onionskin) = client_create(relay_id).unwrap();
        let (mut reply, _) = server_handle(&relay_id, &onionskin).unwrap();
        *reply.last_mut().unwrap() ^= 0x01;

        let err = client_finish(client_state, &reply).unwrap_err();
        assert!(matches!(err, TorError::AuthFailed));
    }

    #[test]
    fn wrong_relay_id_is_rejected() {
        let (_client_state, onionskin) = client_create([1u8; 20]).unwrap();
        let err = server_handle(&[2u8; 20], &onionskin).unwrap_err();
        assert!(matches!(err, TorError::RelayIdentityMismatch));
    }
}
