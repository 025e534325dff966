//! Primitives façade (C1).
//!
//! A uniform, small API over the primitives the handshake family and the
//! onion layer need: Kyber-512 KEM, X25519, HMAC-SHA256, HKDF-SHA256,
//! AES-256-CTR, SHA-256, a secure RNG, constant-time compare, and
//! zeroization. Nothing above this module should reach for `sha2`, `aes`,
//! `ml_kem`, etc. directly.

use crate::error::{Result, TorError};
use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use ml_kem::{kem::Decapsulate, kem::Encapsulate, Ciphertext, Encoded, EncodedSizeUser, KemCore, MlKem512};
use rand_core::{CryptoRngCore, OsRng as CoreOsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256Ctr = Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

// ---------------------------------------------------------------------
// X25519
// ---------------------------------------------------------------------

/// Generate an ephemeral X25519 keypair.
pub fn x25519_keypair() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(CoreOsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

pub fn x25519_dh(secret: &StaticSecret, peer_public: &PublicKey) -> [u8; 32] {
    secret.diffie_hellman(peer_public).to_bytes()
}

// ---------------------------------------------------------------------
// Kyber-512 (ML-KEM-512, the standardized form of Kyber-512)
// ---------------------------------------------------------------------

pub const KYBER512_PUBLIC_KEY_BYTES: usize = 800;
pub const KYBER512_SECRET_KEY_BYTES: usize = 1632;
pub const KYBER512_CIPHERTEXT_BYTES: usize = 768;
pub const KYBER512_SHARED_SECRET_BYTES: usize = 32;

#[derive(Clone, PartialEq, Eq)]
pub struct KyberPublicKey(Vec<u8>);

impl KyberPublicKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KYBER512_PUBLIC_KEY_BYTES {
            return Err(TorError::Crypto(format!(
                "kyber public key: expected {} bytes, got {}",
                KYBER512_PUBLIC_KEY_BYTES,
                bytes.len()
            )));
        }
        Ok(Self(bytes.to_vec()))
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KyberSecretKey(Vec<u8>);

pub struct KyberKeyPair {
    pub public: KyberPublicKey,
    pub secret: KyberSecretKey,
}

/// Generate a fresh Kyber-512 keypair.
pub fn kyber512_keypair() -> Result<KyberKeyPair> {
    let (dk, ek) = MlKem512::generate(&mut CoreOsRng);
    Ok(KyberKeyPair {
        public: KyberPublicKey(ek.as_bytes().as_slice().to_vec()),
        secret: KyberSecretKey(dk.as_bytes().as_slice().to_vec()),
    })
}

/// Encapsulate a shared secret against a Kyber-512 public key.
///
/// Returns `(ciphertext, shared_secret)`.
pub fn kyber512_encapsulate(public: &KyberPublicKey) -> Result<(Vec<u8>, [u8; 32])> {
    type EkEncoded = Encoded<<MlKem512 as KemCore>::EncapsulationKey>;
    let encoded = EkEncoded::try_from(public.as_bytes())
        .map_err(|_| TorError::Crypto("malformed kyber public key".into()))?;
    let ek = <MlKem512 as KemCore>::EncapsulationKey::from_bytes(&encoded);

    let (ct, ss) = ek
        .encapsulate(&mut CoreOsRng)
        .map_err(|_| TorError::Crypto("kyber encapsulation failed".into()))?;

    let mut shared = [0u8; 32];
    shared.copy_from_slice(ss.as_slice());
    Ok((ct.as_slice().to_vec(), shared))
}

/// Decapsulate a Kyber-512 ciphertext with our secret key.
pub fn kyber512_decapsulate(secret: &KyberSecretKey, ciphertext: &[u8]) -> Result<[u8; 32]> {
    type DkEncoded = Encoded<<MlKem512 as KemCore>::DecapsulationKey>;
    let dk_encoded = DkEncoded::try_from(secret.0.as_slice())
        .map_err(|_| TorError::Crypto("malformed kyber secret key".into()))?;
    let dk = <MlKem512 as KemCore>::DecapsulationKey::from_bytes(&dk_encoded);

    let ct_encoded = Ciphertext::<MlKem512>::try_from(ciphertext)
        .map_err(|_| TorError::Crypto("malformed kyber ciphertext".into()))?;

    let ss = dk
        .decapsulate(&ct_encoded)
        .map_err(|_| TorError::Crypto("kyber decapsulation failed".into()))?;

    let mut shared = [0u8; 32];
    shared.copy_from_slice(ss.as_slice());
    Ok(shared)
}

// ---------------------------------------------------------------------
// Hashing / MAC / KDF
// ---------------------------------------------------------------------

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HKDF-SHA256 extract-then-expand, or expand-only when `salt` is empty
/// and `ikm` is already a PRK (used by PQ-NTOR per spec §4.1, which binds
/// the transcript as HKDF `info` rather than `salt`).
pub fn hkdf_sha256(salt: &[u8], ikm: &[u8], info: &[u8], out_len: usize) -> Result<Vec<u8>> {
    let hk = Hkdf::<Sha256>::new(if salt.is_empty() { None } else { Some(salt) }, ikm);
    let mut okm = vec![0u8; out_len];
    hk.expand(info, &mut okm)
        .map_err(|_| TorError::Crypto("HKDF expand failed: output too long".into()))?;
    Ok(okm)
}

// ---------------------------------------------------------------------
// AES-256-CTR
// ---------------------------------------------------------------------

/// XOR `data` in place with the AES-256-CTR keystream for (`key`, `iv`).
/// CTR mode is self-inverse: the same call encrypts or decrypts.
pub fn aes256_ctr_apply(key: &[u8; 32], iv: &[u8; 16], data: &mut [u8]) {
    let mut cipher = Aes256Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(data);
}

// ---------------------------------------------------------------------
// RNG / constant-time compare
// ---------------------------------------------------------------------

pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    CoreOsRng
        .try_fill_bytes(buf)
        .map_err(|e| TorError::Crypto(format!("RNG failure: {e}")))
}

/// Constant-time equality, required for AUTH verification (spec §4.1 /
/// invariant I6). Never use `==` on secret-derived bytes instead of this.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_ctr_round_trip() {
        let key = [7u8; 32];
        let iv = [0u8; 16];
        let mut data = b"the quick brown fox".to_vec();
        let original = data.clone();
        aes256_ctr_apply(&key, &iv, &mut data);
        assert_ne!(data, original);
        aes256_ctr_apply(&key, &iv, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn hkdf_is_deterministic() {
        let a = hkdf_sha256(b"salt", b"ikm", b"info", 48).unwrap();
        let b = hkdf_sha256(b"salt", b"ikm", b"info", 48).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn kyber_round_trip() {
        let kp = kyber512_keypair().unwrap();
        let (ct, ss_enc) = kyber512_encapsulate(&kp.public).unwrap();
        let ss_dec = kyber512_decapsulate(&kp.secret, &ct).unwrap();
        assert_eq!(ss_enc, ss_dec);
    }

    #[test]
    fn ct_eq_detects_any_bit_flip() {
        let a = [0x42u8; 32];
        let mut b = a;
        assert!(ct_eq(&a, &b));
        b[17] ^= 0x01;
        assert!(!ct_eq(&a, &b));
    }
}
