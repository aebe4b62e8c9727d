//! Cryptographic primitives (C1): ECDSA P-256 identity keys, ECDH ephemeral
//! key agreement, HKDF, AES-256-GCM, SHA-256.
//!
//! Grounded on the teacher's `security.rs` `KeyStore` (identity persistence,
//! fingerprinting) but built on the RustCrypto stack (`p256`, `hkdf`,
//! `aes-gcm`, `zeroize`) instead of `rcgen`/`rustls` self-signed
//! certificates, because spec.md prescribes these specific primitives and a
//! bespoke handshake rather than TLS. See DESIGN.md.
use crate::error::{Result, SwarmError};
use aes_gcm::aead::{Aead, KeyInit, OsRng as AeadOsRng, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::PublicKey;
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// HKDF `info` literal binding session keys to this protocol.
const SESSION_INFO: &[u8] = b"SWARM-SESSION";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// A long-lived device identity keypair (ECDSA P-256).
pub struct Identity {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl Identity {
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct an identity from a raw scalar (32 bytes), as loaded from
    /// encrypted/permission-protected disk storage.
    pub fn from_scalar_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|e| SwarmError::Crypto(format!("invalid identity key bytes: {e}")))?;
        let verifying_key = VerifyingKey::from(&signing_key);
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    pub fn to_scalar_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    pub fn public_key_der(&self) -> Vec<u8> {
        self.verifying_key
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    pub fn sign(&self, bytes: &[u8]) -> Vec<u8> {
        let sig: Signature = self.signing_key.sign(bytes);
        sig.to_der().as_bytes().to_vec()
    }

    /// SHA-256 of the public key, the stable device identifier when displayed.
    pub fn device_fingerprint(&self) -> String {
        fingerprint_of_public_key(&self.public_key_der())
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        // SigningKey zeroizes its inner scalar on drop (elliptic-curve's
        // `SecretKey`/`NonZeroScalar` carry the `zeroize` feature); nothing
        // else in this struct holds sensitive bytes.
    }
}

pub fn fingerprint_of_public_key(public_key_der: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_key_der);
    format!("{:x}", hasher.finalize())
}

/// Verify `signature` (DER-encoded) over `bytes` against a raw SEC1 public key.
pub fn verify(public_key_der: &[u8], bytes: &[u8], signature: &[u8]) -> Result<bool> {
    let verifying_key = VerifyingKey::from_sec1_bytes(public_key_der)
        .map_err(|e| SwarmError::Crypto(format!("invalid public key: {e}")))?;
    let sig = Signature::from_der(signature)
        .map_err(|e| SwarmError::Crypto(format!("invalid signature encoding: {e}")))?;
    Ok(verifying_key.verify(bytes, &sig).is_ok())
}

/// A fresh ephemeral ECDH keypair for one handshake.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    pub public_bytes: Vec<u8>,
}

impl EphemeralKeypair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        let public_bytes = public.to_encoded_point(false).as_bytes().to_vec();
        Self {
            secret,
            public_bytes,
        }
    }

    /// Derive the 32-byte AES-256 session key from ECDH shared secret + HKDF-SHA256.
    pub fn derive_session_key(&self, their_public_bytes: &[u8]) -> Result<[u8; 32]> {
        let their_public = PublicKey::from_sec1_bytes(their_public_bytes)
            .map_err(|e| SwarmError::Crypto(format!("invalid peer ephemeral key: {e}")))?;
        let shared = self.secret.diffie_hellman(&their_public);
        let hk = Hkdf::<Sha256>::new(None, shared.raw_secret_bytes().as_slice());
        let mut key = [0u8; 32];
        hk.expand(SESSION_INFO, &mut key)
            .map_err(|e| SwarmError::Crypto(format!("HKDF expand failed: {e}")))?;
        Ok(key)
    }
}

/// AEAD-seal `plaintext` under `key`, returning `nonce(12) || ciphertext || tag(16)`.
/// Nonces are 96-bit cryptographically random and never reused under a given key.
pub fn aead_encrypt(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SwarmError::Crypto(format!("bad AES key: {e}")))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    AeadOsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, Payload::from(plaintext))
        .map_err(|_| SwarmError::Crypto("AEAD encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`aead_encrypt`]. Any single-bit corruption of `blob` causes
/// this to fail (AEAD integrity failure, §7 kind 4) — the caller must
/// discard the record, never half-apply it.
pub fn aead_decrypt(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(SwarmError::AeadIntegrity);
    }
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| SwarmError::Crypto(format!("bad AES key: {e}")))?;
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, Payload::from(ciphertext))
        .map_err(|_| SwarmError::AeadIntegrity)
}

/// Streaming SHA-256 of an in-memory buffer (used by the delta engine for
/// per-block strong checksums; file-level hashing lives in `hasher.rs`).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Zeroizing wrapper for a session key held past its derivation site.
pub struct SessionKey(pub [u8; 32]);

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() {
        let id = Identity::generate();
        let msg = b"device-id\x00ephemeral-pub";
        let sig = id.sign(msg);
        assert!(verify(&id.public_key_der(), msg, &sig).unwrap());
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let id = Identity::generate();
        let sig = id.sign(b"hello");
        assert!(!verify(&id.public_key_der(), b"hellp", &sig).unwrap());
    }

    #[test]
    fn ecdh_session_keys_match_on_both_sides() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();
        let ka = a.derive_session_key(&b.public_bytes).unwrap();
        let kb = b.derive_session_key(&a.public_bytes).unwrap();
        assert_eq!(ka, kb);
    }

    #[test]
    fn aead_round_trip() {
        let key = [7u8; 32];
        let blob = aead_encrypt(&key, b"sync message payload").unwrap();
        let back = aead_decrypt(&key, &blob).unwrap();
        assert_eq!(back, b"sync message payload");
    }

    #[test]
    fn aead_bit_flip_fails_decrypt() {
        let key = [9u8; 32];
        let mut blob = aead_encrypt(&key, b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(aead_decrypt(&key, &blob).is_err());
    }

    #[test]
    fn nonces_are_not_reused_across_calls() {
        let key = [3u8; 32];
        let a = aead_encrypt(&key, b"x").unwrap();
        let b = aead_encrypt(&key, b"x").unwrap();
        assert_ne!(&a[..12], &b[..12]);
    }
}
