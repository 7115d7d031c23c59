//! Cryptographic primitives shared across the vault: keyed hashing, AEAD
//! envelope encryption at rest, and X25519 key agreement.
//!
//! Algorithm choices are fixed by the wire format this crate serves:
//! HMAC-SHA256 for deterministic identifiers and token signatures,
//! AES-256-GCM for data encrypted at rest, X25519 for key agreement.
//! Rotating any of these requires a new wire version, not a config flag.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use once_cell::sync::OnceCell;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};

pub mod hash;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("server keys not initialized")]
    KeysNotInitialized,
    #[error("server keys already initialized")]
    KeysAlreadyInitialized,
    #[error("hmac key of invalid length")]
    HmacKey,
    #[error("aead encryption failed")]
    Encrypt,
    #[error("aead decryption failed: authentication failure or corrupt ciphertext")]
    Decrypt,
    #[error("invalid x25519 public key")]
    InvalidPublicKey,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("ciphertext too short to contain a nonce")]
    Truncated,
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// The two server-wide keys derived once at startup from `HASHING_SALT` and a
/// process secret: one for HMAC identifiers/signatures, one for AES-GCM
/// encryption at rest. Rotation is out of scope; see `init_server_keys`.
struct ServerKeys {
    hashing_key: [u8; 32],
    encryption_key: [u8; 32],
}

static SERVER_KEYS: OnceCell<ServerKeys> = OnceCell::new();

/// Derive an `n`-byte key from `secret` using HKDF-SHA256, with `salt` as
/// the HKDF salt and `info` as a domain-separation label. Deterministic:
/// the same `(secret, salt, info)` always yields the same output.
pub fn load_key(salt: &[u8], secret: &[u8], info: &[u8], n: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(Some(salt), secret);
    let mut okm = vec![0u8; n];
    hk.expand(info, &mut okm)
        .expect("HKDF output length must be <= 255 * hash length");
    okm
}

/// Derive and install the process-wide `HASHING_KEY` and AES encryption key
/// from `HASHING_SALT` and a process secret. Must be called exactly once at
/// startup before any other function in this module is used.
pub fn init_server_keys(salt: &[u8], secret: &[u8]) -> Result<()> {
    let hashing_key: [u8; 32] = load_key(salt, secret, b"vault.hashing-key.v1", 32)
        .try_into()
        .expect("load_key(n=32) always returns 32 bytes");
    let encryption_key: [u8; 32] = load_key(salt, secret, b"vault.encryption-key.v1", 32)
        .try_into()
        .expect("load_key(n=32) always returns 32 bytes");

    SERVER_KEYS
        .set(ServerKeys {
            hashing_key,
            encryption_key,
        })
        .map_err(|_| CryptoError::KeysAlreadyInitialized)
}

fn server_keys() -> Result<&'static ServerKeys> {
    SERVER_KEYS.get().ok_or(CryptoError::KeysNotInitialized)
}

pub fn hashing_key() -> Result<&'static [u8; 32]> {
    Ok(&server_keys()?.hashing_key)
}

fn encryption_key() -> Result<&'static [u8; 32]> {
    Ok(&server_keys()?.encryption_key)
}

/// HMAC-SHA256(key, msg).
pub fn hmac(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(msg);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256(key, msg), lowercase hex encoded.
pub fn hmac_hex(key: &[u8], msg: &[u8]) -> String {
    hex::encode(hmac(key, msg))
}

/// Constant-time comparison of a freshly computed HMAC against a hex-encoded
/// expected value. Never short-circuits on the first mismatched byte.
pub fn verify_hmac(key: &[u8], msg: &[u8], expected_hex: &str) -> bool {
    let computed = hmac_hex(key, msg);
    computed.as_bytes().ct_eq(expected_hex.as_bytes()).into()
}

/// Encrypt `plaintext` under the server's AES-256-GCM key with a fresh random
/// nonce, returning `base64(nonce || ciphertext || tag)`.
pub fn aes_gcm_encrypt(plaintext: &[u8]) -> Result<String> {
    let key = encryption_key()?;
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Encrypt)?;
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut out = Vec::with_capacity(12 + ct.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct);
    Ok(STANDARD.encode(out))
}

/// Inverse of `aes_gcm_encrypt`. Authentication failure and malformed input
/// both surface as `CryptoError::Decrypt` / `CryptoError::Truncated` — the
/// caller must not distinguish them to a client.
pub fn aes_gcm_decrypt(b64: &str) -> Result<Vec<u8>> {
    let key = encryption_key()?;
    let raw = STANDARD.decode(b64)?;
    if raw.len() < 12 {
        return Err(CryptoError::Truncated);
    }
    let (nonce_bytes, ct) = raw.split_at(12);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Decrypt)?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ct)
        .map_err(|_| CryptoError::Decrypt)
}

/// Encrypt `plaintext` under an arbitrary 32-byte key with a fresh nonce
/// prepended to the output. Used by the ratchet, which keys each message
/// individually rather than with the fixed server encryption key.
pub fn aead_encrypt_with_key(key: &[u8; 32], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Encrypt)?;
    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ct = cipher
        .encrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::Encrypt)?;
    let mut out = Vec::with_capacity(12 + ct.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Inverse of `aead_encrypt_with_key`.
pub fn aead_decrypt_with_key(key: &[u8; 32], blob: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < 12 {
        return Err(CryptoError::Truncated);
    }
    let (nonce_bytes, ct) = blob.split_at(12);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Decrypt)?;
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(
            nonce,
            aes_gcm::aead::Payload { msg: ct, aad },
        )
        .map_err(|_| CryptoError::Decrypt)
}

/// A raw X25519 keypair. `private` is kept as bytes (rather than
/// `StaticSecret`) so it can be serialized into the keystore and the
/// `Entity.publish_keypair` / `Entity.device_id_keypair` blobs.
#[derive(Clone)]
pub struct X25519Keypair {
    pub private: [u8; 32],
    pub public: [u8; 32],
}

pub fn x25519_keygen() -> X25519Keypair {
    let secret = StaticSecret::random_from_rng(rand::rngs::OsRng);
    let public = PublicKey::from(&secret);
    X25519Keypair {
        private: secret.to_bytes(),
        public: *public.as_bytes(),
    }
}

/// X25519(our_private, their_public) — the raw Diffie-Hellman output, not
/// yet passed through a KDF. Callers that need a key of a different shape
/// (e.g. the ratchet's root/chain keys) run this through HKDF themselves.
pub fn x25519_agree(our_private: &[u8; 32], their_public: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*our_private);
    let public = PublicKey::from(*their_public);
    *secret.diffie_hellman(&public).as_bytes()
}

/// A public key is valid on the wire if it base64-decodes to exactly 32
/// bytes and is not the all-zero key (which agrees to a known, attacker
/// predictable shared secret under X25519's clamping).
pub fn is_valid_x25519_public_key(b64: &str) -> bool {
    match STANDARD.decode(b64) {
        Ok(bytes) if bytes.len() == 32 => bytes.iter().any(|&b| b != 0),
        _ => false,
    }
}

pub fn decode_public_key(b64: &str) -> Result<[u8; 32]> {
    let bytes = STANDARD.decode(b64)?;
    bytes.try_into().map_err(|_| CryptoError::InvalidPublicKey)
}

pub fn encode_public_key(bytes: &[u8; 32]) -> String {
    STANDARD.encode(bytes)
}

pub fn b64_encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn b64_decode(s: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(s)?)
}

pub fn b64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn b64url_decode(s: &str) -> Result<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_test_keys() {
        let _ = init_server_keys(b"test-salt", b"test-process-secret");
    }

    #[test]
    fn hmac_is_deterministic() {
        let a = hmac_hex(b"key", b"+15551234567");
        let b = hmac_hex(b"key", b"+15551234567");
        assert_eq!(a, b);
    }

    #[test]
    fn hmac_changes_with_any_input_byte() {
        let base = hmac_hex(b"key", b"+15551234567");
        assert_ne!(base, hmac_hex(b"key2", b"+15551234567"));
        assert_ne!(base, hmac_hex(b"key", b"+15551234568"));
    }

    #[test]
    fn verify_hmac_rejects_tamper() {
        let msg = b"+15551234567";
        let good = hmac_hex(b"key", msg);
        assert!(verify_hmac(b"key", msg, &good));
        let mut tampered = good.clone();
        tampered.replace_range(0..1, if &tampered[0..1] == "a" { "b" } else { "a" });
        assert!(!verify_hmac(b"key", msg, &tampered));
    }

    #[test]
    fn aes_gcm_round_trips_and_nonce_is_fresh() {
        init_test_keys();
        let pt = b"account-token-material";
        let c1 = aes_gcm_encrypt(pt).unwrap();
        let c2 = aes_gcm_encrypt(pt).unwrap();
        assert_ne!(c1, c2, "fresh nonce must vary ciphertext");
        assert_eq!(aes_gcm_decrypt(&c1).unwrap(), pt);
        assert_eq!(aes_gcm_decrypt(&c2).unwrap(), pt);
    }

    #[test]
    fn aes_gcm_decrypt_rejects_tampered_ciphertext() {
        init_test_keys();
        let c = aes_gcm_encrypt(b"secret").unwrap();
        let mut raw = STANDARD.decode(&c).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = STANDARD.encode(raw);
        assert!(aes_gcm_decrypt(&tampered).is_err());
    }

    #[test]
    fn x25519_agreement_is_symmetric() {
        let a = x25519_keygen();
        let b = x25519_keygen();
        let shared_a = x25519_agree(&a.private, &b.public);
        let shared_b = x25519_agree(&b.private, &a.public);
        assert_eq!(shared_a, shared_b);
    }

    #[test]
    fn public_key_validation() {
        let kp = x25519_keygen();
        assert!(is_valid_x25519_public_key(&encode_public_key(&kp.public)));
        assert!(!is_valid_x25519_public_key(&encode_public_key(&[0u8; 32])));
        assert!(!is_valid_x25519_public_key("not-base64!!"));
        assert!(!is_valid_x25519_public_key(&STANDARD.encode([1u8; 16])));
    }
}
