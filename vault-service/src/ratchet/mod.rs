//! Double-Ratchet-style forward-secret channel for the `publish` key pair.
//!
//! Follows the standard Double Ratchet shape: a root key that advances on
//! each DH step, independent send/receive chain keys that advance per
//! message, and a bounded cache of skipped message keys so out-of-order
//! delivery doesn't stall the chain. The one departure from a textbook
//! Signal session is bootstrapping: there is no X3DH handshake here, so the
//! very first message in either direction is keyed directly off the static
//! `publish` X25519 agreement rather than off a freshly-negotiated prekey
//! bundle (see `bootstrap_sending_chain`).

use std::collections::VecDeque;

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::VaultError;

const MAX_SKIP: usize = 1000;
const HEADER_LEN: usize = 32 + 4 + 4;
const STATE_FORMAT_VERSION: u8 = 1;

/// The per-message header: the sender's current ratchet public key, the
/// length of the sender's previous sending chain (`PN`), and the message
/// index within the current chain (`N`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub dh_pub: [u8; 32],
    pub pn: u32,
    pub n: u32,
}

impl Header {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..32].copy_from_slice(&self.dh_pub);
        buf[32..36].copy_from_slice(&self.pn.to_be_bytes());
        buf[36..40].copy_from_slice(&self.n.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> Result<Self, VaultError> {
        if buf.len() != HEADER_LEN {
            return Err(VaultError::InvalidPayloadFraming(format!(
                "header must be {HEADER_LEN} bytes, found {}",
                buf.len()
            )));
        }
        let mut dh_pub = [0u8; 32];
        dh_pub.copy_from_slice(&buf[0..32]);
        let pn = u32::from_be_bytes(buf[32..36].try_into().unwrap());
        let n = u32::from_be_bytes(buf[36..40].try_into().unwrap());
        Ok(Header { dh_pub, pn, n })
    }
}

struct SkippedKey {
    dh_pub: [u8; 32],
    n: u32,
    message_key: [u8; 32],
}

/// The Double Ratchet state for one entity's publish channel.
pub struct RatchetState {
    dhs_private: [u8; 32],
    dhs_public: [u8; 32],
    dhr: Option<[u8; 32]>,
    rk: [u8; 32],
    cks: Option<[u8; 32]>,
    ckr: Option<[u8; 32]>,
    ns: u32,
    nr: u32,
    pn: u32,
    skipped: VecDeque<SkippedKey>,
}

impl RatchetState {
    /// Seed a state from the static `publish` X25519 agreement and this
    /// side's own publish keypair, used when no prior message (in either
    /// direction) has established a ratchet for this entity yet. Both the
    /// sending and receiving bootstrap go through this same constructor —
    /// the two converge because `shared_key` is the same value on both
    /// sides and the first real DH ratchet step (always triggered by the
    /// first header, since `dhr` starts `None`) mixes in the per-side
    /// keypairs symmetrically.
    pub fn init(shared_key: [u8; 32], own_private: [u8; 32], own_public: [u8; 32]) -> Self {
        Self {
            dhs_private: own_private,
            dhs_public: own_public,
            dhr: None,
            rk: shared_key,
            cks: None,
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: VecDeque::new(),
        }
    }

    /// Encrypt `plaintext`, advancing the sending chain. `static_peer_pub`
    /// is the entity's long-term publish public key on file; it is only
    /// consulted the first time this state ever sends (when no chain key
    /// has been established by an inbound message), to bootstrap one.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        static_peer_pub: [u8; 32],
    ) -> Result<(Header, Vec<u8>), VaultError> {
        if self.cks.is_none() {
            let target = self.dhr.unwrap_or(static_peer_pub);
            self.bootstrap_sending_chain(target);
        }

        let cks = self.cks.expect("bootstrapped above if absent");
        let (next_cks, message_key) = kdf_chain(&cks);
        self.cks = Some(next_cks);

        let header = Header {
            dh_pub: self.dhs_public,
            pn: self.pn,
            n: self.ns,
        };
        self.ns += 1;

        let ciphertext =
            crypto_core::aead_encrypt_with_key(&message_key, plaintext, &header.to_bytes())?;
        Ok((header, ciphertext))
    }

    /// Decrypt a message framed by `header`/`ciphertext`, advancing (or
    /// DH-ratcheting) the receiving chain as needed.
    pub fn decrypt(&mut self, header: Header, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
        if let Some(message_key) = self.take_skipped(header.dh_pub, header.n) {
            return decrypt_with_key(&message_key, header, ciphertext);
        }

        if self.dhr != Some(header.dh_pub) {
            let old_dhr = self.dhr.unwrap_or(header.dh_pub);
            self.skip_message_keys(header.pn, old_dhr)?;
            self.dh_ratchet(header.dh_pub);
        }

        self.skip_message_keys(header.n, header.dh_pub)?;

        let ckr = self.ckr.ok_or(VaultError::PayloadDecryptFailed)?;
        let (next_ckr, message_key) = kdf_chain(&ckr);
        self.ckr = Some(next_ckr);
        self.nr += 1;

        decrypt_with_key(&message_key, header, ciphertext)
    }

    fn bootstrap_sending_chain(&mut self, peer_pub: [u8; 32]) {
        let bootstrap = crypto_core::x25519_keygen();
        let dh_out = crypto_core::x25519_agree(&bootstrap.private, &peer_pub);
        let (next_rk, cks) = kdf_root(&self.rk, &dh_out);
        self.dhs_private = bootstrap.private;
        self.dhs_public = bootstrap.public;
        self.rk = next_rk;
        self.cks = Some(cks);
    }

    fn dh_ratchet(&mut self, their_new_dh_pub: [u8; 32]) {
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;
        self.dhr = Some(their_new_dh_pub);

        let dh_out = crypto_core::x25519_agree(&self.dhs_private, &their_new_dh_pub);
        let (rk_after_recv, ckr) = kdf_root(&self.rk, &dh_out);
        self.rk = rk_after_recv;
        self.ckr = Some(ckr);

        let new_dhs = crypto_core::x25519_keygen();
        self.dhs_private = new_dhs.private;
        self.dhs_public = new_dhs.public;
        let dh_out = crypto_core::x25519_agree(&self.dhs_private, &their_new_dh_pub);
        let (rk_after_send, cks) = kdf_root(&self.rk, &dh_out);
        self.rk = rk_after_send;
        self.cks = Some(cks);
    }

    /// Advance the receiving chain keyed by `dh_pub` from `self.nr` up to
    /// (not including) `until`, caching each skipped message key. A single
    /// call skipping more than `MAX_SKIP` messages is rejected outright —
    /// that many undelivered messages points at something worse than
    /// reordering.
    fn skip_message_keys(&mut self, until: u32, dh_pub: [u8; 32]) -> Result<(), VaultError> {
        let Some(mut ckr) = self.ckr else {
            return Ok(());
        };
        if (until.saturating_sub(self.nr) as usize) > MAX_SKIP {
            return Err(VaultError::PayloadDecryptFailed);
        }
        while self.nr < until {
            let (next_ckr, message_key) = kdf_chain(&ckr);
            ckr = next_ckr;
            self.skipped.push_back(SkippedKey {
                dh_pub,
                n: self.nr,
                message_key,
            });
            if self.skipped.len() > MAX_SKIP {
                self.skipped.pop_front();
            }
            self.nr += 1;
        }
        self.ckr = Some(ckr);
        Ok(())
    }

    fn take_skipped(&mut self, dh_pub: [u8; 32], n: u32) -> Option<[u8; 32]> {
        let index = self
            .skipped
            .iter()
            .position(|entry| entry.dh_pub == dh_pub && entry.n == n)?;
        self.skipped.remove(index).map(|entry| entry.message_key)
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(STATE_FORMAT_VERSION);
        buf.extend_from_slice(&self.dhs_private);
        buf.extend_from_slice(&self.dhs_public);
        write_opt32(&mut buf, self.dhr);
        buf.extend_from_slice(&self.rk);
        write_opt32(&mut buf, self.cks);
        write_opt32(&mut buf, self.ckr);
        buf.extend_from_slice(&self.ns.to_be_bytes());
        buf.extend_from_slice(&self.nr.to_be_bytes());
        buf.extend_from_slice(&self.pn.to_be_bytes());
        buf.extend_from_slice(&(self.skipped.len() as u32).to_be_bytes());
        for entry in &self.skipped {
            buf.extend_from_slice(&entry.dh_pub);
            buf.extend_from_slice(&entry.n.to_be_bytes());
            buf.extend_from_slice(&entry.message_key);
        }
        buf
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self, VaultError> {
        let mut cursor = Cursor::new(buf);
        let version = cursor.byte()?;
        if version != STATE_FORMAT_VERSION {
            return Err(VaultError::Internal(format!(
                "unsupported ratchet state format version {version}"
            )));
        }
        let dhs_private = cursor.array32()?;
        let dhs_public = cursor.array32()?;
        let dhr = cursor.opt_array32()?;
        let rk = cursor.array32()?;
        let cks = cursor.opt_array32()?;
        let ckr = cursor.opt_array32()?;
        let ns = cursor.u32()?;
        let nr = cursor.u32()?;
        let pn = cursor.u32()?;
        let skipped_len = cursor.u32()? as usize;
        let mut skipped = VecDeque::with_capacity(skipped_len.min(MAX_SKIP));
        for _ in 0..skipped_len {
            let dh_pub = cursor.array32()?;
            let n = cursor.u32()?;
            let message_key = cursor.array32()?;
            skipped.push_back(SkippedKey { dh_pub, n, message_key });
        }
        Ok(Self {
            dhs_private,
            dhs_public,
            dhr,
            rk,
            cks,
            ckr,
            ns,
            nr,
            pn,
            skipped,
        })
    }
}

fn write_opt32(buf: &mut Vec<u8>, value: Option<[u8; 32]>) {
    match value {
        Some(bytes) => {
            buf.push(1);
            buf.extend_from_slice(&bytes);
        }
        None => buf.push(0),
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], VaultError> {
        let end = self.pos + n;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| VaultError::Internal("corrupt ratchet state: truncated".to_string()))?;
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8, VaultError> {
        Ok(self.take(1)?[0])
    }

    fn array32(&mut self) -> Result<[u8; 32], VaultError> {
        let mut out = [0u8; 32];
        out.copy_from_slice(self.take(32)?);
        Ok(out)
    }

    fn opt_array32(&mut self) -> Result<Option<[u8; 32]>, VaultError> {
        if self.byte()? == 1 {
            Ok(Some(self.array32()?))
        } else {
            Ok(None)
        }
    }

    fn u32(&mut self) -> Result<u32, VaultError> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(out))
    }
}

fn decrypt_with_key(key: &[u8; 32], header: Header, ciphertext: &[u8]) -> Result<Vec<u8>, VaultError> {
    crypto_core::aead_decrypt_with_key(key, ciphertext, &header.to_bytes())
        .map_err(|_| VaultError::PayloadDecryptFailed)
}

/// `KDF_RK`: mix a DH output into the root key, producing the next root key
/// and a fresh chain key.
fn kdf_root(rk: &[u8; 32], dh_out: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let hk = Hkdf::<Sha256>::new(Some(rk), dh_out);
    let mut okm = [0u8; 64];
    hk.expand(b"vault.ratchet.root.v1", &mut okm)
        .expect("64 bytes is a valid HKDF-SHA256 output length");
    let mut next_rk = [0u8; 32];
    let mut chain_key = [0u8; 32];
    next_rk.copy_from_slice(&okm[0..32]);
    chain_key.copy_from_slice(&okm[32..64]);
    (next_rk, chain_key)
}

/// `KDF_CK`: advance a chain key one step, producing the next chain key and
/// the message key for the step just consumed.
fn kdf_chain(ck: &[u8; 32]) -> ([u8; 32], [u8; 32]) {
    let next_ck = crypto_core::hmac(ck, &[0x02]);
    let message_key = crypto_core::hmac(ck, &[0x01]);
    (next_ck, message_key)
}

pub fn encode_frame(header: Header, ciphertext: &[u8]) -> String {
    let header_bytes = header.to_bytes();
    let mut blob = Vec::with_capacity(4 + header_bytes.len() + ciphertext.len());
    blob.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    blob.extend_from_slice(&header_bytes);
    blob.extend_from_slice(ciphertext);
    crypto_core::b64_encode(&blob)
}

pub fn decode_frame(b64: &str) -> Result<(Header, Vec<u8>), VaultError> {
    let blob = crypto_core::b64_decode(b64)
        .map_err(|_| VaultError::InvalidPayloadFraming("payload is not valid base64".to_string()))?;
    if blob.len() < 4 {
        return Err(VaultError::InvalidPayloadFraming("frame truncated before header length".to_string()));
    }
    let header_len = u32::from_be_bytes(blob[0..4].try_into().unwrap()) as usize;
    let header_end = 4usize
        .checked_add(header_len)
        .ok_or_else(|| VaultError::InvalidPayloadFraming("header length overflow".to_string()))?;
    let header_bytes = blob
        .get(4..header_end)
        .ok_or_else(|| VaultError::InvalidPayloadFraming("frame truncated before header end".to_string()))?;
    let header = Header::from_bytes(header_bytes)?;
    let ciphertext = blob[header_end..].to_vec();
    Ok((header, ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_pair() -> ([u8; 32], [u8; 32], [u8; 32], [u8; 32], [u8; 32]) {
        let a = crypto_core::x25519_keygen();
        let b = crypto_core::x25519_keygen();
        let shared = crypto_core::x25519_agree(&a.private, &b.public);
        assert_eq!(shared, crypto_core::x25519_agree(&b.private, &a.public));
        (shared, a.private, a.public, b.private, b.public)
    }

    #[test]
    fn round_trips_first_message_either_direction() {
        let (shared, a_priv, a_pub, b_priv, b_pub) = shared_pair();

        let mut a = RatchetState::init(shared, a_priv, a_pub);
        let mut b = RatchetState::init(shared, b_priv, b_pub);

        let (header, ct) = a.encrypt(b"hello", b_pub).unwrap();
        let plaintext = b.decrypt(header, &ct).unwrap();
        assert_eq!(plaintext, b"hello");
    }

    #[test]
    fn round_trips_many_messages_and_replies() {
        let (shared, a_priv, a_pub, b_priv, b_pub) = shared_pair();
        let mut a = RatchetState::init(shared, a_priv, a_pub);
        let mut b = RatchetState::init(shared, b_priv, b_pub);

        for i in 0..5 {
            let msg = format!("a-says-{i}");
            let (header, ct) = a.encrypt(msg.as_bytes(), b_pub).unwrap();
            assert_eq!(b.decrypt(header, &ct).unwrap(), msg.as_bytes());
        }

        let (header, ct) = b.encrypt(b"b-replies", a_pub).unwrap();
        assert_eq!(a.decrypt(header, &ct).unwrap(), b"b-replies");

        for i in 0..5 {
            let msg = format!("a-again-{i}");
            let (header, ct) = a.encrypt(msg.as_bytes(), b_pub).unwrap();
            assert_eq!(b.decrypt(header, &ct).unwrap(), msg.as_bytes());
        }
    }

    #[test]
    fn out_of_order_delivery_uses_the_skipped_key_cache() {
        let (shared, a_priv, a_pub, b_priv, b_pub) = shared_pair();
        let mut a = RatchetState::init(shared, a_priv, a_pub);
        let mut b = RatchetState::init(shared, b_priv, b_pub);

        let (h0, c0) = a.encrypt(b"zero", b_pub).unwrap();
        let (h1, c1) = a.encrypt(b"one", b_pub).unwrap();
        let (h2, c2) = a.encrypt(b"two", b_pub).unwrap();

        assert_eq!(b.decrypt(h2, &c2).unwrap(), b"two");
        assert_eq!(b.decrypt(h0, &c0).unwrap(), b"zero");
        assert_eq!(b.decrypt(h1, &c1).unwrap(), b"one");
    }

    #[test]
    fn replaying_a_consumed_message_fails() {
        let (shared, a_priv, a_pub, b_priv, b_pub) = shared_pair();
        let mut a = RatchetState::init(shared, a_priv, a_pub);
        let mut b = RatchetState::init(shared, b_priv, b_pub);

        let (header, ct) = a.encrypt(b"only-once", b_pub).unwrap();
        assert!(b.decrypt(header, &ct).is_ok());
        assert!(b.decrypt(header, &ct).is_err());
    }

    #[test]
    fn skip_beyond_the_cap_is_rejected() {
        let (shared, a_priv, a_pub, b_priv, b_pub) = shared_pair();
        let mut a = RatchetState::init(shared, a_priv, a_pub);
        let mut b = RatchetState::init(shared, b_priv, b_pub);

        for _ in 0..=(MAX_SKIP + 1) {
            let _ = a.encrypt(b"filler", b_pub).unwrap();
        }
        let (last_header, last_ct) = a.encrypt(b"too-far", b_pub).unwrap();
        assert!(b.decrypt(last_header, &last_ct).is_err());
    }

    #[test]
    fn state_round_trips_through_serialization() {
        let (shared, a_priv, a_pub, b_priv, b_pub) = shared_pair();
        let mut a = RatchetState::init(shared, a_priv, a_pub);
        let mut b = RatchetState::init(shared, b_priv, b_pub);

        let (header, ct) = a.encrypt(b"persisted", b_pub).unwrap();
        let serialized = a.serialize();
        let mut a_reloaded = RatchetState::deserialize(&serialized).unwrap();

        assert_eq!(b.decrypt(header, &ct).unwrap(), b"persisted");

        let (header2, ct2) = a_reloaded.encrypt(b"after-reload", b_pub).unwrap();
        assert_eq!(b.decrypt(header2, &ct2).unwrap(), b"after-reload");
    }

    #[test]
    fn frame_round_trips() {
        let header = Header {
            dh_pub: [7u8; 32],
            pn: 3,
            n: 9,
        };
        let encoded = encode_frame(header, b"ciphertext-bytes");
        let (decoded_header, decoded_ct) = decode_frame(&encoded).unwrap();
        assert_eq!(decoded_header, header);
        assert_eq!(decoded_ct, b"ciphertext-bytes");
    }

    #[test]
    fn decode_frame_rejects_garbage() {
        assert!(decode_frame("not-base64!!").is_err());
        assert!(decode_frame(&crypto_core::b64_encode(&[1, 2, 3])).is_err());
    }
}
