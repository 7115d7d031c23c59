//! Long-lived tokens (LLTs).
//!
//! Wire form: `<eid_hex>:<base64url_payload>.<base64url_hmac>`, where
//! `payload` is the base64-url encoding of the JSON object
//! `{eid, issued_at, expires_at}` and the HMAC is keyed on the
//! `device_id_shared_key` — the X25519 agreement between the server's and
//! client's device-id keypairs — computed over the base64-url payload
//! bytes, not the raw JSON.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LltPayload {
    pub eid: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Mint a token for `eid_hex`, signed with `shared_key`, valid for
/// `lifetime` starting now.
pub fn generate(eid_hex: &str, shared_key: &[u8], lifetime: Duration) -> Result<String, VaultError> {
    let now = Utc::now();
    let payload = LltPayload {
        eid: eid_hex.to_string(),
        issued_at: now.timestamp(),
        expires_at: (now + lifetime).timestamp(),
    };
    let json = serde_json::to_vec(&payload).map_err(|e| VaultError::Internal(e.to_string()))?;
    let payload_b64 = crypto_core::b64url_encode(&json);
    let signature = crypto_core::hmac(shared_key, payload_b64.as_bytes());
    let signature_b64 = crypto_core::b64url_encode(&signature);
    Ok(format!("{eid_hex}:{payload_b64}.{signature_b64}"))
}

/// Split off the unauthenticated `eid` prefix without verifying anything.
/// Callers use this to look up the entity — and from it the shared key —
/// before `verify` can run.
pub fn peek_eid_hex(token: &str) -> Result<&str, VaultError> {
    token
        .split_once(':')
        .map(|(eid, _)| eid)
        .ok_or(VaultError::InvalidSession)
}

/// Verify `token` against `shared_key`, returning the decoded payload.
/// Checked in order: wire structure, signature, payload/prefix eid binding,
/// expiry. Any failure collapses to the same generic `InvalidSession`.
pub fn verify(token: &str, shared_key: &[u8]) -> Result<LltPayload, VaultError> {
    let (eid_hex, rest) = token.split_once(':').ok_or(VaultError::InvalidSession)?;
    let (payload_b64, signature_b64) = rest.rsplit_once('.').ok_or(VaultError::InvalidSession)?;

    let signature = crypto_core::b64url_decode(signature_b64).map_err(|_| VaultError::InvalidSession)?;
    if signature.len() != 32 {
        return Err(VaultError::InvalidSession);
    }
    let signature_hex = hex::encode(&signature);
    if !crypto_core::verify_hmac(shared_key, payload_b64.as_bytes(), &signature_hex) {
        return Err(VaultError::InvalidSession);
    }

    let json = crypto_core::b64url_decode(payload_b64).map_err(|_| VaultError::InvalidSession)?;
    let payload: LltPayload = serde_json::from_slice(&json).map_err(|_| VaultError::InvalidSession)?;

    if payload.eid != eid_hex {
        return Err(VaultError::InvalidSession);
    }
    if payload.expires_at <= Utc::now().timestamp() {
        return Err(VaultError::InvalidSession);
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"device-id-shared-key";

    #[test]
    fn round_trips() {
        let token = generate("aa11", KEY, Duration::days(30)).unwrap();
        let payload = verify(&token, KEY).unwrap();
        assert_eq!(payload.eid, "aa11");
    }

    #[test]
    fn tampering_any_part_fails_verification() {
        let token = generate("aa11", KEY, Duration::days(30)).unwrap();

        let mut tampered_sig = token.clone();
        let last = tampered_sig.pop().unwrap();
        tampered_sig.push(if last == 'A' { 'B' } else { 'A' });
        assert!(verify(&tampered_sig, KEY).is_err());

        let tampered_eid = token.replacen("aa11", "bb22", 1);
        assert!(verify(&tampered_eid, KEY).is_err());
    }

    #[test]
    fn cannot_authenticate_as_a_different_entity() {
        // A payload minted for "aa11" re-prefixed with a different eid must
        // not verify, even though the signature bytes are unchanged.
        let token = generate("aa11", KEY, Duration::days(30)).unwrap();
        let (_, rest) = token.split_once(':').unwrap();
        let swapped = format!("bb22:{rest}");
        assert!(verify(&swapped, KEY).is_err());
    }

    #[test]
    fn wrong_key_fails_verification() {
        let token = generate("aa11", KEY, Duration::days(30)).unwrap();
        assert!(verify(&token, b"wrong-key").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = generate("aa11", KEY, Duration::seconds(-1)).unwrap();
        assert!(verify(&token, KEY).is_err());
    }

    #[test]
    fn malformed_wire_form_is_rejected() {
        assert!(verify("not-a-token", KEY).is_err());
        assert!(verify("aa11:payload-without-dot", KEY).is_err());
    }
}
