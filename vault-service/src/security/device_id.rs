//! Deterministic device identifier.
//!
//! `device_id = hex(HMAC_SHA256(shared_key, phone || client_pub_b64))`. The
//! concatenation has no separator between `phone` and `client_pub_b64` —
//! this must match exactly on any party that recomputes it, since an
//! accidental separator would make every device ID unrecoverable.

/// Compute the device ID for an entity from the X25519-agreed shared key,
/// the entity's phone number, and the client's base64-encoded device-id
/// public key.
pub fn compute_device_id(shared_key: &[u8], phone_number: &str, client_pub_b64: &str) -> String {
    let mut msg = Vec::with_capacity(phone_number.len() + client_pub_b64.len());
    msg.extend_from_slice(phone_number.as_bytes());
    msg.extend_from_slice(client_pub_b64.as_bytes());
    crypto_core::hmac_hex(shared_key, &msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic() {
        let a = compute_device_id(b"shared-key", "+237600000001", "pubkey==");
        let b = compute_device_id(b"shared-key", "+237600000001", "pubkey==");
        assert_eq!(a, b);
    }

    #[test]
    fn changes_with_any_input() {
        let base = compute_device_id(b"shared-key", "+237600000001", "pubkey==");
        assert_ne!(base, compute_device_id(b"other-key", "+237600000001", "pubkey=="));
        assert_ne!(base, compute_device_id(b"shared-key", "+237600000002", "pubkey=="));
        assert_ne!(base, compute_device_id(b"shared-key", "+237600000001", "otherkey"));
    }

    #[test]
    fn concatenation_has_no_separator() {
        // "ab" + "cd" must hash identically whether split as ("a","bcd")
        // or ("ab","cd") — i.e. the function truly concatenates with
        // nothing in between, so the split point is unobservable.
        let whole = compute_device_id(b"k", "ab", "cd");
        let split_left = compute_device_id(b"k", "a", "bcd");
        assert_eq!(whole, split_left);

        let mut msg = Vec::new();
        msg.extend_from_slice(b"ab");
        msg.extend_from_slice(b"cd");
        let expected = crypto_core::hmac_hex(b"k", &msg);
        assert_eq!(whole, expected);
    }
}
