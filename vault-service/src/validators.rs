//! Request field validation.
//!
//! The source validates a dynamic list of required field names against a
//! loosely-typed request object. Generated request structs give us static
//! field access instead, so the validator here takes the already-extracted
//! `(name, value)` pairs rather than field names to look up reflectively.

use crate::error::VaultError;

/// One requirement: either a single field that must be non-empty, or a set
/// of alternatives where at least one must be non-empty.
pub enum Requirement<'a> {
    Field(&'a str, &'a str),
    OneOf(&'a [(&'a str, &'a str)]),
}

/// Validates that every requirement is satisfied. On failure, returns
/// `INVALID_ARGUMENT` naming every offending field/group.
pub fn validate_required(requirements: &[Requirement]) -> Result<(), VaultError> {
    let mut missing = Vec::new();

    for requirement in requirements {
        match requirement {
            Requirement::Field(name, value) => {
                if value.is_empty() {
                    missing.push((*name).to_string());
                }
            }
            Requirement::OneOf(alternatives) => {
                if !alternatives.iter().any(|(_, value)| !value.is_empty()) {
                    let names: Vec<&str> = alternatives.iter().map(|(name, _)| *name).collect();
                    missing.push(format!("({})", names.join(" or ")));
                }
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(VaultError::MissingFields(missing.join(", ")))
    }
}

/// Validates that every named X25519 public key field base64-decodes to
/// exactly 32 bytes and is not the all-zero key.
pub fn validate_x25519_fields(fields: &[(&str, &str)]) -> Result<(), VaultError> {
    let mut invalid = Vec::new();

    for (name, value) in fields {
        if let Err(reason) = validate_x25519_public_key(value) {
            invalid.push(format!("{name}: {reason}"));
        }
    }

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(VaultError::InvalidFields(invalid.join(", ")))
    }
}

fn validate_x25519_public_key(b64: &str) -> Result<(), &'static str> {
    if !crypto_core::is_valid_x25519_public_key(b64) {
        return Err("must be a base64-encoded, non-zero 32-byte X25519 public key");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_single_field() {
        let result = validate_required(&[Requirement::Field("phone_number", "")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_present_single_field() {
        let result = validate_required(&[Requirement::Field("phone_number", "+237600000001")]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_one_of_satisfied_by_either_alternative() {
        let result = validate_required(&[Requirement::OneOf(&[
            ("device_id", ""),
            ("long_lived_token", "abc:def.ghi"),
        ])]);
        assert!(result.is_ok());
    }

    #[test]
    fn test_one_of_fails_when_all_empty() {
        let result = validate_required(&[Requirement::OneOf(&[
            ("device_id", ""),
            ("long_lived_token", ""),
        ])]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_x25519_field_rejected() {
        let result = validate_x25519_fields(&[("client_publish_pub_key", "not-base64!!")]);
        assert!(result.is_err());
    }
}
