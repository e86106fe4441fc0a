//! Canonically-hashed, optionally MAC-signed JSON payloads.
//!
//! Wraps an arbitrary JSON payload (policy pack, profile, vault snapshot)
//! with a schema version, a content hash over its canonical form, and an
//! optional detached signature: an HMAC-SHA256 under a key derived from a
//! signing passphrase with a fresh salt. Verification always recomputes the
//! hash before the payload is trusted; a hash mismatch blocks import even
//! when no signature is present.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::encoding::{base64url_decode, base64url_encode, hex_encode};
use crate::error::CryptoError;
use crate::kdf::{self, KdfHash};

/// Algorithm identifier recorded in the signature block. Pins both the MAC
/// and the MAC-key derivation (PBKDF2-SHA256 at [`SIGNING_ITERATIONS`]).
pub const SIGNATURE_ALGORITHM: &str = "PBKDF2-SHA256/HMAC-SHA256";

/// Work factor for deriving the MAC key from the signing passphrase.
pub const SIGNING_ITERATIONS: u32 = 600_000;

const SIGNING_SALT_LENGTH: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Detached signature block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadSignature {
    pub algorithm: String,
    /// Base64url; fresh per signature.
    pub salt: String,
    /// Base64url HMAC-SHA256 over the canonical payload bytes.
    pub mac: String,
    /// Short fingerprint of the MAC key; helps a user spot a wrong
    /// passphrase without acting as a verification oracle.
    pub key_hint: String,
}

/// A schema-versioned payload with content hash and optional signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedPayload {
    pub schema_version: u32,
    pub payload: Value,
    /// Hex SHA-256 of the canonical payload.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<PayloadSignature>,
}

/// Canonical JSON serialization: sorted keys, no whitespace.
/// Deterministic regardless of key ordering.
pub fn canonical_json(value: &Value) -> Result<String, CryptoError> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(CryptoError::NonFiniteNumber);
            }
            Ok(serde_json::to_string(n).unwrap())
        }
        Value::String(s) => Ok(serde_json::to_string(s).unwrap()),
        Value::Array(arr) => {
            let items: Result<Vec<String>, _> = arr.iter().map(canonical_json).collect();
            Ok(format!("[{}]", items?.join(",")))
        }
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let pairs: Result<Vec<String>, _> = keys
                .iter()
                .map(|k| {
                    let v = canonical_json(&obj[*k])?;
                    Ok(format!("{}:{}", serde_json::to_string(*k).unwrap(), v))
                })
                .collect();
            Ok(format!("{{{}}}", pairs?.join(",")))
        }
    }
}

fn content_hash(canonical: &str) -> String {
    hex_encode(&Sha256::digest(canonical.as_bytes()))
}

fn derive_mac_key(passphrase: &str, salt: &[u8]) -> [u8; kdf::KEY_LENGTH] {
    *kdf::derive_key(passphrase, KdfHash::Sha256, SIGNING_ITERATIONS, salt).as_bytes()
}

fn mac_key_hint(mac_key: &[u8]) -> String {
    hex_encode(&Sha256::digest(mac_key)[..4])
}

/// Wrap `payload` with hash and, when a signing passphrase is supplied, a
/// detached MAC over the canonical bytes.
pub fn create_signed_payload(
    payload: &Value,
    schema_version: u32,
    signing_passphrase: Option<&str>,
) -> Result<SignedPayload, CryptoError> {
    let canonical = canonical_json(payload)?;
    let hash = content_hash(&canonical);

    let signature = match signing_passphrase {
        None => None,
        Some(passphrase) => {
            let salt = kdf::generate_salt(SIGNING_SALT_LENGTH)?;
            let mac_key = derive_mac_key(passphrase, &salt);
            let mut mac = HmacSha256::new_from_slice(&mac_key)
                .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
            mac.update(canonical.as_bytes());
            let tag = mac.finalize().into_bytes();
            Some(PayloadSignature {
                algorithm: SIGNATURE_ALGORITHM.to_string(),
                salt: base64url_encode(&salt),
                mac: base64url_encode(&tag),
                key_hint: mac_key_hint(&mac_key),
            })
        }
    };

    Ok(SignedPayload {
        schema_version,
        payload: payload.clone(),
        content_hash: hash,
        signature,
    })
}

/// Verify a signed payload and release its contents.
///
/// Order of checks: content hash (a mismatch is always a hard failure),
/// schema version window, then the signature. With `require_verified` a
/// missing signature or missing passphrase rejects the import; without it an
/// unsigned payload is released at the caller's explicitly accepted trust
/// level. A present signature is always verified when a passphrase is
/// supplied.
pub fn verify_and_import(
    signed: &SignedPayload,
    verification_passphrase: Option<&str>,
    require_verified: bool,
    supported_schema: u32,
) -> Result<Value, CryptoError> {
    let canonical = canonical_json(&signed.payload)?;
    if content_hash(&canonical) != signed.content_hash {
        return Err(CryptoError::HashMismatch);
    }

    if signed.schema_version != supported_schema {
        return Err(CryptoError::SchemaVersion {
            found: signed.schema_version,
            supported: supported_schema,
        });
    }

    match (&signed.signature, verification_passphrase) {
        (None, _) => {
            if require_verified {
                return Err(CryptoError::SignatureMissing);
            }
        }
        (Some(_), None) => {
            if require_verified {
                return Err(CryptoError::PassphraseRequired);
            }
        }
        (Some(sig), Some(passphrase)) => {
            if sig.algorithm != SIGNATURE_ALGORITHM {
                return Err(CryptoError::UnsupportedSignatureAlgorithm(
                    sig.algorithm.clone(),
                ));
            }
            let salt = base64url_decode(&sig.salt)
                .map_err(|_| CryptoError::SignatureInvalid)?;
            let expected =
                base64url_decode(&sig.mac).map_err(|_| CryptoError::SignatureInvalid)?;
            let mac_key = derive_mac_key(passphrase, &salt);
            let mut mac = HmacSha256::new_from_slice(&mac_key)
                .map_err(|_| CryptoError::SignatureInvalid)?;
            mac.update(canonical.as_bytes());
            mac.verify_slice(&expected)
                .map_err(|_| CryptoError::SignatureInvalid)?;
        }
    }

    Ok(signed.payload.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(
            canonical_json(&a).unwrap(),
            r#"{"a":{"c":3,"d":2},"b":1}"#
        );
    }

    #[test]
    fn canonical_is_order_independent() {
        let a: Value = serde_json::from_str(r#"{"x":1,"y":[true,null]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":[true,null],"x":1}"#).unwrap();
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
    }

    #[test]
    fn unsigned_round_trip() {
        let payload = json!({"a": 1});
        let signed = create_signed_payload(&payload, 1, None).unwrap();
        assert!(signed.signature.is_none());
        let out = verify_and_import(&signed, None, false, 1).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn unsigned_rejected_when_verification_required() {
        let signed = create_signed_payload(&json!({"a": 1}), 1, None).unwrap();
        assert!(matches!(
            verify_and_import(&signed, None, true, 1),
            Err(CryptoError::SignatureMissing)
        ));
    }

    #[test]
    fn signed_round_trip() {
        let payload = json!({"a": 1});
        let signed = create_signed_payload(&payload, 1, Some("sig-pass")).unwrap();
        let sig = signed.signature.as_ref().unwrap();
        assert_eq!(sig.algorithm, SIGNATURE_ALGORITHM);
        let out = verify_and_import(&signed, Some("sig-pass"), true, 1).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn tampered_payload_is_hash_mismatch() {
        let mut signed = create_signed_payload(&json!({"a": 1}), 1, Some("sig-pass")).unwrap();
        signed.payload = json!({"a": 2});
        assert!(matches!(
            verify_and_import(&signed, Some("sig-pass"), true, 1),
            Err(CryptoError::HashMismatch)
        ));
    }

    #[test]
    fn tampered_payload_with_forged_hash_fails_signature() {
        let mut signed = create_signed_payload(&json!({"a": 1}), 1, Some("sig-pass")).unwrap();
        signed.payload = json!({"a": 2});
        signed.content_hash = content_hash(&canonical_json(&signed.payload).unwrap());
        assert!(matches!(
            verify_and_import(&signed, Some("sig-pass"), true, 1),
            Err(CryptoError::SignatureInvalid)
        ));
    }

    #[test]
    fn wrong_passphrase_fails_signature() {
        let signed = create_signed_payload(&json!({"a": 1}), 1, Some("sig-pass")).unwrap();
        assert!(matches!(
            verify_and_import(&signed, Some("wrong"), true, 1),
            Err(CryptoError::SignatureInvalid)
        ));
    }

    #[test]
    fn signature_present_but_no_passphrase() {
        let signed = create_signed_payload(&json!({"a": 1}), 1, Some("sig-pass")).unwrap();
        assert!(matches!(
            verify_and_import(&signed, None, true, 1),
            Err(CryptoError::PassphraseRequired)
        ));
        // Caller explicitly accepting unverified import still gets the payload
        assert!(verify_and_import(&signed, None, false, 1).is_ok());
    }

    #[test]
    fn schema_version_window_enforced() {
        let signed = create_signed_payload(&json!({"a": 1}), 3, None).unwrap();
        assert!(matches!(
            verify_and_import(&signed, None, false, 1),
            Err(CryptoError::SchemaVersion {
                found: 3,
                supported: 1
            })
        ));
    }

    #[test]
    fn unknown_algorithm_rejected() {
        let mut signed = create_signed_payload(&json!({"a": 1}), 1, Some("sig-pass")).unwrap();
        signed.signature.as_mut().unwrap().algorithm = "HMAC-MD5".into();
        assert!(matches!(
            verify_and_import(&signed, Some("sig-pass"), true, 1),
            Err(CryptoError::UnsupportedSignatureAlgorithm(_))
        ));
    }

    #[test]
    fn content_hash_covers_canonical_form() {
        let signed = create_signed_payload(&json!({"n": 1.5, "m": "x"}), 1, None).unwrap();
        assert_eq!(
            signed.content_hash,
            content_hash(&canonical_json(&json!({"m": "x", "n": 1.5})).unwrap())
        );
    }
}
