//! PBKDF2 passphrase key derivation and named strength profiles.
//!
//! A profile (or a clamped custom request) resolves to concrete parameters;
//! resolution is pure and total. The derived key is an owned 256-bit value
//! that zeroizes on drop.

use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Derived key length in bytes (AES-256).
pub const KEY_LENGTH: usize = 32;

/// Lowest iteration count any envelope may use.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Highest iteration count any envelope may use.
pub const MAX_ITERATIONS: u32 = 2_000_000;

/// Hash function underlying PBKDF2-HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KdfHash {
    #[serde(rename = "SHA-256")]
    Sha256,
    #[serde(rename = "SHA-512")]
    Sha512,
}

impl KdfHash {
    pub fn as_str(&self) -> &'static str {
        match self {
            KdfHash::Sha256 => "SHA-256",
            KdfHash::Sha512 => "SHA-512",
        }
    }
}

/// Concrete derivation parameters for one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub hash: KdfHash,
    pub iterations: u32,
    pub salt_len: usize,
}

/// Named strength profiles plus a clamped custom escape hatch.
///
/// Invalid combinations are unrepresentable: a custom request carries only a
/// hash choice and an iteration count, and `resolve` clamps the count into
/// the permitted range instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KdfPolicy {
    /// Faster unlock on low-end devices.
    Compat,
    /// Default profile.
    Strong,
    /// Slowest, highest work factor.
    Paranoid,
    Custom { hash: KdfHash, iterations: u32 },
}

impl KdfPolicy {
    /// Resolve to concrete parameters. Pure; never fails.
    pub fn resolve(&self) -> KdfParams {
        match self {
            KdfPolicy::Compat => KdfParams {
                hash: KdfHash::Sha256,
                iterations: 200_000,
                salt_len: 16,
            },
            KdfPolicy::Strong => KdfParams {
                hash: KdfHash::Sha256,
                iterations: 600_000,
                salt_len: 16,
            },
            KdfPolicy::Paranoid => KdfParams {
                hash: KdfHash::Sha512,
                iterations: 1_200_000,
                salt_len: 32,
            },
            KdfPolicy::Custom { hash, iterations } => KdfParams {
                hash: *hash,
                iterations: (*iterations).clamp(MIN_ITERATIONS, MAX_ITERATIONS),
                salt_len: 16,
            },
        }
    }
}

impl Default for KdfPolicy {
    fn default() -> Self {
        KdfPolicy::Strong
    }
}

/// An owned 256-bit symmetric key. Zeroized on drop, never serialized.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; KEY_LENGTH]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").field("key", &"[REDACTED]").finish()
    }
}

/// Stretch a passphrase into a 256-bit key with PBKDF2-HMAC.
///
/// The iteration count is clamped into `[MIN_ITERATIONS, MAX_ITERATIONS]`
/// so no caller can request a zero or unbounded work factor.
pub fn derive_key(passphrase: &str, hash: KdfHash, iterations: u32, salt: &[u8]) -> MasterKey {
    let rounds = iterations.clamp(MIN_ITERATIONS, MAX_ITERATIONS);
    let mut okm = [0u8; KEY_LENGTH];
    match hash {
        KdfHash::Sha256 => pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, rounds, &mut okm),
        KdfHash::Sha512 => pbkdf2_hmac::<Sha512>(passphrase.as_bytes(), salt, rounds, &mut okm),
    }
    MasterKey(okm)
}

/// Generate a fresh random salt of the given length.
pub fn generate_salt(len: usize) -> Result<Vec<u8>, CryptoError> {
    let mut salt = vec![0u8; len];
    getrandom::getrandom(&mut salt).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Tests use a reduced work factor where determinism is all that matters;
    // derive_key clamps it up to MIN_ITERATIONS either way.
    const TEST_ITERATIONS: u32 = MIN_ITERATIONS;

    #[test]
    fn profiles_are_deterministic() {
        assert_eq!(KdfPolicy::Strong.resolve(), KdfPolicy::Strong.resolve());
        assert_eq!(KdfPolicy::Compat.resolve(), KdfPolicy::Compat.resolve());
        assert_eq!(KdfPolicy::Paranoid.resolve(), KdfPolicy::Paranoid.resolve());
    }

    #[test]
    fn profiles_within_permitted_range() {
        for policy in [KdfPolicy::Compat, KdfPolicy::Strong, KdfPolicy::Paranoid] {
            let params = policy.resolve();
            assert!(params.iterations >= MIN_ITERATIONS);
            assert!(params.iterations <= MAX_ITERATIONS);
            assert!(params.salt_len >= 16);
        }
    }

    #[test]
    fn custom_clamps_low() {
        let params = KdfPolicy::Custom {
            hash: KdfHash::Sha256,
            iterations: 0,
        }
        .resolve();
        assert_eq!(params.iterations, MIN_ITERATIONS);
    }

    #[test]
    fn custom_clamps_high() {
        let params = KdfPolicy::Custom {
            hash: KdfHash::Sha512,
            iterations: u32::MAX,
        }
        .resolve();
        assert_eq!(params.iterations, MAX_ITERATIONS);
    }

    #[test]
    fn custom_clamp_is_idempotent() {
        let policy = KdfPolicy::Custom {
            hash: KdfHash::Sha256,
            iterations: 50,
        };
        let first = policy.resolve();
        for _ in 0..10 {
            assert_eq!(policy.resolve(), first);
        }
    }

    #[test]
    fn custom_in_range_untouched() {
        let params = KdfPolicy::Custom {
            hash: KdfHash::Sha256,
            iterations: 350_000,
        }
        .resolve();
        assert_eq!(params.iterations, 350_000);
    }

    #[test]
    fn derive_is_deterministic() {
        let salt = [0x42u8; 16];
        let a = derive_key("correct horse", KdfHash::Sha256, TEST_ITERATIONS, &salt);
        let b = derive_key("correct horse", KdfHash::Sha256, TEST_ITERATIONS, &salt);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_passphrases_different_keys() {
        let salt = [0x42u8; 16];
        let a = derive_key("passphrase-a", KdfHash::Sha256, TEST_ITERATIONS, &salt);
        let b = derive_key("passphrase-b", KdfHash::Sha256, TEST_ITERATIONS, &salt);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salts_different_keys() {
        let a = derive_key("pw", KdfHash::Sha256, TEST_ITERATIONS, &[0x01u8; 16]);
        let b = derive_key("pw", KdfHash::Sha256, TEST_ITERATIONS, &[0x02u8; 16]);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn hash_choice_changes_key() {
        let salt = [0x42u8; 16];
        let a = derive_key("pw", KdfHash::Sha256, TEST_ITERATIONS, &salt);
        let b = derive_key("pw", KdfHash::Sha512, TEST_ITERATIONS, &salt);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn generate_salt_length_and_uniqueness() {
        let a = generate_salt(16).unwrap();
        let b = generate_salt(16).unwrap();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn master_key_debug_redacted() {
        let key = MasterKey::from_bytes([7u8; KEY_LENGTH]);
        let rendered = format!("{:?}", key);
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains('7'));
    }

    #[test]
    fn hash_serde_names() {
        assert_eq!(serde_json::to_string(&KdfHash::Sha256).unwrap(), "\"SHA-256\"");
        assert_eq!(serde_json::to_string(&KdfHash::Sha512).unwrap(), "\"SHA-512\"");
    }
}
