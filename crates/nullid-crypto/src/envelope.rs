//! `NULLID:ENC` envelope codec.
//!
//! Token format (single line, safe to paste into text channels):
//!
//! `NULLID:ENC:<version>.<base64url(header JSON)>.<base64url(ciphertext+tag)>`
//!
//! The header carries the KDF parameters, salt, nonce, and optional file
//! metadata. Its serialized bytes, exactly as they appear in the token, are
//! the AAD for the AEAD operation: visible to anyone holding the envelope,
//! unalterable without invalidating the tag.

use serde::{Deserialize, Serialize};

use crate::aead::{self, NONCE_LENGTH, TAG_LENGTH};
use crate::encoding::{base64url_decode, base64url_encode};
use crate::error::CryptoError;
use crate::kdf::{self, KdfHash, KdfPolicy, MasterKey, MAX_ITERATIONS, MIN_ITERATIONS};

/// Leading literal every token starts with.
pub const FORMAT_TAG: &str = "NULLID:ENC";

/// Version written by this codec.
pub const CURRENT_VERSION: u32 = 1;

/// Versions this codec can decode.
pub const SUPPORTED_VERSIONS: &[u32] = &[CURRENT_VERSION];

/// Smallest salt any well-formed header may carry.
const MIN_SALT_LENGTH: usize = 16;

/// KDF parameters as serialized inside the header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderKdf {
    pub hash: KdfHash,
    pub iterations: u32,
}

/// Authenticated-but-not-encrypted envelope header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    pub kdf: HeaderKdf,
    /// Base64url, fresh per encryption.
    pub salt: String,
    /// Base64url, 96-bit, unique per encryption.
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EnvelopeHeader {
    pub fn salt_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        base64url_decode(&self.salt)
            .map_err(|_| CryptoError::MalformedToken("invalid salt encoding".into()))
    }

    fn nonce_bytes(&self) -> Result<[u8; NONCE_LENGTH], CryptoError> {
        let bytes = base64url_decode(&self.nonce)
            .map_err(|_| CryptoError::MalformedToken("invalid nonce encoding".into()))?;
        bytes
            .try_into()
            .map_err(|_| CryptoError::MalformedToken("nonce must be 96 bits".into()))
    }
}

/// Optional file metadata recorded in the header when sealing a file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeMeta {
    pub mime: Option<String>,
    pub name: Option<String>,
}

/// A structurally validated token, split into its authenticated parts.
///
/// Parsing needs no passphrase; holding one of these proves nothing about
/// authenticity until [`ParsedEnvelope::open_with_key`] succeeds.
#[derive(Debug)]
pub struct ParsedEnvelope {
    pub version: u32,
    pub header: EnvelopeHeader,
    /// Exact serialized header bytes from the token; used verbatim as AAD.
    header_bytes: Vec<u8>,
    ciphertext: Vec<u8>,
}

impl ParsedEnvelope {
    /// Derive the symmetric key for this envelope from a candidate passphrase.
    pub fn derive_key(&self, passphrase: &str) -> Result<MasterKey, CryptoError> {
        let salt = self.header.salt_bytes()?;
        Ok(kdf::derive_key(
            passphrase,
            self.header.kdf.hash,
            self.header.kdf.iterations,
            &salt,
        ))
    }

    /// AEAD-open the payload with an already-derived key.
    ///
    /// Fails uniformly with [`CryptoError::Authenticity`] for a wrong key or
    /// any altered byte of header or ciphertext.
    pub fn open_with_key(&self, key: &MasterKey) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.header.nonce_bytes()?;
        aead::open(key, &nonce, &self.ciphertext, &self.header_bytes)
    }
}

/// Seal plaintext under a passphrase, returning the portable token.
pub fn seal(
    passphrase: &str,
    plaintext: &[u8],
    policy: KdfPolicy,
    meta: Option<EnvelopeMeta>,
) -> Result<String, CryptoError> {
    let (token, _key) = seal_keyed(passphrase, plaintext, policy, meta)?;
    Ok(token)
}

/// Seal plaintext and also return the derived key.
///
/// Used by a vault session to keep the key it just proved against the
/// canary instead of paying a second derivation.
pub fn seal_keyed(
    passphrase: &str,
    plaintext: &[u8],
    policy: KdfPolicy,
    meta: Option<EnvelopeMeta>,
) -> Result<(String, MasterKey), CryptoError> {
    let params = policy.resolve();
    let salt = kdf::generate_salt(params.salt_len)?;
    let nonce = aead::generate_nonce()?;
    let key = kdf::derive_key(passphrase, params.hash, params.iterations, &salt);

    let meta = meta.unwrap_or_default();
    let header = EnvelopeHeader {
        kdf: HeaderKdf {
            hash: params.hash,
            iterations: params.iterations,
        },
        salt: base64url_encode(&salt),
        nonce: base64url_encode(&nonce),
        mime: meta.mime,
        name: meta.name,
    };
    let header_bytes =
        serde_json::to_vec(&header).map_err(|e| CryptoError::Serialization(e.to_string()))?;

    let ciphertext = aead::seal(&key, &nonce, plaintext, &header_bytes)?;

    let token = format!(
        "{}:{}.{}.{}",
        FORMAT_TAG,
        CURRENT_VERSION,
        base64url_encode(&header_bytes),
        base64url_encode(&ciphertext),
    );
    Ok((token, key))
}

/// Decode a token with a passphrase, returning the plaintext.
pub fn open(passphrase: &str, token: &str) -> Result<Vec<u8>, CryptoError> {
    let parsed = parse(token)?;
    let key = parsed.derive_key(passphrase)?;
    parsed.open_with_key(&key)
}

/// Parse and return the header without attempting decryption.
///
/// Lets a caller preview KDF cost and payload metadata before committing to
/// a decrypt attempt. Structurally invalid tokens are rejected here; a
/// valid-but-wrong-passphrase token is not detectable without the key.
pub fn inspect(token: &str) -> Result<EnvelopeHeader, CryptoError> {
    Ok(parse(token)?.header)
}

/// Structural validation: format tag, version gate, segment decoding, and
/// header sanity. No key material is touched.
pub fn parse(token: &str) -> Result<ParsedEnvelope, CryptoError> {
    let token = token.trim();
    let rest = token
        .strip_prefix(FORMAT_TAG)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| CryptoError::MalformedToken("missing format tag".into()))?;

    let (version_str, body) = rest
        .split_once('.')
        .ok_or_else(|| CryptoError::MalformedToken("missing header segment".into()))?;
    let version: u32 = version_str
        .parse()
        .map_err(|_| CryptoError::MalformedToken("unreadable version".into()))?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(CryptoError::UnsupportedVersion(version));
    }

    let (header_b64, ciphertext_b64) = body
        .split_once('.')
        .ok_or_else(|| CryptoError::MalformedToken("missing ciphertext segment".into()))?;
    if ciphertext_b64.contains('.') {
        return Err(CryptoError::MalformedToken("too many segments".into()));
    }

    let header_bytes = base64url_decode(header_b64)
        .map_err(|_| CryptoError::MalformedToken("invalid header encoding".into()))?;
    let ciphertext = base64url_decode(ciphertext_b64)
        .map_err(|_| CryptoError::MalformedToken("invalid ciphertext encoding".into()))?;

    let header: EnvelopeHeader = serde_json::from_slice(&header_bytes)
        .map_err(|_| CryptoError::MalformedToken("unreadable header".into()))?;

    if header.salt_bytes()?.len() < MIN_SALT_LENGTH {
        return Err(CryptoError::MalformedToken("salt too short".into()));
    }
    header.nonce_bytes()?;
    if header.kdf.iterations < MIN_ITERATIONS || header.kdf.iterations > MAX_ITERATIONS {
        return Err(CryptoError::MalformedToken(
            "iteration count outside permitted range".into(),
        ));
    }
    if ciphertext.len() < TAG_LENGTH {
        return Err(CryptoError::MalformedToken("ciphertext too short".into()));
    }

    Ok(ParsedEnvelope {
        version,
        header,
        header_bytes,
        ciphertext,
    })
}
