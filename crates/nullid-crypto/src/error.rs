use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Malformed envelope token: {0}")]
    MalformedToken(String),

    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("Integrity/authenticity check failed")]
    Authenticity,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("KDF parameters outside permitted range: {0}")]
    Policy(String),

    #[error("Payload content hash mismatch")]
    HashMismatch,

    #[error("Payload signature required but missing")]
    SignatureMissing,

    #[error("Payload signature verification failed")]
    SignatureInvalid,

    #[error("Signature verification requires a passphrase")]
    PassphraseRequired,

    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedSignatureAlgorithm(String),

    #[error("Unsupported payload schema version: {found} (supported: {supported})")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("canonicalJSON: non-finite number is not representable in JSON")]
    NonFiniteNumber,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
