pub mod aead;
pub mod encoding;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod signed;

pub use aead::{NONCE_LENGTH, TAG_LENGTH};
pub use encoding::{base64url_decode, base64url_encode, hex_encode};
pub use envelope::{
    inspect, open, parse, seal, seal_keyed, EnvelopeHeader, EnvelopeMeta, ParsedEnvelope,
    CURRENT_VERSION, FORMAT_TAG, SUPPORTED_VERSIONS,
};
pub use error::CryptoError;
pub use kdf::{
    derive_key, generate_salt, KdfHash, KdfParams, KdfPolicy, MasterKey, KEY_LENGTH,
    MAX_ITERATIONS, MIN_ITERATIONS,
};
pub use signed::{
    canonical_json, create_signed_payload, verify_and_import, PayloadSignature, SignedPayload,
    SIGNATURE_ALGORITHM,
};
