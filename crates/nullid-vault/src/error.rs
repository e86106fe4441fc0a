use nullid_crypto::CryptoError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// An operation requiring an unlocked session ran while locked.
    /// Distinct from authenticity failures so a caller can prompt
    /// "unlock first" instead of "wrong passphrase".
    #[error("Vault is locked")]
    Locked,

    /// Single generic unlock failure. Does not reveal whether the vault
    /// exists, is empty, or the passphrase was wrong.
    #[error("Unlock failed")]
    UnlockFailed,

    #[error("A vault already exists")]
    AlreadyInitialized,

    #[error("Note not found: {0}")]
    NotFound(Uuid),

    #[error("Storage backend error ({backend}): {message}")]
    Storage { backend: String, message: String },

    #[error("Corrupt vault record: {0}")]
    Corrupt(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
