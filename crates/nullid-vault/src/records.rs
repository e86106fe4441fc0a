//! Encrypted note records under the session master key.
//!
//! Notes are sealed individually with plain AES-256-GCM — the master key is
//! already derived once per session, so the full passphrase envelope is not
//! involved. The AAD binds each record to the store and its note id; a
//! ciphertext moved to another id fails to open. An encrypted index record
//! tracks the id set, since the durable store has no enumeration operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use nullid_crypto::aead;
use nullid_crypto::encoding::{base64url_decode, base64url_encode};
use nullid_crypto::envelope;
use nullid_crypto::error::CryptoError;
use nullid_crypto::kdf::{KdfPolicy, MasterKey};

use crate::error::{Result, VaultError};
use crate::session::{
    SessionState, VaultSession, CANARY_PLAINTEXT, KEY_CANARY, STORE_META, STORE_NOTES,
};
use crate::store::DurableStore;

pub(crate) const INDEX_KEY: &str = "index";

const NOTE_AAD_CONTEXT: &[u8] = b"nullid:note:v1";
const INDEX_AAD: &[u8] = b"nullid:index:v1";

/// Decrypted note contents. Exists only in memory while the vault is
/// unlocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A note as persisted: ciphertext plus unencrypted bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedNote {
    pub id: Uuid,
    /// Base64url, fresh per write.
    pub nonce: String,
    /// Base64url ciphertext with appended tag.
    pub ciphertext: String,
    pub updated_at: DateTime<Utc>,
}

/// One line of the note index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: Uuid,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct NoteIndex {
    pub(crate) entries: Vec<IndexEntry>,
}

/// Nonce + ciphertext pair for records that are not notes (the index).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SealedRecord {
    nonce: String,
    ciphertext: String,
}

/// Note CRUD over a [`VaultSession`]. Every operation requires the session
/// to be unlocked and counts as activity for the auto-lock timer.
pub struct NoteStore {
    session: Arc<VaultSession>,
    /// Serializes index read-modify-write across concurrent mutations.
    write_lock: Mutex<()>,
}

impl NoteStore {
    pub fn new(session: Arc<VaultSession>) -> Self {
        Self {
            session,
            write_lock: Mutex::new(()),
        }
    }

    /// Create or update a note. Returns its id.
    pub async fn save(&self, id: Option<Uuid>, note: &Note) -> Result<Uuid> {
        let _write = self.write_lock.lock().await;
        let id = id.unwrap_or_else(Uuid::new_v4);
        let now = Utc::now();
        {
            let unlocked = self.session.read_unlocked().await?;
            let key = unlocked.master_key();
            let store = self.session.store();

            let record = encrypt_note(key, id, note, now)?;
            store
                .put(STORE_NOTES, &id.to_string(), &serde_json::to_string(&record)?)
                .await?;

            let mut index = load_index(key, store.as_ref()).await?;
            index.entries.retain(|e| e.id != id);
            index.entries.push(IndexEntry {
                id,
                updated_at: now,
            });
            store_index(key, store.as_ref(), &index).await?;
        }
        self.session.record_activity().await;
        Ok(id)
    }

    /// Decrypt one note.
    pub async fn get(&self, id: Uuid) -> Result<Note> {
        let note = {
            let unlocked = self.session.read_unlocked().await?;
            let raw = self
                .session
                .store()
                .get(STORE_NOTES, &id.to_string())
                .await?
                .ok_or(VaultError::NotFound(id))?;
            let record: EncryptedNote = serde_json::from_str(&raw)?;
            decrypt_note(unlocked.master_key(), &record)?
        };
        self.session.record_activity().await;
        Ok(note)
    }

    /// Note ids and update times, most recently updated first.
    pub async fn list(&self) -> Result<Vec<IndexEntry>> {
        let entries = {
            let unlocked = self.session.read_unlocked().await?;
            let mut index =
                load_index(unlocked.master_key(), self.session.store().as_ref()).await?;
            index.entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            index.entries
        };
        self.session.record_activity().await;
        Ok(entries)
    }

    /// Case-insensitive substring search over title, body, and tags.
    pub async fn search(&self, query: &str) -> Result<Vec<(Uuid, Note)>> {
        let needle = query.to_lowercase();
        let hits = {
            let unlocked = self.session.read_unlocked().await?;
            let key = unlocked.master_key();
            let store = self.session.store();
            let index = load_index(key, store.as_ref()).await?;

            let mut hits = Vec::new();
            for entry in &index.entries {
                let raw = store
                    .get(STORE_NOTES, &entry.id.to_string())
                    .await?
                    .ok_or_else(|| {
                        VaultError::Corrupt("index references a missing note".into())
                    })?;
                let record: EncryptedNote = serde_json::from_str(&raw)?;
                let note = decrypt_note(key, &record)?;
                let matched = note.title.to_lowercase().contains(&needle)
                    || note.body.to_lowercase().contains(&needle)
                    || note.tags.iter().any(|t| t.to_lowercase().contains(&needle));
                if matched {
                    hits.push((entry.id, note));
                }
            }
            hits
        };
        self.session.record_activity().await;
        Ok(hits)
    }

    /// Remove a note. Idempotent.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let _write = self.write_lock.lock().await;
        {
            let unlocked = self.session.read_unlocked().await?;
            let key = unlocked.master_key();
            let store = self.session.store();
            store.delete(STORE_NOTES, &id.to_string()).await?;
            let mut index = load_index(key, store.as_ref()).await?;
            index.entries.retain(|e| e.id != id);
            store_index(key, store.as_ref(), &index).await?;
        }
        self.session.record_activity().await;
        Ok(())
    }

    /// Re-key the vault under a new passphrase: verify the current one
    /// against the canary, seal a fresh canary, and re-encrypt every note
    /// and the index under the new master key.
    ///
    /// Holds exclusive session access for the whole rewrite, so it
    /// serializes against note operations and lock transitions. Works from
    /// either state; an unlocked session continues with the new key.
    pub async fn change_passphrase(
        &self,
        current: &str,
        new: &str,
        policy: KdfPolicy,
    ) -> Result<()> {
        let _write = self.write_lock.lock().await;
        let mut state = self.session.write_state().await;
        let store = self.session.store();

        let token = match store.get(STORE_META, KEY_CANARY).await {
            Ok(Some(token)) => token,
            Ok(None) | Err(_) => return Err(VaultError::UnlockFailed),
        };

        let current = current.to_owned();
        let new = new.to_owned();
        let (new_token, old_key, new_key) = tokio::task::spawn_blocking(
            move || -> std::result::Result<(String, MasterKey, MasterKey), CryptoError> {
                let parsed = envelope::parse(&token)?;
                let old_key = parsed.derive_key(&current)?;
                if parsed.open_with_key(&old_key)? != CANARY_PLAINTEXT {
                    return Err(CryptoError::Authenticity);
                }
                let (new_token, new_key) =
                    envelope::seal_keyed(&new, CANARY_PLAINTEXT, policy, None)?;
                Ok((new_token, old_key, new_key))
            },
        )
        .await
        .map_err(|_| VaultError::UnlockFailed)?
        .map_err(|_| VaultError::UnlockFailed)?;

        let index = load_index(&old_key, store.as_ref()).await?;
        let mut rewritten = Vec::with_capacity(index.entries.len());
        for entry in &index.entries {
            let raw = store
                .get(STORE_NOTES, &entry.id.to_string())
                .await?
                .ok_or_else(|| VaultError::Corrupt("index references a missing note".into()))?;
            let record: EncryptedNote = serde_json::from_str(&raw)?;
            let note = decrypt_note(&old_key, &record)?;
            rewritten.push(encrypt_note(&new_key, record.id, &note, record.updated_at)?);
        }

        // Canary first: from here on the new passphrase owns the vault.
        store.put(STORE_META, KEY_CANARY, &new_token).await?;
        for record in &rewritten {
            store
                .put(
                    STORE_NOTES,
                    &record.id.to_string(),
                    &serde_json::to_string(record)?,
                )
                .await?;
        }
        store_index(&new_key, store.as_ref(), &index).await?;

        if let SessionState::Unlocked(unlocked) = &mut *state {
            // Dropping the old key zeroizes it
            unlocked.master_key = new_key;
        }
        drop(state);
        self.session.record_activity().await;
        tracing::info!("vault passphrase changed");
        Ok(())
    }
}

fn note_aad(id: Uuid) -> Vec<u8> {
    let mut aad = Vec::with_capacity(NOTE_AAD_CONTEXT.len() + 16);
    aad.extend_from_slice(NOTE_AAD_CONTEXT);
    aad.extend_from_slice(id.as_bytes());
    aad
}

pub(crate) fn encrypt_note(
    key: &MasterKey,
    id: Uuid,
    note: &Note,
    updated_at: DateTime<Utc>,
) -> Result<EncryptedNote> {
    let plaintext = serde_json::to_vec(note)?;
    let nonce = aead::generate_nonce()?;
    let ciphertext = aead::seal(key, &nonce, &plaintext, &note_aad(id))?;
    Ok(EncryptedNote {
        id,
        nonce: base64url_encode(&nonce),
        ciphertext: base64url_encode(&ciphertext),
        updated_at,
    })
}

pub(crate) fn decrypt_note(key: &MasterKey, record: &EncryptedNote) -> Result<Note> {
    let nonce = decode_nonce(&record.nonce)?;
    let ciphertext = base64url_decode(&record.ciphertext)
        .map_err(|_| VaultError::Corrupt("invalid note ciphertext encoding".into()))?;
    let plaintext = aead::open(key, &nonce, &ciphertext, &note_aad(record.id))?;
    Ok(serde_json::from_slice(&plaintext)?)
}

pub(crate) async fn load_index(key: &MasterKey, store: &dyn DurableStore) -> Result<NoteIndex> {
    let Some(raw) = store.get(STORE_NOTES, INDEX_KEY).await? else {
        return Ok(NoteIndex::default());
    };
    let sealed: SealedRecord = serde_json::from_str(&raw)?;
    let nonce = decode_nonce(&sealed.nonce)?;
    let ciphertext = base64url_decode(&sealed.ciphertext)
        .map_err(|_| VaultError::Corrupt("invalid index encoding".into()))?;
    let plaintext = aead::open(key, &nonce, &ciphertext, INDEX_AAD)?;
    Ok(serde_json::from_slice(&plaintext)?)
}

pub(crate) async fn store_index(
    key: &MasterKey,
    store: &dyn DurableStore,
    index: &NoteIndex,
) -> Result<()> {
    let plaintext = serde_json::to_vec(index)?;
    let nonce = aead::generate_nonce()?;
    let ciphertext = aead::seal(key, &nonce, &plaintext, INDEX_AAD)?;
    let sealed = SealedRecord {
        nonce: base64url_encode(&nonce),
        ciphertext: base64url_encode(&ciphertext),
    };
    store
        .put(STORE_NOTES, INDEX_KEY, &serde_json::to_string(&sealed)?)
        .await
}

fn decode_nonce(encoded: &str) -> Result<[u8; aead::NONCE_LENGTH]> {
    base64url_decode(encoded)
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| VaultError::Corrupt("invalid record nonce".into()))
}
