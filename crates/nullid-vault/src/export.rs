//! Vault snapshot export and verified import.
//!
//! Two file kinds: a plain JSON snapshot (schema-versioned, content-hashed,
//! optionally signed) and an encrypted snapshot — the same JSON sealed as a
//! single envelope under a caller-supplied export passphrase. Snapshots
//! carry records exactly as stored, still under the vault master key, so an
//! import restores a vault that the original passphrase unlocks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use nullid_crypto::envelope::{self, EnvelopeMeta};
use nullid_crypto::kdf::KdfPolicy;
use nullid_crypto::signed::{create_signed_payload, verify_and_import, SignedPayload};

use crate::error::{Result, VaultError};
use crate::records::{self, EncryptedNote, INDEX_KEY};
use crate::session::{VaultSession, KEY_CANARY, STORE_META, STORE_NOTES};

/// Snapshot schema this build reads and writes. Anything else is rejected
/// at import, never coerced.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Everything needed to reconstruct a vault, with all secrets still sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSnapshot {
    /// Canary envelope token, exactly as stored.
    pub canary: String,
    /// Encrypted note index record, exactly as stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
    pub notes: Vec<EncryptedNote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub notes: usize,
}

/// Snapshot export/import over a [`VaultSession`].
pub struct SnapshotExporter {
    session: Arc<VaultSession>,
}

impl SnapshotExporter {
    pub fn new(session: Arc<VaultSession>) -> Self {
        Self { session }
    }

    /// Export the vault as a signed-payload JSON snapshot. Requires an
    /// unlocked session (the note index must be readable to enumerate
    /// records). With a signing passphrase, a detached MAC covers the
    /// canonical snapshot bytes.
    pub async fn export(&self, signing_passphrase: Option<&str>) -> Result<SignedPayload> {
        let payload = {
            let unlocked = self.session.read_unlocked().await?;
            let store = self.session.store();
            let canary = store
                .get(STORE_META, KEY_CANARY)
                .await?
                .ok_or_else(|| VaultError::Corrupt("vault has no canary".into()))?;
            let index_raw = store.get(STORE_NOTES, INDEX_KEY).await?;
            let index = records::load_index(unlocked.master_key(), store.as_ref()).await?;

            let mut notes = Vec::with_capacity(index.entries.len());
            for entry in &index.entries {
                let raw = store
                    .get(STORE_NOTES, &entry.id.to_string())
                    .await?
                    .ok_or_else(|| {
                        VaultError::Corrupt("index references a missing note".into())
                    })?;
                notes.push(serde_json::from_str::<EncryptedNote>(&raw)?);
            }

            serde_json::to_value(VaultSnapshot {
                canary,
                index: index_raw,
                notes,
            })?
        };

        // MAC-key derivation is a full KDF pass
        let signing_passphrase = signing_passphrase.map(str::to_owned);
        let signed = tokio::task::spawn_blocking(move || {
            create_signed_payload(&payload, SNAPSHOT_SCHEMA_VERSION, signing_passphrase.as_deref())
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;

        self.session.record_activity().await;
        Ok(signed)
    }

    /// Export the whole snapshot sealed as one envelope under an export
    /// passphrase. The signed-metadata block, when requested, is attached
    /// before sealing.
    pub async fn export_encrypted(
        &self,
        export_passphrase: &str,
        policy: KdfPolicy,
        signing_passphrase: Option<&str>,
    ) -> Result<String> {
        let signed = self.export(signing_passphrase).await?;
        let bytes = serde_json::to_vec(&signed)?;
        let export_passphrase = export_passphrase.to_owned();
        let token = tokio::task::spawn_blocking(move || {
            envelope::seal(
                &export_passphrase,
                &bytes,
                policy,
                Some(EnvelopeMeta {
                    mime: Some("application/json".to_string()),
                    name: Some("vault-snapshot.json".to_string()),
                }),
            )
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;
        Ok(token)
    }

    /// Verify a snapshot and replace the stored vault with it.
    ///
    /// The content hash is checked before anything else; a mismatch never
    /// partially applies. With `require_verified`, an unsigned snapshot or a
    /// missing verification passphrase rejects the import. The session is
    /// locked before the stores are touched — the imported vault opens with
    /// its own passphrase.
    pub async fn import(
        &self,
        signed: &SignedPayload,
        verification_passphrase: Option<&str>,
        require_verified: bool,
    ) -> Result<ImportSummary> {
        let signed = signed.clone();
        let verification_passphrase = verification_passphrase.map(str::to_owned);
        let payload = tokio::task::spawn_blocking(move || {
            verify_and_import(
                &signed,
                verification_passphrase.as_deref(),
                require_verified,
                SNAPSHOT_SCHEMA_VERSION,
            )
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;

        let snapshot: VaultSnapshot = serde_json::from_value(payload)?;
        // The canary must at least be a structurally valid envelope before
        // the existing vault is overwritten.
        envelope::parse(&snapshot.canary)?;

        self.session.lock().await;
        let store = self.session.store();
        store.clear(STORE_NOTES).await?;
        store.put(STORE_META, KEY_CANARY, &snapshot.canary).await?;
        if let Some(index) = &snapshot.index {
            store.put(STORE_NOTES, INDEX_KEY, index).await?;
        }
        for record in &snapshot.notes {
            store
                .put(
                    STORE_NOTES,
                    &record.id.to_string(),
                    &serde_json::to_string(record)?,
                )
                .await?;
        }
        info!(notes = snapshot.notes.len(), "vault snapshot imported");
        Ok(ImportSummary {
            notes: snapshot.notes.len(),
        })
    }

    /// Open an encrypted snapshot token and import its contents.
    pub async fn import_encrypted(
        &self,
        token: &str,
        export_passphrase: &str,
        verification_passphrase: Option<&str>,
        require_verified: bool,
    ) -> Result<ImportSummary> {
        let token = token.to_owned();
        let export_passphrase = export_passphrase.to_owned();
        let bytes = tokio::task::spawn_blocking(move || envelope::open(&export_passphrase, &token))
            .await
            .map_err(|e| VaultError::Task(e.to_string()))??;
        let signed: SignedPayload = serde_json::from_slice(&bytes)?;
        self.import(&signed, verification_passphrase, require_verified)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Note, NoteStore};
    use crate::session::SessionOptions;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use nullid_crypto::error::CryptoError;
    use nullid_crypto::kdf::{KdfHash, MIN_ITERATIONS};
    use serde_json::json;
    use std::time::Duration;

    fn fast_policy() -> KdfPolicy {
        KdfPolicy::Custom {
            hash: KdfHash::Sha256,
            iterations: MIN_ITERATIONS,
        }
    }

    async fn vault_with_notes() -> (Arc<VaultSession>, NoteStore, SnapshotExporter) {
        let session = VaultSession::new(
            Arc::new(MemoryStore::new()),
            SessionOptions {
                auto_lock: Duration::from_secs(3600),
                lock_on_hide: true,
            },
        );
        session.create("pw", fast_policy()).await.unwrap();
        session.unlock("pw").await.unwrap();
        let notes = NoteStore::new(Arc::clone(&session));
        for title in ["alpha", "beta"] {
            notes
                .save(
                    None,
                    &Note {
                        title: title.to_string(),
                        body: format!("{title} body"),
                        tags: vec![],
                        created_at: Utc::now(),
                    },
                )
                .await
                .unwrap();
        }
        let exporter = SnapshotExporter::new(Arc::clone(&session));
        (session, notes, exporter)
    }

    #[tokio::test]
    async fn export_requires_unlocked() {
        let (session, _notes, exporter) = vault_with_notes().await;
        session.lock().await;
        assert!(matches!(
            exporter.export(None).await,
            Err(VaultError::Locked)
        ));
    }

    #[tokio::test]
    async fn snapshot_round_trip_into_fresh_vault() {
        let (_session, _notes, exporter) = vault_with_notes().await;
        let signed = exporter.export(None).await.unwrap();
        assert_eq!(signed.schema_version, SNAPSHOT_SCHEMA_VERSION);

        let target = VaultSession::new(Arc::new(MemoryStore::new()), SessionOptions::default());
        let importer = SnapshotExporter::new(Arc::clone(&target));
        let summary = importer.import(&signed, None, false).await.unwrap();
        assert_eq!(summary.notes, 2);

        target.unlock("pw").await.unwrap();
        let restored = NoteStore::new(Arc::clone(&target));
        assert_eq!(restored.list().await.unwrap().len(), 2);
        assert_eq!(restored.search("alpha").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn signed_snapshot_verifies_and_rejects_tamper() {
        let (_session, _notes, exporter) = vault_with_notes().await;
        let mut signed = exporter.export(Some("sig-pass")).await.unwrap();

        let target = VaultSession::new(Arc::new(MemoryStore::new()), SessionOptions::default());
        let importer = SnapshotExporter::new(Arc::clone(&target));
        importer
            .import(&signed, Some("sig-pass"), true)
            .await
            .unwrap();

        // Flip part of the payload: hash check blocks the import
        signed.payload["notes"] = json!([]);
        assert!(matches!(
            importer.import(&signed, Some("sig-pass"), true).await,
            Err(VaultError::Crypto(CryptoError::HashMismatch))
        ));
    }

    #[tokio::test]
    async fn unsigned_snapshot_rejected_when_verification_required() {
        let (_session, _notes, exporter) = vault_with_notes().await;
        let signed = exporter.export(None).await.unwrap();
        let importer = SnapshotExporter::new(VaultSession::new(
            Arc::new(MemoryStore::new()),
            SessionOptions::default(),
        ));
        assert!(matches!(
            importer.import(&signed, None, true).await,
            Err(VaultError::Crypto(CryptoError::SignatureMissing))
        ));
    }

    #[tokio::test]
    async fn schema_version_mismatch_rejected() {
        let (_session, _notes, exporter) = vault_with_notes().await;
        let mut signed = exporter.export(None).await.unwrap();
        signed.schema_version = SNAPSHOT_SCHEMA_VERSION + 1;
        let importer = SnapshotExporter::new(VaultSession::new(
            Arc::new(MemoryStore::new()),
            SessionOptions::default(),
        ));
        assert!(matches!(
            importer.import(&signed, None, false).await,
            Err(VaultError::Crypto(CryptoError::SchemaVersion { .. }))
        ));
    }

    #[tokio::test]
    async fn encrypted_snapshot_round_trip() {
        let (_session, _notes, exporter) = vault_with_notes().await;
        let token = exporter
            .export_encrypted("export-pw", fast_policy(), Some("sig-pass"))
            .await
            .unwrap();
        assert!(token.starts_with("NULLID:ENC:"));

        let target = VaultSession::new(Arc::new(MemoryStore::new()), SessionOptions::default());
        let importer = SnapshotExporter::new(Arc::clone(&target));
        let summary = importer
            .import_encrypted(&token, "export-pw", Some("sig-pass"), true)
            .await
            .unwrap();
        assert_eq!(summary.notes, 2);
        target.unlock("pw").await.unwrap();
    }

    #[tokio::test]
    async fn encrypted_snapshot_wrong_export_passphrase() {
        let (_session, _notes, exporter) = vault_with_notes().await;
        let token = exporter
            .export_encrypted("export-pw", fast_policy(), None)
            .await
            .unwrap();
        let importer = SnapshotExporter::new(VaultSession::new(
            Arc::new(MemoryStore::new()),
            SessionOptions::default(),
        ));
        assert!(matches!(
            importer.import_encrypted(&token, "wrong", None, false).await,
            Err(VaultError::Crypto(CryptoError::Authenticity))
        ));
    }

    #[tokio::test]
    async fn import_locks_the_session() {
        let (_session, _notes, exporter) = vault_with_notes().await;
        let signed = exporter.export(None).await.unwrap();

        let target = VaultSession::new(Arc::new(MemoryStore::new()), SessionOptions::default());
        target.create("other", fast_policy()).await.unwrap();
        target.unlock("other").await.unwrap();
        let importer = SnapshotExporter::new(Arc::clone(&target));
        importer.import(&signed, None, false).await.unwrap();

        assert!(!target.is_unlocked().await);
        assert!(matches!(
            target.unlock("other").await,
            Err(VaultError::UnlockFailed)
        ));
        target.unlock("pw").await.unwrap();
    }
}
