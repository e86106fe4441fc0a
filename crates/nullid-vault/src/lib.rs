//! Passphrase-unlocked vault of encrypted notes.
//!
//! One live [`session::VaultSession`] per process owns the locked/unlocked
//! lifecycle and the master key; [`records::NoteStore`] seals individual
//! notes under that key; [`export::SnapshotExporter`] moves whole vaults
//! through signed or envelope-sealed snapshots; [`jobs::CryptoJobs`] runs
//! standalone envelope work off-thread with cancellation.

pub mod error;
pub mod export;
pub mod jobs;
pub mod records;
pub mod session;
pub mod store;

pub use error::{Result, VaultError};
pub use export::{ImportSummary, SnapshotExporter, VaultSnapshot, SNAPSHOT_SCHEMA_VERSION};
pub use jobs::{cancellation, CancelHandle, CancelSignal, CryptoJobs, JobOutcome};
pub use records::{EncryptedNote, IndexEntry, Note, NoteStore};
pub use session::{LockCallback, LockReason, SessionOptions, VaultSession};
pub use store::{DurableStore, MemoryStore, StoreCapability};
