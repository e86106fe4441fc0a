//! Vault session lifecycle: unlock by canary, idle auto-lock, panic lock.
//!
//! The session is either `Locked` or `Unlocked`; the master key is owned by
//! the `Unlocked` variant and zeroizes when the variant is dropped, so no
//! code path can reach key material after a lock transition. Note operations
//! hold the read half of the state lock for their whole duration; lock
//! transitions take the write half, which lets in-flight operations finish
//! under a still-valid key and prevents new ones from starting.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{watch, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::time::Instant;
use tracing::{info, warn};

use nullid_crypto::envelope;
use nullid_crypto::error::CryptoError;
use nullid_crypto::kdf::{KdfPolicy, MasterKey};

use crate::error::{Result, VaultError};
use crate::store::DurableStore;

pub(crate) const STORE_META: &str = "vault.meta";
pub(crate) const STORE_NOTES: &str = "vault.notes";
pub(crate) const KEY_CANARY: &str = "canary";

/// Fixed known plaintext of the canary envelope. AEAD tag verification on
/// it is the sole passphrase check; no separate password hash is stored.
pub(crate) const CANARY_PLAINTEXT: &[u8] = b"nullid:canary:v1";

/// What triggered a lock transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Timeout,
    VisibilityHidden,
    Panic,
    Explicit,
}

/// Invoked after every Unlocked → Locked transition.
pub type LockCallback = Arc<dyn Fn(LockReason) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Idle window before the session locks itself.
    pub auto_lock: Duration,
    /// Lock immediately when the hosting surface is hidden.
    pub lock_on_hide: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            auto_lock: Duration::from_secs(300),
            lock_on_hide: true,
        }
    }
}

pub(crate) struct Unlocked {
    pub(crate) master_key: MasterKey,
    pub(crate) unlocked_at: DateTime<Utc>,
}

pub(crate) enum SessionState {
    Locked,
    Unlocked(Unlocked),
}

/// One live session per process; hold it in an `Arc` and pass it to the
/// components that need it.
pub struct VaultSession {
    store: Arc<dyn DurableStore>,
    options: SessionOptions,
    state: RwLock<SessionState>,
    /// Single source of truth for the auto-lock deadline. `None` while
    /// locked. The watcher task wakes on the smallest (only) deadline.
    deadline_tx: watch::Sender<Option<Instant>>,
    on_lock: Mutex<Option<LockCallback>>,
}

impl VaultSession {
    /// Create a session over a durable store and start the auto-lock
    /// watcher. Must run inside a tokio runtime.
    pub fn new(store: Arc<dyn DurableStore>, options: SessionOptions) -> Arc<Self> {
        let capability = store.capability();
        if let Some(reason) = &capability.fallback_reason {
            warn!(
                backend = %capability.backend,
                reason = %reason,
                "durable store fallback engaged"
            );
        }

        let (deadline_tx, deadline_rx) = watch::channel(None);
        let session = Arc::new(Self {
            store,
            options,
            state: RwLock::new(SessionState::Locked),
            deadline_tx,
            on_lock: Mutex::new(None),
        });
        tokio::spawn(auto_lock_watcher(Arc::downgrade(&session), deadline_rx));
        session
    }

    /// Register a callback observing lock transitions.
    pub fn set_lock_callback(&self, callback: LockCallback) {
        *self.on_lock.lock() = Some(callback);
    }

    /// Initialize a vault: seal and store the canary envelope. The session
    /// stays locked; call [`unlock`](Self::unlock) afterwards.
    pub async fn create(&self, passphrase: &str, policy: KdfPolicy) -> Result<()> {
        if self.store.get(STORE_META, KEY_CANARY).await?.is_some() {
            return Err(VaultError::AlreadyInitialized);
        }
        let passphrase = passphrase.to_owned();
        let (token, _key) = tokio::task::spawn_blocking(move || {
            envelope::seal_keyed(&passphrase, CANARY_PLAINTEXT, policy, None)
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;
        self.store.put(STORE_META, KEY_CANARY, &token).await?;
        info!("vault created");
        Ok(())
    }

    /// Attempt to unlock with a candidate passphrase.
    ///
    /// A missing canary, a storage failure, a corrupt envelope, and a wrong
    /// passphrase all collapse into the same [`VaultError::UnlockFailed`];
    /// the caller learns nothing about which it was.
    pub async fn unlock(&self, passphrase: &str) -> Result<()> {
        let token = match self.store.get(STORE_META, KEY_CANARY).await {
            Ok(Some(token)) => token,
            Ok(None) | Err(_) => return Err(VaultError::UnlockFailed),
        };

        let passphrase = passphrase.to_owned();
        let key = tokio::task::spawn_blocking(move || -> std::result::Result<MasterKey, CryptoError> {
            let parsed = envelope::parse(&token)?;
            let key = parsed.derive_key(&passphrase)?;
            let plaintext = parsed.open_with_key(&key)?;
            if plaintext != CANARY_PLAINTEXT {
                return Err(CryptoError::Authenticity);
            }
            Ok(key)
        })
        .await
        .map_err(|_| VaultError::UnlockFailed)?
        .map_err(|_| VaultError::UnlockFailed)?;

        let mut state = self.state.write().await;
        *state = SessionState::Unlocked(Unlocked {
            master_key: key,
            unlocked_at: Utc::now(),
        });
        drop(state);
        self.touch_deadline();
        info!("vault unlocked");
        Ok(())
    }

    /// User-initiated lock. Identical effect to a timeout.
    pub async fn lock(&self) {
        self.lock_with_reason(LockReason::Explicit).await;
    }

    /// Always-available immediate lock, independent of any timer.
    pub async fn panic_lock(&self) {
        self.lock_with_reason(LockReason::Panic).await;
    }

    /// The hosting surface was hidden or backgrounded.
    pub async fn visibility_hidden(&self) {
        if self.options.lock_on_hide {
            self.lock_with_reason(LockReason::VisibilityHidden).await;
        }
    }

    /// Push the auto-lock deadline forward by the configured window.
    /// No-op while locked.
    pub async fn record_activity(&self) {
        if matches!(*self.state.read().await, SessionState::Unlocked(_)) {
            self.touch_deadline();
        }
    }

    pub async fn is_unlocked(&self) -> bool {
        matches!(*self.state.read().await, SessionState::Unlocked(_))
    }

    pub async fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        match &*self.state.read().await {
            SessionState::Unlocked(u) => Some(u.unlocked_at),
            SessionState::Locked => None,
        }
    }

    /// Active storage backend and fallback reason, for display to the user.
    pub fn store_capability(&self) -> crate::store::StoreCapability {
        self.store.capability()
    }

    /// Time remaining until the auto-lock fires, for a countdown display.
    /// `None` while locked.
    pub fn time_until_lock(&self) -> Option<Duration> {
        let deadline = (*self.deadline_tx.borrow())?;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Delete the canary and every note from durable storage. Locks first
    /// if needed; afterwards there is nothing left to unlock until a vault
    /// is re-created.
    pub async fn wipe(&self) -> Result<()> {
        self.lock_with_reason(LockReason::Explicit).await;
        self.store.delete(STORE_META, KEY_CANARY).await?;
        self.store.clear(STORE_NOTES).await?;
        warn!("vault wiped");
        Ok(())
    }

    fn touch_deadline(&self) {
        let _ = self
            .deadline_tx
            .send(Some(Instant::now() + self.options.auto_lock));
    }

    async fn lock_with_reason(&self, reason: LockReason) {
        let mut state = self.state.write().await;
        if matches!(*state, SessionState::Locked) {
            return;
        }
        // Dropping the Unlocked variant zeroizes the master key.
        *state = SessionState::Locked;
        drop(state);
        let _ = self.deadline_tx.send(None);
        info!(?reason, "vault locked");
        let callback = self.on_lock.lock().clone();
        if let Some(callback) = callback {
            callback(reason);
        }
    }

    async fn lock_if_expired(&self) {
        let expired = matches!(
            *self.deadline_tx.borrow(),
            Some(deadline) if Instant::now() >= deadline
        );
        if expired {
            self.lock_with_reason(LockReason::Timeout).await;
        }
    }

    /// Read access to the unlocked state. The returned guard keeps the key
    /// valid until dropped; lock transitions wait for it.
    pub(crate) async fn read_unlocked(&self) -> Result<UnlockedGuard<'_>> {
        let guard = self.state.read().await;
        if matches!(*guard, SessionState::Locked) {
            return Err(VaultError::Locked);
        }
        Ok(UnlockedGuard { guard })
    }

    /// Exclusive access to the session state, for operations that swap the
    /// master key. Serializes against every note operation and lock
    /// transition.
    pub(crate) async fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().await
    }

    pub(crate) fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }
}

/// Read guard proving the session was unlocked when acquired.
pub(crate) struct UnlockedGuard<'a> {
    guard: RwLockReadGuard<'a, SessionState>,
}

impl UnlockedGuard<'_> {
    pub(crate) fn master_key(&self) -> &MasterKey {
        match &*self.guard {
            SessionState::Unlocked(u) => &u.master_key,
            // Guard is only constructed from an unlocked state and the read
            // lock is held for its lifetime.
            SessionState::Locked => unreachable!("unlocked guard over locked state"),
        }
    }
}

/// Single wake driven by the only deadline; reset-on-activity arrives via
/// the watch channel.
async fn auto_lock_watcher(
    session: Weak<VaultSession>,
    mut deadline_rx: watch::Receiver<Option<Instant>>,
) {
    loop {
        let deadline = *deadline_rx.borrow_and_update();
        match deadline {
            None => {
                if deadline_rx.changed().await.is_err() {
                    break;
                }
            }
            Some(deadline) => {
                tokio::select! {
                    () = tokio::time::sleep_until(deadline) => {
                        match session.upgrade() {
                            Some(session) => session.lock_if_expired().await,
                            None => break,
                        }
                        // The lock transition publishes a deadline change;
                        // wait for it so an already-handled deadline does
                        // not spin the loop.
                        if deadline_rx.changed().await.is_err() {
                            break;
                        }
                    }
                    changed = deadline_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }
}
