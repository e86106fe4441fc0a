//! Cancellable crypto job runner.
//!
//! KDF and AEAD passes are CPU-bound; they run on the blocking pool so the
//! interaction thread stays responsive through a multi-hundred-thousand
//! iteration derivation. Every submission takes a monotonically increasing
//! job id and only the latest job's result is committed — a decode triggered
//! by superseded input can never race its result in after a newer request
//! has started. Cancellation is an outcome, not an error: it shares no code
//! path with authenticity failures, so retries are not miscounted as
//! failures by any future lockout heuristic.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use nullid_crypto::envelope::{self, EnvelopeMeta};
use nullid_crypto::kdf::KdfPolicy;

use crate::error::{Result, VaultError};

/// How a job ended. `Cancelled` covers both an explicit cancel signal and
/// supersession by a newer job.
#[derive(Debug, PartialEq, Eq)]
pub enum JobOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> JobOutcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            JobOutcome::Completed(value) => Some(value),
            JobOutcome::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobOutcome::Cancelled)
    }
}

/// Sender half of a cancellation pair.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half; checked at each KDF/AEAD suspension point.
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// A signal that never fires, for fire-and-forget callers. The dropped
    /// sender leaves the watched value at `false` forever.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }
}

/// Create a linked cancel handle/signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Runs seal/open jobs for one input surface. Submitting a new job
/// supersedes every older one still in flight on this runner.
pub struct CryptoJobs {
    next_id: AtomicU64,
    latest: AtomicU64,
}

impl CryptoJobs {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            latest: AtomicU64::new(0),
        }
    }

    fn begin(&self) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.latest.store(id, Ordering::SeqCst);
        id
    }

    fn is_latest(&self, id: u64) -> bool {
        self.latest.load(Ordering::SeqCst) == id
    }

    /// Seal plaintext into an envelope token off-thread.
    pub async fn seal(
        &self,
        signal: &CancelSignal,
        passphrase: String,
        plaintext: Vec<u8>,
        policy: KdfPolicy,
        meta: Option<EnvelopeMeta>,
    ) -> Result<JobOutcome<String>> {
        let id = self.begin();
        if signal.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }
        let token =
            tokio::task::spawn_blocking(move || envelope::seal(&passphrase, &plaintext, policy, meta))
                .await
                .map_err(|e| VaultError::Task(e.to_string()))??;
        if signal.is_cancelled() || !self.is_latest(id) {
            return Ok(JobOutcome::Cancelled);
        }
        Ok(JobOutcome::Completed(token))
    }

    /// Open an envelope token off-thread.
    ///
    /// Parsing is pure and runs inline; the key derivation is the blocking
    /// pass. Cancellation and supersession are checked between derivation
    /// and the AEAD open, and again before the result is committed.
    pub async fn open(
        &self,
        signal: &CancelSignal,
        passphrase: String,
        token: String,
    ) -> Result<JobOutcome<Vec<u8>>> {
        let id = self.begin();
        let parsed = envelope::parse(&token)?;
        if signal.is_cancelled() {
            return Ok(JobOutcome::Cancelled);
        }
        let (parsed, key) = tokio::task::spawn_blocking(move || {
            let key = parsed.derive_key(&passphrase)?;
            Ok::<_, nullid_crypto::CryptoError>((parsed, key))
        })
        .await
        .map_err(|e| VaultError::Task(e.to_string()))??;
        if signal.is_cancelled() || !self.is_latest(id) {
            return Ok(JobOutcome::Cancelled);
        }
        let plaintext = parsed.open_with_key(&key)?;
        if !self.is_latest(id) {
            return Ok(JobOutcome::Cancelled);
        }
        Ok(JobOutcome::Completed(plaintext))
    }
}

impl Default for CryptoJobs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nullid_crypto::error::CryptoError;
    use nullid_crypto::kdf::{KdfHash, MIN_ITERATIONS};

    fn fast_policy() -> KdfPolicy {
        KdfPolicy::Custom {
            hash: KdfHash::Sha256,
            iterations: MIN_ITERATIONS,
        }
    }

    #[tokio::test]
    async fn seal_open_round_trip() {
        let jobs = CryptoJobs::new();
        let token = jobs
            .seal(
                &CancelSignal::never(),
                "pw".into(),
                b"payload".to_vec(),
                fast_policy(),
                None,
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        let plaintext = jobs
            .open(&CancelSignal::never(), "pw".into(), token)
            .await
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(plaintext, b"payload");
    }

    #[tokio::test]
    async fn pre_cancelled_job_reports_cancelled() {
        let jobs = CryptoJobs::new();
        let (handle, signal) = cancellation();
        handle.cancel();
        let outcome = jobs
            .seal(&signal, "pw".into(), b"x".to_vec(), fast_policy(), None)
            .await
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[tokio::test]
    async fn superseded_job_is_cancelled_not_failed() {
        let jobs = CryptoJobs::new();
        let signal = CancelSignal::never();
        let token = jobs
            .seal(&signal, "pw".into(), b"x".to_vec(), fast_policy(), None)
            .await
            .unwrap()
            .completed()
            .unwrap();

        let first = jobs.open(&signal, "pw".into(), token.clone());
        let second = jobs.open(&signal, "pw".into(), token);
        let (first, second) = tokio::join!(first, second);
        // The later submission wins; the earlier one must not commit.
        assert!(first.unwrap().is_cancelled());
        assert_eq!(second.unwrap().completed().unwrap(), b"x");
    }

    #[tokio::test]
    async fn failure_is_an_error_not_cancellation() {
        let jobs = CryptoJobs::new();
        let token = jobs
            .seal(
                &CancelSignal::never(),
                "pw".into(),
                b"x".to_vec(),
                fast_policy(),
                None,
            )
            .await
            .unwrap()
            .completed()
            .unwrap();
        let result = jobs
            .open(&CancelSignal::never(), "wrong".into(), token)
            .await;
        assert!(matches!(
            result,
            Err(VaultError::Crypto(CryptoError::Authenticity))
        ));
    }

    #[tokio::test]
    async fn malformed_token_is_format_error() {
        let jobs = CryptoJobs::new();
        let result = jobs
            .open(&CancelSignal::never(), "pw".into(), "garbage".into())
            .await;
        assert!(matches!(
            result,
            Err(VaultError::Crypto(CryptoError::MalformedToken(_)))
        ));
    }
}
