//! Distributed lock built on blob leases.

use crate::blob::{BlobPath, BlobStore, LeaseId, LeaseState, UploadOptions};
use crate::error::{StorageError, StorageResult};
use bytes::Bytes;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Provider name for this lock implementation.
pub const LOCK_PROVIDER_NAME: &str = "blob-lease";

const MIN_LEASE_TTL: Duration = Duration::from_secs(15);
const MAX_LEASE_TTL: Duration = Duration::from_secs(60);
const BACKOFF_BASE: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Sanitize a lock key into a blob name stem.
///
/// Characters that are path separators or otherwise unsafe in blob names
/// (`/ \ : ? # @ [ ]`) map to `-`.
pub fn sanitize_lock_key(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '?' | '#' | '@' | '[' | ']' => '-',
            other => other,
        })
        .collect()
}

/// Manager handing out lease-backed exclusive locks.
pub struct LockManager {
    store: Arc<dyn BlobStore>,
    container: String,
}

impl LockManager {
    /// Create a lock manager writing lock blobs into `container`.
    pub fn new(store: Arc<dyn BlobStore>, container: impl Into<String>) -> Self {
        Self {
            store,
            container: container.into(),
        }
    }

    fn lock_path(&self, key: &str) -> BlobPath {
        BlobPath::new(
            self.container.clone(),
            format!("{}.lock", sanitize_lock_key(key)),
        )
    }

    /// Try to acquire the lock for `key`.
    ///
    /// The lease TTL is clamped to the 15..=60s range the backend supports.
    /// While the lease is held elsewhere, acquisition backs off with
    /// jittered doubling delays until `acquire_timeout` elapses, at which
    /// point `Ok(None)` is returned. A zero timeout means a single attempt.
    pub async fn acquire(
        &self,
        key: &str,
        ttl: Duration,
        acquire_timeout: Duration,
    ) -> StorageResult<Option<LockHandle>> {
        let ttl = ttl.clamp(MIN_LEASE_TTL, MAX_LEASE_TTL);
        let path = self.lock_path(key);
        let deadline = Instant::now() + acquire_timeout;

        self.store
            .create_container_if_absent(&self.container)
            .await?;

        match self
            .store
            .upload(
                &path,
                Bytes::new(),
                UploadOptions::default().if_none_match_any(),
            )
            .await
        {
            Ok(_) | Err(StorageError::AlreadyExists(_)) => {}
            Err(err) => return Err(err),
        }

        let mut backoff = BACKOFF_BASE;
        loop {
            match self.store.acquire_lease(&path, ttl).await {
                Ok(lease_id) => {
                    debug!(key, lease = %lease_id, "lock acquired");
                    return Ok(Some(LockHandle::start(
                        self.store.clone(),
                        path,
                        key.to_string(),
                        lease_id,
                        ttl,
                    )));
                }
                Err(StorageError::LeaseHeld(_)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(key, "lock acquisition timed out");
                        return Ok(None);
                    }

                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..50));
                    let remaining = deadline - now;
                    tokio::time::sleep((backoff + jitter).min(remaining)).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Whether the lock for `key` is currently held.
    pub async fn is_locked(&self, key: &str) -> StorageResult<bool> {
        match self.store.get_properties(&self.lock_path(key)).await {
            Ok(props) => Ok(props.lease_state == LeaseState::Leased),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// A held lock. Renews its lease at ttl/3 intervals until released or
/// dropped; release breaks the lease so the blob is immediately
/// re-acquirable.
pub struct LockHandle {
    lock_id: LeaseId,
    key: String,
    path: BlobPath,
    store: Arc<dyn BlobStore>,
    lost: Arc<AtomicBool>,
    renew_task: JoinHandle<()>,
}

impl LockHandle {
    fn start(
        store: Arc<dyn BlobStore>,
        path: BlobPath,
        key: String,
        lock_id: LeaseId,
        ttl: Duration,
    ) -> Self {
        let lost = Arc::new(AtomicBool::new(false));

        let renew_store = store.clone();
        let renew_path = path.clone();
        let renew_id = lock_id.clone();
        let renew_lost = lost.clone();
        let renew_task = tokio::spawn(async move {
            let interval = ttl / 3;
            loop {
                tokio::time::sleep(interval).await;
                if let Err(err) = renew_store.renew_lease(&renew_path, &renew_id).await {
                    warn!(path = %renew_path, %err, "lease renewal failed, lock lost");
                    renew_lost.store(true, Ordering::SeqCst);
                    break;
                }
            }
        });

        Self {
            lock_id,
            key,
            path,
            store,
            lost,
            renew_task,
        }
    }

    /// Identifier of the underlying lease.
    pub fn lock_id(&self) -> &LeaseId {
        &self.lock_id
    }

    /// The key this lock guards.
    pub fn lock_key(&self) -> &str {
        &self.key
    }

    /// Whether the lease has been lost to a failed renewal.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Release the lock, breaking the lease.
    pub async fn release(self) -> StorageResult<()> {
        self.renew_task.abort();

        if self.lost.load(Ordering::SeqCst) {
            return Err(StorageError::LeaseLost(self.path.to_string()));
        }

        self.store.break_lease(&self.path).await
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.renew_task.abort();
    }
}
