//! Distributed lock service.
//!
//! Each process replica owns one [`LockService`] with a stable, unique
//! `owner_id`. Acquiring a named lease is a two-step handshake against the
//! shared [`LockStore`]: a conditional claim (`try_acquire`) followed by a
//! read-back (`verify`) that catches the race where two replicas both claim
//! an expiring row. A held lease is kept alive by a background refresher
//! that extends it every `refresh_interval`; if a refresh fails for any
//! reason the refresher drops the in-memory entry and exits — the next
//! scheduled tick simply attempts re-acquisition.
//!
//! Store outages never propagate as errors from `acquire`: the caller sees
//! `false` (a skipped tick) and the outage is logged at warn level.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use floodgate_store::LockStore;

use crate::error::LockError;

/// Lease timing parameters.
///
/// The refresh interval must be below half the lease duration so a held
/// lease survives at least one missed refresh before another replica can
/// take it over.
#[derive(Debug, Clone, Copy)]
pub struct LockConfig {
    /// Lease duration `T` — how long a claim lasts without a refresh.
    pub lease_duration: Duration,
    /// Refresh interval `R`, with `R < T/2`.
    pub refresh_interval: Duration,
}

impl LockConfig {
    /// Build a config, enforcing `refresh_interval < lease_duration / 2`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::InvalidRefreshInterval`] when the margin is too
    /// thin.
    pub fn new(lease_duration: Duration, refresh_interval: Duration) -> Result<Self, LockError> {
        if refresh_interval * 2 >= lease_duration {
            return Err(LockError::InvalidRefreshInterval {
                refresh_ms: refresh_interval.as_millis(),
                lease_ms: lease_duration.as_millis(),
            });
        }
        Ok(Self {
            lease_duration,
            refresh_interval,
        })
    }
}

impl Default for LockConfig {
    /// Five-minute leases refreshed every minute.
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(60),
        }
    }
}

/// A held lease's in-process bookkeeping.
struct ActiveLease {
    /// Distinguishes this refresher from one belonging to a later
    /// re-acquisition of the same name.
    generation: u64,
    refresher: JoinHandle<()>,
}

/// Acquires, refreshes, and releases named leases on behalf of one replica.
pub struct LockService {
    store: Arc<dyn LockStore>,
    owner_id: String,
    config: LockConfig,
    active: Arc<Mutex<HashMap<String, ActiveLease>>>,
    next_generation: AtomicU64,
}

impl LockService {
    /// Create a lock service with a freshly minted owner id.
    ///
    /// The id is `{hostname}-{uuid}` so an operator can tell which host
    /// holds a lease from the row alone; the UUID keeps ids unique across
    /// replicas sharing a host.
    #[must_use]
    pub fn new(store: Arc<dyn LockStore>, config: LockConfig) -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "replica".to_owned());
        let owner_id = format!("{host}-{}", uuid::Uuid::new_v4());
        Self {
            store,
            owner_id,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// The stable identifier this replica writes into lease rows.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Try to take the lease for `name`.
    ///
    /// Returns `true` when this replica now holds a live lease and a
    /// refresher is running for it. Returns `false` when another replica
    /// holds the lease, when the takeover race was lost, or when the store
    /// is unreachable.
    pub async fn acquire(&self, name: &str) -> bool {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.config.lease_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));

        match self.store.try_acquire(name, &self.owner_id, expires_at).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task = name, "lease held elsewhere, skipping");
                return false;
            }
            Err(e) => {
                warn!(task = name, error = %e, "lock store unreachable during acquire");
                return false;
            }
        }

        // Read back: catches the race where two replicas both replaced an
        // expiring row between the conditional claim and now.
        match self.store.verify(name, &self.owner_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(task = name, "lost takeover race after claim");
                return false;
            }
            Err(e) => {
                warn!(task = name, error = %e, "lock store unreachable during verify");
                return false;
            }
        }

        self.start_refresher(name).await;
        true
    }

    /// Spawn the refresher for a freshly acquired lease, replacing any
    /// stale entry left by a dead refresher for the same name.
    async fn start_refresher(&self, name: &str) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let store = Arc::clone(&self.store);
        let owner = self.owner_id.clone();
        let task_name = name.to_owned();
        let active = Arc::clone(&self.active);
        let lease_duration = self.config.lease_duration;
        let refresh_interval = self.config.refresh_interval;

        let refresher = tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_interval);
            // The first tick of a tokio interval fires immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let new_expires_at = Utc::now()
                    + chrono::Duration::from_std(lease_duration)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300));
                let keep = match store.refresh(&task_name, &owner, new_expires_at).await {
                    Ok(true) => true,
                    Ok(false) => {
                        warn!(task = %task_name, "lease taken over, dropping refresher");
                        false
                    }
                    Err(e) => {
                        warn!(task = %task_name, error = %e, "lease refresh failed, dropping refresher");
                        false
                    }
                };
                if !keep {
                    let mut map = active.lock().await;
                    if map.get(&task_name).is_some_and(|l| l.generation == generation) {
                        map.remove(&task_name);
                    }
                    return;
                }
            }
        });

        let mut map = self.active.lock().await;
        if let Some(stale) = map.insert(
            name.to_owned(),
            ActiveLease {
                generation,
                refresher,
            },
        ) {
            stale.refresher.abort();
        }
    }

    /// Stop the refresher and clear ownership of `name`. Idempotent.
    pub async fn release(&self, name: &str) {
        if let Some(lease) = self.active.lock().await.remove(name) {
            lease.refresher.abort();
        }
        match self.store.release(name, &self.owner_id).await {
            Ok(_) => {}
            Err(e) => warn!(task = name, error = %e, "lease release failed"),
        }
    }

    /// Stamp the task's `last_run_at` after a successful run. Idempotent.
    pub async fn mark_success(&self, name: &str) {
        match self.store.update_last_run(name, &self.owner_id).await {
            Ok(true) => {}
            Ok(false) => debug!(task = name, "last-run update skipped, lease no longer held"),
            Err(e) => warn!(task = name, error = %e, "last-run update failed"),
        }
    }

    /// Process-shutdown hook: stop every refresher and clear every owned
    /// row.
    pub async fn release_all(&self) {
        let leases: Vec<ActiveLease> = {
            let mut map = self.active.lock().await;
            map.drain().map(|(_, lease)| lease).collect()
        };
        for lease in leases {
            lease.refresher.abort();
        }
        match self.store.release_all_by_owner(&self.owner_id).await {
            Ok(released) => info!(released, "released all held leases"),
            Err(e) => warn!(error = %e, "release-all failed, leases will expire naturally"),
        }
    }
}

impl std::fmt::Debug for LockService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockService")
            .field("owner_id", &self.owner_id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use floodgate_store::MemoryLockStore;

    fn service_with(store: &Arc<MemoryLockStore>, lease_ms: u64, refresh_ms: u64) -> LockService {
        let config = LockConfig::new(
            Duration::from_millis(lease_ms),
            Duration::from_millis(refresh_ms),
        )
        .unwrap();
        let lock_store: Arc<dyn LockStore> = Arc::clone(store) as Arc<dyn LockStore>;
        LockService::new(lock_store, config)
    }

    #[test]
    fn config_rejects_thin_refresh_margin() {
        let err = LockConfig::new(Duration::from_secs(60), Duration::from_secs(30));
        assert!(matches!(
            err,
            Err(LockError::InvalidRefreshInterval { .. })
        ));
        assert!(LockConfig::new(Duration::from_secs(60), Duration::from_secs(20)).is_ok());
    }

    #[tokio::test]
    async fn only_one_replica_acquires() {
        let store = Arc::new(MemoryLockStore::new());
        let a = service_with(&store, 30_000, 10_000);
        let b = service_with(&store, 30_000, 10_000);

        assert!(a.acquire("sweep-uploads").await);
        assert!(!b.acquire("sweep-uploads").await);

        a.release("sweep-uploads").await;
    }

    #[tokio::test]
    async fn release_lets_another_replica_acquire() {
        let store = Arc::new(MemoryLockStore::new());
        let a = service_with(&store, 30_000, 10_000);
        let b = service_with(&store, 30_000, 10_000);

        assert!(a.acquire("sweep-uploads").await);
        a.release("sweep-uploads").await;
        assert!(b.acquire("sweep-uploads").await);

        b.release("sweep-uploads").await;
    }

    #[tokio::test]
    async fn crashed_owner_lease_expires_and_is_reacquired() {
        let store = Arc::new(MemoryLockStore::new());
        let a = service_with(&store, 80, 30);
        let b = service_with(&store, 30_000, 10_000);

        assert!(a.acquire("sweep-uploads").await);
        // Simulate a crash: abort the refresher without releasing.
        {
            let mut map = a.active.lock().await;
            for (_, lease) in map.drain() {
                lease.refresher.abort();
            }
        }
        assert!(!b.acquire("sweep-uploads").await);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(b.acquire("sweep-uploads").await);
        b.release("sweep-uploads").await;
    }

    #[tokio::test]
    async fn refresher_keeps_short_lease_alive() {
        let store = Arc::new(MemoryLockStore::new());
        let a = service_with(&store, 100, 30);
        let b = service_with(&store, 30_000, 10_000);

        assert!(a.acquire("sweep-uploads").await);
        tokio::time::sleep(Duration::from_millis(250)).await;
        // Without refreshes the 100ms lease would long be dead.
        assert!(!b.acquire("sweep-uploads").await);
        a.release("sweep-uploads").await;
    }

    #[tokio::test]
    async fn mark_success_stamps_last_run() {
        let store = Arc::new(MemoryLockStore::new());
        let a = service_with(&store, 30_000, 10_000);

        assert!(a.acquire("sweep-uploads").await);
        a.mark_success("sweep-uploads").await;
        a.release("sweep-uploads").await;

        let rows = store.list().await.unwrap();
        assert!(rows[0].last_run_at.is_some());
    }

    #[tokio::test]
    async fn release_all_leaves_no_owned_rows() {
        let store = Arc::new(MemoryLockStore::new());
        let a = service_with(&store, 30_000, 10_000);

        assert!(a.acquire("t1").await);
        assert!(a.acquire("t2").await);
        a.release_all().await;

        for row in store.list().await.unwrap() {
            assert_ne!(row.owner_id.as_deref(), Some(a.owner_id()));
        }
    }
}
