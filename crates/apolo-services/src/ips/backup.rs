//! Ledger write-back
//!
//! Persistence follows the configured store mode:
//! - `Disabled`: mutated ledgers are never written
//! - `Synchronous`: ledgers are written in the calling task, errors surface
//! - `Batched`: ledger keys are queued and a background task drains the
//!   queue every interval, re-queueing keys whose write failed
//!
//! The queue lock and guardian locks are never held together.

use apolo_cache::keys::ip_allocations_lock_key;
use apolo_core::{config::StoreMode, config::CACHE_IP_ALLOCATIONS, AppResult};
use apolo_db::{DataManager, SharedAllocations};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ledger::LockedAllocations;
use crate::guardian::Guardian;

struct LoopControl {
    cancel: CancellationToken,
    done: Option<JoinHandle<()>>,
}

/// Write-back scheduler for IP allocation ledgers
pub struct BackupScheduler {
    mode: StoreMode,
    dm: DataManager,
    guardian: Arc<Guardian>,
    pending: Mutex<HashSet<String>>,
    control: Mutex<LoopControl>,
}

impl BackupScheduler {
    pub fn new(mode: StoreMode, dm: DataManager, guardian: Arc<Guardian>) -> Self {
        Self {
            mode,
            dm,
            guardian,
            pending: Mutex::new(HashSet::new()),
            control: Mutex::new(LoopControl {
                cancel: CancellationToken::new(),
                done: None,
            }),
        }
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    /// Keys waiting for the next batch
    pub fn pending_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.pending.lock().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Persist or queue ledgers mutated by a call
    ///
    /// Only ledgers of stored profiles are considered.
    ///
    /// # Errors
    ///
    /// In synchronous mode, returns the first store error
    pub async fn store_matched(&self, list: &mut [LockedAllocations]) -> AppResult<()> {
        match self.mode {
            StoreMode::Disabled => Ok(()),
            StoreMode::Batched(_) => {
                for allocs in list.iter_mut().filter(|a| a.dirty.is_some()) {
                    allocs.dirty = Some(true);
                    self.pending.lock().insert(allocs.tenant_id());
                }
                Ok(())
            }
            StoreMode::Synchronous => {
                for allocs in list.iter_mut().filter(|a| a.dirty.is_some()) {
                    allocs.dirty = Some(true);
                    self.store_ledger(allocs).await?;
                }
                Ok(())
            }
        }
    }

    /// Write a dirty ledger and mark it clean
    pub async fn store_ledger(&self, allocs: &mut LockedAllocations) -> AppResult<()> {
        if allocs.dirty != Some(true) {
            return Ok(());
        }
        let snapshot = allocs.snapshot();
        self.dm.set_ip_allocations(&snapshot).await?;

        let key = snapshot.tenant_id();
        let cache = self.dm.cache();
        if cache.has(CACHE_IP_ALLOCATIONS, &key) {
            cache.set(CACHE_IP_ALLOCATIONS, &key, allocs.allocs.clone())?;
        }
        allocs.dirty = Some(false);
        Ok(())
    }

    /// Drain the queue once, one ledger at a time
    pub async fn store_pending(&self) {
        let mut failed = Vec::new();
        loop {
            let next = {
                let mut pending = self.pending.lock();
                let key = pending.iter().next().cloned();
                if let Some(key) = &key {
                    pending.remove(key);
                }
                key
            };
            let Some(key) = next else { break };

            if let Err(e) = self.store_queued(&key).await {
                warn!("<IPs> failed backing up IP allocations {}: {}", key, e);
                failed.push(key);
            }
            tokio::task::yield_now().await;
        }
        if !failed.is_empty() {
            self.pending.lock().extend(failed);
        }
    }

    async fn store_queued(&self, key: &str) -> AppResult<()> {
        let Some(shared) = self
            .dm
            .cache()
            .get::<SharedAllocations>(CACHE_IP_ALLOCATIONS, key)
        else {
            warn!(
                "<IPs> failed retrieving from cache IP allocations with ID {}",
                key
            );
            return Ok(());
        };

        let lock_key = {
            let allocs = shared.lock();
            ip_allocations_lock_key(&allocs.tenant, &allocs.id)
        };
        let lock = self.guardian.lock(&[lock_key]).await?;
        let snapshot = shared.lock().clone();
        let result = self.dm.set_ip_allocations(&snapshot).await;
        self.guardian.unlock(&lock);
        result?;

        let cache = self.dm.cache();
        if cache.has(CACHE_IP_ALLOCATIONS, key) {
            cache.set(CACHE_IP_ALLOCATIONS, key, shared)?;
        }
        debug!("Backed up IP allocations {}", key);
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!("<IPs> starting backup loop every {:?}", interval);
        loop {
            self.store_pending().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("<IPs> backup loop stopped");
    }

    /// Start the background loop when running in batched mode
    pub fn start_loop(self: &Arc<Self>) {
        let StoreMode::Batched(interval) = self.mode else {
            debug!("<IPs> backup loop not started for {:?}", self.mode);
            return;
        };
        let mut control = self.control.lock();
        if control.done.is_some() {
            return;
        }
        let cancel = control.cancel.clone();
        control.done = Some(tokio::spawn(self.clone().run_loop(interval, cancel)));
    }

    /// Stop the loop and wait for it to exit
    async fn stop_loop(&self) {
        let done = {
            let mut control = self.control.lock();
            control.cancel.cancel();
            control.done.take()
        };
        if let Some(done) = done {
            if let Err(e) = done.await {
                warn!("<IPs> backup loop ended abnormally: {}", e);
            }
        }
    }

    /// Stop the loop and flush everything still queued
    pub async fn shutdown(&self) {
        info!("<IPs> shutdown initialized");
        self.stop_loop().await;
        self.store_pending().await;
        info!("<IPs> shutdown complete");
    }

    /// Restart the loop with fresh signals
    pub async fn reload(self: &Arc<Self>) {
        self.stop_loop().await;
        self.control.lock().cancel = CancellationToken::new();
        self.start_loop();
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .done
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ips::ledger::LockedProfile;
    use apolo_cache::MemoryCache;
    use apolo_core::config::CacheConfig;
    use apolo_core::models::{IpProfile, IpUsage, LeaseTtl};
    use apolo_core::traits::DataDb;
    use apolo_db::{IndexSettings, InternalDb};

    fn setup(mode: StoreMode) -> (Arc<BackupScheduler>, DataManager, Arc<InternalDb>) {
        let db = Arc::new(InternalDb::new());
        let dm = DataManager::new(
            Some(db.clone()),
            Arc::new(MemoryCache::new(&CacheConfig::default())),
            IndexSettings::default(),
        );
        let backup = Arc::new(BackupScheduler::new(
            mode,
            dm.clone(),
            Arc::new(Guardian::default()),
        ));
        (backup, dm, db)
    }

    async fn mutated_ledger(dm: &DataManager, stored: bool) -> LockedAllocations {
        let shared = dm.get_ip_allocations("cgrates.org", "IPs1").await.unwrap();
        let mut l = LockedAllocations::new(
            shared,
            None,
            LockedProfile::new(Arc::new(IpProfile::new("cgrates.org", "IPs1")), None),
            LeaseTtl::Unlimited,
        );
        if stored {
            l.dirty = Some(false);
        }
        l.record_usage(&IpUsage::new("cgrates.org", "u1", 1.0)).unwrap();
        l
    }

    #[tokio::test]
    async fn test_disabled_mode_never_writes() {
        let (backup, dm, db) = setup(StoreMode::Disabled);
        let mut list = vec![mutated_ledger(&dm, true).await];
        backup.store_matched(&mut list).await.unwrap();

        assert!(backup.pending_keys().is_empty());
        assert!(db.get_ip_allocations("cgrates.org", "IPs1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_synchronous_mode_writes_through() {
        let (backup, dm, db) = setup(StoreMode::Synchronous);
        let mut list = vec![mutated_ledger(&dm, true).await];
        backup.store_matched(&mut list).await.unwrap();

        assert_eq!(list[0].dirty, Some(false));
        let stored = db
            .get_ip_allocations("cgrates.org", "IPs1")
            .await
            .unwrap()
            .unwrap();
        assert!(stored.usages.contains_key("u1"));
    }

    #[tokio::test]
    async fn test_unstored_profiles_are_skipped() {
        let (backup, dm, db) = setup(StoreMode::Synchronous);
        let mut list = vec![mutated_ledger(&dm, false).await];
        backup.store_matched(&mut list).await.unwrap();

        assert_eq!(list[0].dirty, None);
        assert!(db.get_ip_allocations("cgrates.org", "IPs1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_synchronous_without_store_is_checked_error() {
        let dm = DataManager::new(
            Some(Arc::new(InternalDb::new())),
            Arc::new(MemoryCache::new(&CacheConfig::default())),
            IndexSettings::default(),
        );
        let mut list = vec![mutated_ledger(&dm, true).await];

        let no_store = DataManager::new(None, dm.cache().clone(), IndexSettings::default());
        let backup = BackupScheduler::new(
            StoreMode::Synchronous,
            no_store,
            Arc::new(Guardian::default()),
        );
        assert_eq!(
            backup.store_matched(&mut list).await,
            Err(apolo_core::AppError::NoDatabaseConn)
        );
    }

    #[tokio::test]
    async fn test_batched_mode_queues_and_drains() {
        let (backup, dm, db) = setup(StoreMode::Batched(Duration::from_millis(100)));
        let mut list = vec![mutated_ledger(&dm, true).await];
        backup.store_matched(&mut list).await.unwrap();
        backup.store_matched(&mut list).await.unwrap();

        assert_eq!(list[0].dirty, Some(true));
        assert_eq!(backup.pending_keys(), vec!["cgrates.org:IPs1".to_string()]);
        assert!(db.get_ip_allocations("cgrates.org", "IPs1").await.unwrap().is_none());

        backup.store_pending().await;
        assert!(backup.pending_keys().is_empty());
        assert!(db
            .get_ip_allocations("cgrates.org", "IPs1")
            .await
            .unwrap()
            .unwrap()
            .usages
            .contains_key("u1"));
    }

    #[tokio::test]
    async fn test_failed_batch_is_requeued() {
        let dm = DataManager::new(
            Some(Arc::new(InternalDb::new())),
            Arc::new(MemoryCache::new(&CacheConfig::default())),
            IndexSettings::default(),
        );
        let mut list = vec![mutated_ledger(&dm, true).await];

        let no_store = DataManager::new(None, dm.cache().clone(), IndexSettings::default());
        let backup = BackupScheduler::new(
            StoreMode::Batched(Duration::from_millis(100)),
            no_store,
            Arc::new(Guardian::default()),
        );
        backup.store_matched(&mut list).await.unwrap();
        backup.store_pending().await;
        assert_eq!(backup.pending_keys(), vec!["cgrates.org:IPs1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_lifecycle() {
        let (backup, dm, db) = setup(StoreMode::Batched(Duration::from_millis(100)));
        backup.start_loop();
        assert!(backup.is_running());

        let mut list = vec![mutated_ledger(&dm, true).await];
        backup.store_matched(&mut list).await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(backup.pending_keys().is_empty());
        assert!(db.get_ip_allocations("cgrates.org", "IPs1").await.unwrap().is_some());

        backup.reload().await;
        assert!(backup.is_running());

        backup.shutdown().await;
        assert!(!backup.is_running());
    }

    #[tokio::test]
    async fn test_loop_not_started_outside_batched_mode() {
        let (backup, _, _) = setup(StoreMode::Synchronous);
        backup.start_loop();
        assert!(!backup.is_running());
        backup.shutdown().await;
    }
}
