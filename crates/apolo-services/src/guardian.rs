//! Named lock table
//!
//! Serializes access to profiles, ledgers and other shared entities across
//! concurrent calls. Each key maps to a single-permit semaphore created on
//! demand and dropped once nobody holds or waits for it. Acquiring a set of
//! keys yields a `LockRef`; the keys stay held until it is handed back to
//! `unlock` or dropped.

use apolo_core::{AppError, AppResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};
use uuid::Uuid;

struct HeldLocks {
    keys: Vec<String>,
    permits: Vec<OwnedSemaphorePermit>,
}

#[derive(Default)]
struct LockTable {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
    held: Mutex<HashMap<String, HeldLocks>>,
}

impl LockTable {
    /// Free the permits held under `id`, returning their keys
    fn release(&self, id: &str) -> Option<Vec<String>> {
        let held = self.held.lock().remove(id)?;
        drop(held.permits);
        self.prune(&held.keys);
        Some(held.keys)
    }

    /// Drop semaphores that nobody holds or waits on
    fn prune(&self, keys: &[String]) {
        let mut locks = self.locks.lock();
        for key in keys {
            if locks
                .get(key)
                .is_some_and(|sem| Arc::strong_count(sem) == 1)
            {
                locks.remove(key);
            }
        }
    }
}

/// Handle on a set of keys held by one caller
///
/// Dropping the handle releases whatever it still holds, so a caller
/// cancelled mid-call cannot leave its keys locked.
pub struct LockRef {
    id: String,
    table: Weak<LockTable>,
}

impl LockRef {
    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Debug for LockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LockRef").field(&self.id).finish()
    }
}

impl Drop for LockRef {
    fn drop(&mut self) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        if let Some(keys) = table.release(&self.id) {
            debug!("<Guardian> released {:?} on drop of {}", keys, self.id);
        }
    }
}

/// Timeout-bounded mutex table keyed by name
pub struct Guardian {
    table: Arc<LockTable>,
    default_timeout: Option<Duration>,
}

impl Guardian {
    /// Create a lock table
    ///
    /// # Arguments
    ///
    /// * `default_timeout` - Wait limit used by `lock`, `None` waits forever
    pub fn new(default_timeout: Option<Duration>) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            default_timeout,
        }
    }

    /// Acquire every key using the default timeout
    pub async fn lock(&self, keys: &[String]) -> AppResult<LockRef> {
        self.lock_with_timeout(keys, self.default_timeout).await
    }

    /// Acquire every key, waiting at most `timeout` for the whole set
    ///
    /// Keys are taken in sorted order so that overlapping sets cannot
    /// deadlock. A zero timeout waits forever.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the keys could not all be acquired
    /// in time; nothing stays held in that case
    pub async fn lock_with_timeout(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> AppResult<LockRef> {
        let mut sorted: Vec<String> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let semaphores: Vec<Arc<Semaphore>> = {
            let mut locks = self.table.locks.lock();
            sorted
                .iter()
                .map(|key| {
                    locks
                        .entry(key.clone())
                        .or_insert_with(|| Arc::new(Semaphore::new(1)))
                        .clone()
                })
                .collect()
        };

        let acquire = async move {
            let mut permits = Vec::with_capacity(semaphores.len());
            for sem in semaphores {
                match sem.acquire_owned().await {
                    Ok(permit) => permits.push(permit),
                    Err(_) => return None,
                }
            }
            Some(permits)
        };

        let outcome = match timeout.filter(|t| !t.is_zero()) {
            Some(limit) => tokio::time::timeout(limit, acquire).await.ok(),
            None => Some(acquire.await),
        };

        let permits = match outcome {
            Some(Some(permits)) => permits,
            Some(None) => {
                self.table.prune(&sorted);
                return Err(AppError::Internal("lock table closed".to_string()));
            }
            None => {
                self.table.prune(&sorted);
                let timeout_ms = timeout.map_or(0, |t| t.as_millis() as u64);
                warn!("<Guardian> timeout after {}ms locking {:?}", timeout_ms, sorted);
                return Err(AppError::LockTimeout {
                    keys: sorted.join(","),
                    timeout_ms,
                });
            }
        };

        let id = Uuid::new_v4().to_string();
        debug!("<Guardian> locked {:?} as {}", sorted, id);
        self.table.held.lock().insert(
            id.clone(),
            HeldLocks {
                keys: sorted,
                permits,
            },
        );
        Ok(LockRef {
            id,
            table: Arc::downgrade(&self.table),
        })
    }

    /// Release every key held under `lock_ref`
    ///
    /// Returns false if the reference was already released.
    pub fn unlock(&self, lock_ref: &LockRef) -> bool {
        match self.table.release(&lock_ref.id) {
            Some(keys) => {
                debug!("<Guardian> unlocked {:?}", keys);
                true
            }
            None => {
                warn!("<Guardian> unlock of unknown reference {}", lock_ref.id);
                false
            }
        }
    }

    /// Whether a key is currently held
    pub fn is_locked(&self, key: &str) -> bool {
        self.table
            .locks
            .lock()
            .get(key)
            .is_some_and(|sem| sem.available_permits() == 0)
    }

    /// Number of outstanding lock references
    pub fn held_count(&self) -> usize {
        self.table.held.lock().len()
    }

    /// Number of keys with a live semaphore, held or awaited
    pub fn key_count(&self) -> usize {
        self.table.locks.lock().len()
    }
}

impl Default for Guardian {
    fn default() -> Self {
        Self::new(None)
    }
}
