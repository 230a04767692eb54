//! Lease ledger and its per-call lock wrappers
//!
//! `LockedProfile` and `LockedAllocations` only exist for the duration of
//! one call. They carry the guardian references taken while matching;
//! callers unlock them explicitly, and dropping them releases whatever is
//! still held.

use apolo_core::{
    models::{IpAllocations, IpProfile, IpUsage, LeaseTtl},
    AppError, AppResult,
};
use apolo_db::SharedAllocations;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::guardian::{Guardian, LockRef};

/// Profile held under its guardian lock
#[derive(Debug)]
pub struct LockedProfile {
    pub profile: Arc<IpProfile>,
    lock: Option<LockRef>,
}

impl LockedProfile {
    pub fn new(profile: Arc<IpProfile>, lock: Option<LockRef>) -> Self {
        Self { profile, lock }
    }

    /// Release the profile lock; later calls are no-ops
    pub fn unlock(&mut self, guardian: &Guardian) {
        if let Some(lock) = self.lock.take() {
            guardian.unlock(&lock);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some()
    }
}

/// Ledger held under its guardian lock, with the call-level state
/// needed to mutate it
pub struct LockedAllocations {
    pub allocs: SharedAllocations,
    /// Effective lease length for usages recorded in this call
    pub ttl: LeaseTtl,
    /// Cached sum of units, `None` while untracked
    total_usage: Option<f64>,
    /// `None` for ledgers that are never persisted
    pub dirty: Option<bool>,
    pub weight: f64,
    pub profile: LockedProfile,
    lock: Option<LockRef>,
}

impl LockedAllocations {
    pub fn new(
        allocs: SharedAllocations,
        lock: Option<LockRef>,
        profile: LockedProfile,
        ttl: LeaseTtl,
    ) -> Self {
        Self {
            allocs,
            ttl,
            total_usage: None,
            dirty: None,
            weight: 0.0,
            profile,
            lock,
        }
    }

    /// Release the ledger lock and its profile's lock
    pub fn unlock(&mut self, guardian: &Guardian) {
        if let Some(lock) = self.lock.take() {
            guardian.unlock(&lock);
        }
        self.profile.unlock(guardian);
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_some() || self.profile.is_locked()
    }

    pub fn tenant_id(&self) -> String {
        self.allocs.lock().tenant_id()
    }

    /// Copy of the ledger as currently recorded
    pub fn snapshot(&self) -> IpAllocations {
        self.allocs.lock().clone()
    }

    /// Sum of units, computed once and then tracked incrementally
    pub fn total_usage(&mut self) -> f64 {
        match self.total_usage {
            Some(total) => total,
            None => {
                let total = self.allocs.lock().total_units();
                self.total_usage = Some(total);
                total
            }
        }
    }

    pub fn tracked_total(&self) -> Option<f64> {
        self.total_usage
    }

    /// Record a new usage stamped with the effective TTL
    pub fn record_usage(&mut self, usage: &IpUsage) -> AppResult<()> {
        self.record_usage_at(usage, Utc::now())
    }

    /// Record a new usage with expiry computed from `now`
    ///
    /// # Errors
    ///
    /// Returns `AppError::DuplicateUsage` if the ID is already recorded
    pub fn record_usage_at(&mut self, usage: &IpUsage, now: DateTime<Utc>) -> AppResult<()> {
        let mut allocs = self.allocs.lock();
        if allocs.usages.contains_key(&usage.id) {
            return Err(AppError::DuplicateUsage(usage.tenant_id()));
        }
        let stored = match self.ttl {
            LeaseTtl::Disabled => return Ok(()),
            LeaseTtl::Unlimited => usage.clone(),
            LeaseTtl::Expiring(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|e| AppError::InvalidInput(format!("invalid TTL: {}", e)))?;
                let mut stamped = usage.clone();
                stamped.expiry_time = Some(now + ttl);
                allocs.ttl_idx.push(usage.id.clone());
                stamped
            }
        };
        if let Some(total) = self.total_usage.as_mut() {
            *total += stored.units;
        }
        allocs.usages.insert(stored.id.clone(), stored);
        Ok(())
    }

    /// Remove a usage
    ///
    /// # Errors
    ///
    /// Returns `AppError::UsageNotFound` if the ID is not recorded
    pub fn clear_usage(&mut self, id: &str) -> AppResult<()> {
        let mut allocs = self.allocs.lock();
        let (units, had_expiry) = match allocs.usages.get(id) {
            Some(usage) => (usage.units, usage.expiry_time.is_some()),
            None => return Err(AppError::UsageNotFound(id.to_string())),
        };
        if had_expiry {
            if let Some(pos) = allocs.ttl_idx.iter().position(|u| u == id) {
                allocs.ttl_idx.remove(pos);
            }
        }
        if let Some(total) = self.total_usage.as_mut() {
            *total -= units;
        }
        allocs.usages.remove(id);
        Ok(())
    }

    /// Put back a usage exactly as it was recorded before
    pub fn restore_usage(&mut self, usage: IpUsage) {
        let mut allocs = self.allocs.lock();
        if allocs.usages.contains_key(&usage.id) {
            return;
        }
        if usage.expiry_time.is_some() {
            allocs.ttl_idx.push(usage.id.clone());
        }
        if let Some(total) = self.total_usage.as_mut() {
            *total += usage.units;
        }
        allocs.usages.insert(usage.id.clone(), usage);
    }

    /// Usage currently recorded under `id`
    pub fn usage(&self, id: &str) -> Option<IpUsage> {
        self.allocs.lock().usages.get(id).cloned()
    }

    /// Evict expired usages from the front of the TTL index
    pub fn remove_expired_units(&mut self) {
        self.remove_expired_units_at(Utc::now())
    }

    /// Evict usages expired at `now`, stopping at the first live one
    pub fn remove_expired_units_at(&mut self, now: DateTime<Utc>) {
        let mut allocs = self.allocs.lock();
        let expired = allocs
            .ttl_idx
            .iter()
            .take_while(|id| !allocs.usages.get(*id).is_some_and(|u| u.is_active(now)))
            .count();
        if expired == 0 {
            return;
        }

        let evicted: Vec<String> = allocs.ttl_idx.drain(..expired).collect();
        for id in &evicted {
            if let Some(usage) = allocs.usages.remove(id) {
                if let Some(total) = self.total_usage.as_mut() {
                    *total -= usage.units;
                    if *total < 0.0 {
                        warn!(
                            "<IPs> negative total usage {} on {} after removing expired units",
                            total,
                            allocs.tenant_id()
                        );
                        self.total_usage = None;
                    }
                }
            }
        }
        self.total_usage = None;
    }
}

/// Release every wrapper in the list
pub fn unlock_all(list: &mut [LockedAllocations], guardian: &Guardian) {
    for allocs in list.iter_mut() {
        allocs.unlock(guardian);
    }
}
