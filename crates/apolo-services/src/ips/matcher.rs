//! Event to ledger matching

use apolo_cache::keys::{ip_allocations_lock_key, ip_index_lock_key, ip_profile_lock_key};
use apolo_core::{
    config::CACHE_EVENT_IPS,
    models::{CgrEvent, EventView, LeaseTtl},
    AppError, AppResult,
};
use tracing::{debug, instrument};

use super::ledger::{unlock_all, LockedAllocations, LockedProfile};
use super::IpService;
use crate::filters::weight_from_dynamics;

impl IpService {
    /// Locked ledgers of every profile matching the event, heaviest first
    ///
    /// Candidate profile IDs are memoized per usage ID; a memoized miss
    /// short-circuits to not found. On success every returned wrapper holds
    /// its profile and ledger locks and the caller must unlock them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when no profile matches. Any other error
    /// is returned with every lock taken by this call released.
    #[instrument(skip(self, ev), fields(event = %ev.id))]
    pub(crate) async fn matching_allocations_for_event(
        &self,
        tenant: &str,
        ev: &CgrEvent,
        usage_id: &str,
        ttl_override: Option<i64>,
    ) -> AppResult<Vec<LockedAllocations>> {
        let cache = self.dm.cache();
        let view = ev.view();

        let (ids, memoized) = match cache.get::<Option<Vec<String>>>(CACHE_EVENT_IPS, usage_id) {
            Some(None) => {
                return Err(AppError::NotFound(format!(
                    "no IP profile matched usage {}",
                    usage_id
                )))
            }
            Some(Some(ids)) => (ids, true),
            None => {
                let lock = self.guardian.lock(&[ip_index_lock_key(tenant)]).await?;
                let found = self.dm.matching_ip_profile_ids(tenant, &view).await;
                self.guardian.unlock(&lock);
                match found {
                    Ok(found) => {
                        let mut ids: Vec<String> = found.into_iter().collect();
                        ids.sort();
                        (ids, false)
                    }
                    Err(e) if e.is_not_found() => {
                        cache.set::<Option<Vec<String>>>(CACHE_EVENT_IPS, usage_id, None)?;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let mut matched = match self.lock_candidates(tenant, &view, &ids, ttl_override).await {
            Ok(matched) => matched,
            Err(e) => {
                if memoized {
                    cache.remove(CACHE_EVENT_IPS, usage_id);
                }
                return Err(e);
            }
        };

        matched.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        if let Err(e) = cache.set(CACHE_EVENT_IPS, usage_id, Some(ids)) {
            unlock_all(&mut matched, &self.guardian);
            return Err(e);
        }
        debug!("Matched {} IP allocations for {}", matched.len(), usage_id);
        Ok(matched)
    }

    async fn lock_candidates(
        &self,
        tenant: &str,
        view: &EventView<'_>,
        ids: &[String],
        ttl_override: Option<i64>,
    ) -> AppResult<Vec<LockedAllocations>> {
        let mut matched: Vec<LockedAllocations> = Vec::with_capacity(ids.len());
        for id in ids {
            let profile_lock = match self.guardian.lock(&[ip_profile_lock_key(tenant, id)]).await {
                Ok(lock) => lock,
                Err(e) => {
                    unlock_all(&mut matched, &self.guardian);
                    return Err(e);
                }
            };
            let profile = match self.dm.get_ip_profile(tenant, id).await {
                Ok(profile) => profile,
                Err(e) => {
                    self.guardian.unlock(&profile_lock);
                    if e.is_not_found() {
                        continue;
                    }
                    unlock_all(&mut matched, &self.guardian);
                    return Err(e);
                }
            };
            let mut profile = LockedProfile::new(profile, Some(profile_lock));

            match self.fs.pass(tenant, &profile.profile.filter_ids, view).await {
                Ok(true) => {}
                Ok(false) => {
                    profile.unlock(&self.guardian);
                    continue;
                }
                Err(e) => {
                    profile.unlock(&self.guardian);
                    unlock_all(&mut matched, &self.guardian);
                    return Err(e);
                }
            }

            let allocs_lock = match self
                .guardian
                .lock(&[ip_allocations_lock_key(tenant, id)])
                .await
            {
                Ok(lock) => lock,
                Err(e) => {
                    profile.unlock(&self.guardian);
                    unlock_all(&mut matched, &self.guardian);
                    return Err(e);
                }
            };
            let shared = match self.dm.get_ip_allocations(tenant, id).await {
                Ok(shared) => shared,
                Err(e) => {
                    self.guardian.unlock(&allocs_lock);
                    profile.unlock(&self.guardian);
                    unlock_all(&mut matched, &self.guardian);
                    return Err(e);
                }
            };

            let ttl = LeaseTtl::effective(ttl_override, profile.profile.ttl);
            let stored = profile.profile.stored;
            let weights = profile.profile.weights.clone();
            let mut allocs = LockedAllocations::new(shared, Some(allocs_lock), profile, ttl);
            if stored {
                allocs.dirty = Some(false);
            }
            match weight_from_dynamics(self.fs.as_ref(), tenant, &weights, view).await {
                Ok(weight) => allocs.weight = weight,
                Err(e) => {
                    allocs.unlock(&self.guardian);
                    unlock_all(&mut matched, &self.guardian);
                    return Err(e);
                }
            }
            matched.push(allocs);
        }

        if matched.is_empty() {
            return Err(AppError::NotFound("no IP profile matched".to_string()));
        }
        Ok(matched)
    }
}
