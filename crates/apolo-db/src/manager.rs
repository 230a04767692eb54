//! Data manager
//!
//! Single entry point the services use to reach persisted IP data. Combines
//! an optional store backend with the shared read cache:
//!
//! - profiles and filters are cached as immutable `Arc`s, with negative
//!   entries for IDs the store does not know
//! - ledgers are cached as shared handles so that in-place mutations are
//!   visible to the backup loop without a second lookup
//! - a missing ledger is created empty on first lookup

use apolo_cache::MemoryCache;
use apolo_core::{
    concatenated_key,
    config::{CACHE_EVENT_IPS, CACHE_FILTERS, CACHE_IP_ALLOCATIONS, CACHE_IP_PROFILES},
    models::{Filter, IpAllocations, IpProfile},
    traits::DataDb,
    AppError, AppResult,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::indexer::IndexSettings;

/// Ledger handle shared between the read cache, in-flight calls and the backup loop
pub type SharedAllocations = Arc<Mutex<IpAllocations>>;

/// Store plus read cache for IP profiles, ledgers and filters
#[derive(Clone)]
pub struct DataManager {
    db: Option<Arc<dyn DataDb>>,
    cache: Arc<MemoryCache>,
    pub(crate) index: Arc<IndexSettings>,
}

impl DataManager {
    /// Create a new data manager
    ///
    /// # Arguments
    ///
    /// * `db` - Store backend, `None` when the service runs without one
    /// * `cache` - Shared read cache
    /// * `index` - Which event fields feed the filter indexes
    pub fn new(db: Option<Arc<dyn DataDb>>, cache: Arc<MemoryCache>, index: IndexSettings) -> Self {
        Self {
            db,
            cache,
            index: Arc::new(index),
        }
    }

    /// Shared read cache
    pub fn cache(&self) -> &Arc<MemoryCache> {
        &self.cache
    }

    pub fn has_data_db(&self) -> bool {
        self.db.is_some()
    }

    /// Store backend, or `NoDatabaseConn` when none is configured
    pub fn data_db(&self) -> AppResult<&Arc<dyn DataDb>> {
        self.db.as_ref().ok_or(AppError::NoDatabaseConn)
    }

    // ==================== IP Profiles ====================

    /// Load a profile, caching both hits and misses
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the profile does not exist
    #[instrument(skip(self))]
    pub async fn get_ip_profile(&self, tenant: &str, id: &str) -> AppResult<Arc<IpProfile>> {
        let key = concatenated_key(&[tenant, id]);
        if let Some(cached) = self
            .cache
            .get::<Option<Arc<IpProfile>>>(CACHE_IP_PROFILES, &key)
        {
            return cached.ok_or_else(|| AppError::NotFound(format!("IP profile {}", key)));
        }

        let stored = self.data_db()?.get_ip_profile(tenant, id).await?.map(Arc::new);
        self.cache.set(CACHE_IP_PROFILES, &key, stored.clone())?;
        stored.ok_or_else(|| AppError::NotFound(format!("IP profile {}", key)))
    }

    /// Store a profile, maintaining its filter indexes and creating its ledger
    #[instrument(skip(self, profile), fields(profile = %profile.tenant_id()))]
    pub async fn set_ip_profile(&self, profile: IpProfile) -> AppResult<()> {
        let db = self.data_db()?;
        let old = db.get_ip_profile(&profile.tenant, &profile.id).await?;
        if let Some(old) = &old {
            self.remove_profile_indexes(old).await?;
        }
        db.set_ip_profile(&profile).await?;
        self.add_profile_indexes(&profile).await?;

        if db
            .get_ip_allocations(&profile.tenant, &profile.id)
            .await?
            .is_none()
        {
            db.set_ip_allocations(&IpAllocations::new(&profile.tenant, &profile.id))
                .await?;
        }

        self.cache.remove(CACHE_IP_PROFILES, &profile.tenant_id());
        self.cache.clear(Some(CACHE_EVENT_IPS));
        info!("IP profile {} stored", profile.tenant_id());
        Ok(())
    }

    /// Remove a profile together with its indexes and ledger
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the profile does not exist
    #[instrument(skip(self))]
    pub async fn remove_ip_profile(&self, tenant: &str, id: &str) -> AppResult<()> {
        let db = self.data_db()?;
        let key = concatenated_key(&[tenant, id]);
        let old = db
            .get_ip_profile(tenant, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("IP profile {}", key)))?;

        self.remove_profile_indexes(&old).await?;
        db.remove_ip_profile(tenant, id).await?;
        db.remove_ip_allocations(tenant, id).await?;

        self.cache.remove(CACHE_IP_PROFILES, &key);
        self.cache.remove(CACHE_IP_ALLOCATIONS, &key);
        self.cache.clear(Some(CACHE_EVENT_IPS));
        info!("IP profile {} removed", key);
        Ok(())
    }

    // ==================== IP Allocations ====================

    /// Load a ledger as a shared handle, creating an empty one if none exists
    #[instrument(skip(self))]
    pub async fn get_ip_allocations(&self, tenant: &str, id: &str) -> AppResult<SharedAllocations> {
        let key = concatenated_key(&[tenant, id]);
        if let Some(shared) = self
            .cache
            .get::<SharedAllocations>(CACHE_IP_ALLOCATIONS, &key)
        {
            return Ok(shared);
        }

        let allocs = match self.data_db()?.get_ip_allocations(tenant, id).await? {
            Some(allocs) => allocs,
            None => {
                debug!("Creating empty IP allocations {}", key);
                IpAllocations::new(tenant, id)
            }
        };
        let shared: SharedAllocations = Arc::new(Mutex::new(allocs));
        self.cache.set(CACHE_IP_ALLOCATIONS, &key, shared.clone())?;
        Ok(shared)
    }

    /// Write a ledger snapshot to the store
    pub async fn set_ip_allocations(&self, allocs: &IpAllocations) -> AppResult<()> {
        self.data_db()?.set_ip_allocations(allocs).await
    }

    // ==================== Filters ====================

    /// Load a stored filter
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the filter does not exist
    pub async fn get_filter(&self, tenant: &str, id: &str) -> AppResult<Arc<Filter>> {
        let key = concatenated_key(&[tenant, id]);
        if let Some(cached) = self.cache.get::<Option<Arc<Filter>>>(CACHE_FILTERS, &key) {
            return cached.ok_or_else(|| AppError::NotFound(format!("filter {}", key)));
        }

        let stored = self.data_db()?.get_filter(tenant, id).await?.map(Arc::new);
        self.cache.set(CACHE_FILTERS, &key, stored.clone())?;
        stored.ok_or_else(|| AppError::NotFound(format!("filter {}", key)))
    }

    /// Store a filter and re-index every profile of the tenant referencing it
    #[instrument(skip(self, filter), fields(filter = %filter.id))]
    pub async fn set_filter(&self, filter: Filter) -> AppResult<()> {
        for rule in &filter.rules {
            rule.check()?;
        }
        let db = self.data_db()?;

        let mut affected = Vec::new();
        for id in db.ip_profile_ids(&filter.tenant).await? {
            if let Some(profile) = db.get_ip_profile(&filter.tenant, &id).await? {
                if profile.filter_ids.iter().any(|f| f == &filter.id) {
                    affected.push(profile);
                }
            }
        }

        for profile in &affected {
            // a broken reference means the profile was indexed as if unfiltered
            if let Err(e) = self.remove_profile_indexes(profile).await {
                if !matches!(e, AppError::BrokenReference(_)) {
                    return Err(e);
                }
            }
        }
        db.set_filter(&filter).await?;
        self.cache
            .remove(CACHE_FILTERS, &concatenated_key(&[&filter.tenant, &filter.id]));
        for profile in &affected {
            self.add_profile_indexes(profile).await?;
        }

        self.cache.clear(Some(CACHE_EVENT_IPS));
        debug!("Filter stored, {} profiles re-indexed", affected.len());
        Ok(())
    }
}
