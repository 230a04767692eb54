//! IP allocation service
//!
//! Matches events to IP profiles, leases addresses out of their pools and
//! keeps the per-profile ledgers persisted according to the store mode.

pub mod backup;
pub mod ledger;
mod matcher;
pub mod pools;
mod rpc;
pub mod strategy;

use apolo_cache::keys::{ip_index_lock_key, ip_profile_lock_key};
use apolo_core::{
    config::{GeneralConfig, IpsConfig},
    models::{Filter, IpProfile},
    traits::FilterService,
    AppResult,
};
use apolo_db::DataManager;
use std::sync::Arc;
use tracing::info;

use crate::guardian::Guardian;
use backup::BackupScheduler;

pub use ledger::{unlock_all, LockedAllocations, LockedProfile};

/// IP allocation service
pub struct IpService {
    dm: DataManager,
    fs: Arc<dyn FilterService>,
    guardian: Arc<Guardian>,
    general: GeneralConfig,
    cfg: IpsConfig,
    backup: Arc<BackupScheduler>,
}

impl IpService {
    /// Create a new IP service
    ///
    /// # Arguments
    ///
    /// * `general` - Default tenant and locking settings
    /// * `cfg` - IP service settings, including the store mode
    /// * `dm` - Data manager over the store and cache
    /// * `fs` - Filter evaluation
    /// * `guardian` - Named-lock coordinator shared with the rest of the process
    pub fn new(
        general: GeneralConfig,
        cfg: IpsConfig,
        dm: DataManager,
        fs: Arc<dyn FilterService>,
        guardian: Arc<Guardian>,
    ) -> Self {
        let backup = Arc::new(BackupScheduler::new(
            cfg.store_mode(),
            dm.clone(),
            guardian.clone(),
        ));
        Self {
            dm,
            fs,
            guardian,
            general,
            cfg,
            backup,
        }
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.dm
    }

    pub fn guardian(&self) -> &Arc<Guardian> {
        &self.guardian
    }

    pub fn backup(&self) -> &Arc<BackupScheduler> {
        &self.backup
    }

    fn tenant_or_default<'a>(&'a self, tenant: &'a str) -> &'a str {
        if tenant.is_empty() {
            &self.general.default_tenant
        } else {
            tenant
        }
    }

    /// Start background work
    pub fn start(&self) {
        info!("<IPs> starting service, store mode {:?}", self.backup.mode());
        self.backup.start_loop();
    }

    /// Stop background work and flush queued ledgers
    pub async fn shutdown(&self) {
        self.backup.shutdown().await;
    }

    /// Restart the backup loop
    pub async fn reload(&self) {
        self.backup.reload().await;
    }

    // ==================== Administration ====================

    /// Store a profile under the tenant index lock and the profile lock
    pub async fn set_ip_profile(&self, mut profile: IpProfile) -> AppResult<()> {
        profile.tenant = self.tenant_or_default(&profile.tenant).to_string();
        let lock = self
            .guardian
            .lock(&[
                ip_index_lock_key(&profile.tenant),
                ip_profile_lock_key(&profile.tenant, &profile.id),
            ])
            .await?;
        let result = self.dm.set_ip_profile(profile).await;
        self.guardian.unlock(&lock);
        result
    }

    /// Remove a profile and its ledger
    pub async fn remove_ip_profile(&self, tenant: &str, id: &str) -> AppResult<()> {
        let tenant = self.tenant_or_default(tenant);
        let lock = self
            .guardian
            .lock(&[ip_index_lock_key(tenant), ip_profile_lock_key(tenant, id)])
            .await?;
        let result = self.dm.remove_ip_profile(tenant, id).await;
        self.guardian.unlock(&lock);
        result
    }

    /// Store a filter, re-indexing the profiles that reference it
    pub async fn set_filter(&self, mut filter: Filter) -> AppResult<()> {
        filter.tenant = self.tenant_or_default(&filter.tenant).to_string();
        let lock = self.guardian.lock(&[ip_index_lock_key(&filter.tenant)]).await?;
        let result = self.dm.set_filter(filter).await;
        self.guardian.unlock(&lock);
        result
    }
}
