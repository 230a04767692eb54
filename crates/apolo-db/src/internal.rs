//! In-memory data store
//!
//! Backs the `*internal` data_db type. Items are kept as owned clones in
//! tenant-scoped maps; nothing survives a restart.

use apolo_core::{
    concatenated_key,
    models::{Filter, IpAllocations, IpProfile},
    traits::DataDb,
    AppResult,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// In-memory implementation of DataDb
#[derive(Default)]
pub struct InternalDb {
    profiles: RwLock<HashMap<String, IpProfile>>,
    allocations: RwLock<HashMap<String, IpAllocations>>,
    filters: RwLock<HashMap<String, Filter>>,
    indexes: RwLock<HashMap<String, HashSet<String>>>,
}

impl InternalDb {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataDb for InternalDb {
    async fn get_ip_profile(&self, tenant: &str, id: &str) -> AppResult<Option<IpProfile>> {
        Ok(self
            .profiles
            .read()
            .get(&concatenated_key(&[tenant, id]))
            .cloned())
    }

    async fn set_ip_profile(&self, profile: &IpProfile) -> AppResult<()> {
        debug!("Storing IP profile {}", profile.tenant_id());
        self.profiles
            .write()
            .insert(profile.tenant_id(), profile.clone());
        Ok(())
    }

    async fn remove_ip_profile(&self, tenant: &str, id: &str) -> AppResult<bool> {
        Ok(self
            .profiles
            .write()
            .remove(&concatenated_key(&[tenant, id]))
            .is_some())
    }

    async fn ip_profile_ids(&self, tenant: &str) -> AppResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .profiles
            .read()
            .values()
            .filter(|p| p.tenant == tenant)
            .map(|p| p.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_ip_allocations(&self, tenant: &str, id: &str) -> AppResult<Option<IpAllocations>> {
        Ok(self
            .allocations
            .read()
            .get(&concatenated_key(&[tenant, id]))
            .cloned())
    }

    async fn set_ip_allocations(&self, allocs: &IpAllocations) -> AppResult<()> {
        debug!("Storing IP allocations {}", allocs.tenant_id());
        self.allocations
            .write()
            .insert(allocs.tenant_id(), allocs.clone());
        Ok(())
    }

    async fn remove_ip_allocations(&self, tenant: &str, id: &str) -> AppResult<bool> {
        Ok(self
            .allocations
            .write()
            .remove(&concatenated_key(&[tenant, id]))
            .is_some())
    }

    async fn get_filter(&self, tenant: &str, id: &str) -> AppResult<Option<Filter>> {
        Ok(self
            .filters
            .read()
            .get(&concatenated_key(&[tenant, id]))
            .cloned())
    }

    async fn set_filter(&self, filter: &Filter) -> AppResult<()> {
        self.filters.write().insert(
            concatenated_key(&[&filter.tenant, &filter.id]),
            filter.clone(),
        );
        Ok(())
    }

    async fn get_index(&self, tenant: &str, idx_key: &str) -> AppResult<Option<HashSet<String>>> {
        Ok(self
            .indexes
            .read()
            .get(&concatenated_key(&[tenant, idx_key]))
            .cloned())
    }

    async fn add_index_items(&self, tenant: &str, idx_key: &str, item_ids: &[String]) -> AppResult<()> {
        self.indexes
            .write()
            .entry(concatenated_key(&[tenant, idx_key]))
            .or_default()
            .extend(item_ids.iter().cloned());
        Ok(())
    }

    async fn remove_index_items(
        &self,
        tenant: &str,
        idx_key: &str,
        item_ids: &[String],
    ) -> AppResult<()> {
        let key = concatenated_key(&[tenant, idx_key]);
        let mut indexes = self.indexes.write();
        if let Some(items) = indexes.get_mut(&key) {
            for id in item_ids {
                items.remove(id);
            }
            if items.is_empty() {
                indexes.remove(&key);
            }
        }
        Ok(())
    }
}
