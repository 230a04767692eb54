//! Common traits for persistence and filtering
//!
//! Defines the seams between the IP service and its collaborators.

use crate::error::AppError;
use crate::models::{EventView, Filter, IpAllocations, IpProfile};
use async_trait::async_trait;
use std::collections::HashSet;

/// Persistent store for profiles, ledgers, filters and filter indexes
#[async_trait]
pub trait DataDb: Send + Sync {
    /// Find a profile by tenant and ID
    async fn get_ip_profile(&self, tenant: &str, id: &str) -> Result<Option<IpProfile>, AppError>;

    /// Insert or replace a profile
    async fn set_ip_profile(&self, profile: &IpProfile) -> Result<(), AppError>;

    /// Remove a profile, returning whether it existed
    async fn remove_ip_profile(&self, tenant: &str, id: &str) -> Result<bool, AppError>;

    /// IDs of every profile stored for a tenant
    async fn ip_profile_ids(&self, tenant: &str) -> Result<Vec<String>, AppError>;

    /// Find a ledger by tenant and ID
    async fn get_ip_allocations(
        &self,
        tenant: &str,
        id: &str,
    ) -> Result<Option<IpAllocations>, AppError>;

    /// Insert or replace a ledger
    async fn set_ip_allocations(&self, allocs: &IpAllocations) -> Result<(), AppError>;

    /// Remove a ledger, returning whether it existed
    async fn remove_ip_allocations(&self, tenant: &str, id: &str) -> Result<bool, AppError>;

    /// Find a stored filter
    async fn get_filter(&self, tenant: &str, id: &str) -> Result<Option<Filter>, AppError>;

    /// Insert or replace a stored filter
    async fn set_filter(&self, filter: &Filter) -> Result<(), AppError>;

    /// Profile IDs indexed under `idx_key` for a tenant
    async fn get_index(
        &self,
        tenant: &str,
        idx_key: &str,
    ) -> Result<Option<HashSet<String>>, AppError>;

    /// Add profile IDs to an index entry
    async fn add_index_items(
        &self,
        tenant: &str,
        idx_key: &str,
        item_ids: &[String],
    ) -> Result<(), AppError>;

    /// Remove profile IDs from an index entry, dropping it when empty
    async fn remove_index_items(
        &self,
        tenant: &str,
        idx_key: &str,
        item_ids: &[String],
    ) -> Result<(), AppError>;
}

/// Evaluates filter IDs against event data
#[async_trait]
pub trait FilterService: Send + Sync {
    /// Whether every filter passes for the event
    ///
    /// An empty filter list always passes.
    async fn pass(
        &self,
        tenant: &str,
        filter_ids: &[String],
        ev: &EventView<'_>,
    ) -> Result<bool, AppError>;
}
