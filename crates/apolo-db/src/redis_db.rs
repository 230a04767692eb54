//! Redis data store
//!
//! Backs the `*redis` data_db type. Profiles, ledgers and filters are stored
//! as JSON strings; filter indexes are Redis sets of profile IDs.
//!
//! # Key Patterns
//!
//! - `ipp_{tenant}:{id}` - IP profile
//! - `ipa_{tenant}:{id}` - IP allocation ledger
//! - `ftr_{tenant}:{id}` - Stored filter
//! - `ipi_{tenant}:{type}:{path}:{value}` - Filter index set

use apolo_core::{
    concatenated_key,
    models::{Filter, IpAllocations, IpProfile},
    traits::DataDb,
    AppError, AppResult,
};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use tracing::{debug, error, warn};

pub const IP_PROFILE_PREFIX: &str = "ipp_";
pub const IP_ALLOCATIONS_PREFIX: &str = "ipa_";
pub const FILTER_PREFIX: &str = "ftr_";
pub const IP_FILTER_INDEX_PREFIX: &str = "ipi_";

/// Redis implementation of DataDb
///
/// Wraps a Redis ConnectionManager to provide multiplexed access shared by
/// every request and the backup loop.
#[derive(Clone)]
pub struct RedisDb {
    manager: ConnectionManager,
}

impl RedisDb {
    /// Connect to Redis
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns `AppError::Database` if the URL is invalid or the connection fails
    pub async fn new(url: &str) -> AppResult<Self> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::Database(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::Database(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self { manager })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    #[cfg(test)]
    async fn flush_db(&self) -> AppResult<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::Database(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Database(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Database(err.to_string())
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        debug!("GET {}", key);
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn.get(key).await.map_err(Self::map_redis_error)?;
        match raw {
            Some(json) => {
                let value = serde_json::from_str::<T>(&json).map_err(|e| {
                    error!("Failed to deserialize value for key {}: {}", key, e);
                    AppError::Serialization(format!("Deserialization failed: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> AppResult<()> {
        debug!("SET {}", key);
        let json = serde_json::to_string(value)?;
        let mut conn = self.manager.clone();
        let _: () = conn.set(key, json).await.map_err(Self::map_redis_error)?;
        Ok(())
    }

    async fn del(&self, key: &str) -> AppResult<bool> {
        debug!("DEL {}", key);
        let mut conn = self.manager.clone();
        let deleted: i32 = conn.del(key).await.map_err(Self::map_redis_error)?;
        Ok(deleted > 0)
    }

    fn entity_key(prefix: &str, tenant: &str, id: &str) -> String {
        format!("{}{}", prefix, concatenated_key(&[tenant, id]))
    }
}

#[async_trait]
impl DataDb for RedisDb {
    async fn get_ip_profile(&self, tenant: &str, id: &str) -> AppResult<Option<IpProfile>> {
        self.get_json(&Self::entity_key(IP_PROFILE_PREFIX, tenant, id))
            .await
    }

    async fn set_ip_profile(&self, profile: &IpProfile) -> AppResult<()> {
        self.set_json(
            &Self::entity_key(IP_PROFILE_PREFIX, &profile.tenant, &profile.id),
            profile,
        )
        .await
    }

    async fn remove_ip_profile(&self, tenant: &str, id: &str) -> AppResult<bool> {
        self.del(&Self::entity_key(IP_PROFILE_PREFIX, tenant, id)).await
    }

    async fn ip_profile_ids(&self, tenant: &str) -> AppResult<Vec<String>> {
        let prefix = Self::entity_key(IP_PROFILE_PREFIX, tenant, "");
        let mut conn = self.manager.clone();
        let keys: Vec<String> = conn
            .keys(format!("{}*", prefix))
            .await
            .map_err(Self::map_redis_error)?;
        let mut ids: Vec<String> = keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_ip_allocations(&self, tenant: &str, id: &str) -> AppResult<Option<IpAllocations>> {
        self.get_json(&Self::entity_key(IP_ALLOCATIONS_PREFIX, tenant, id))
            .await
    }

    async fn set_ip_allocations(&self, allocs: &IpAllocations) -> AppResult<()> {
        self.set_json(
            &Self::entity_key(IP_ALLOCATIONS_PREFIX, &allocs.tenant, &allocs.id),
            allocs,
        )
        .await
    }

    async fn remove_ip_allocations(&self, tenant: &str, id: &str) -> AppResult<bool> {
        self.del(&Self::entity_key(IP_ALLOCATIONS_PREFIX, tenant, id))
            .await
    }

    async fn get_filter(&self, tenant: &str, id: &str) -> AppResult<Option<Filter>> {
        self.get_json(&Self::entity_key(FILTER_PREFIX, tenant, id)).await
    }

    async fn set_filter(&self, filter: &Filter) -> AppResult<()> {
        self.set_json(
            &Self::entity_key(FILTER_PREFIX, &filter.tenant, &filter.id),
            filter,
        )
        .await
    }

    async fn get_index(&self, tenant: &str, idx_key: &str) -> AppResult<Option<HashSet<String>>> {
        let key = Self::entity_key(IP_FILTER_INDEX_PREFIX, tenant, idx_key);
        debug!("SMEMBERS {}", key);
        let mut conn = self.manager.clone();
        let members: HashSet<String> = conn
            .smembers(&key)
            .await
            .map_err(Self::map_redis_error)?;
        Ok((!members.is_empty()).then_some(members))
    }

    async fn add_index_items(&self, tenant: &str, idx_key: &str, item_ids: &[String]) -> AppResult<()> {
        if item_ids.is_empty() {
            return Ok(());
        }
        let key = Self::entity_key(IP_FILTER_INDEX_PREFIX, tenant, idx_key);
        debug!("SADD {} {:?}", key, item_ids);
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .sadd(&key, item_ids)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    async fn remove_index_items(
        &self,
        tenant: &str,
        idx_key: &str,
        item_ids: &[String],
    ) -> AppResult<()> {
        if item_ids.is_empty() {
            return Ok(());
        }
        let key = Self::entity_key(IP_FILTER_INDEX_PREFIX, tenant, idx_key);
        debug!("SREM {} {:?}", key, item_ids);
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .srem(&key, item_ids)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apolo_core::models::IpUsage;

    async fn setup_db() -> RedisDb {
        let db = RedisDb::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        db.flush_db().await.expect("Failed to flush DB");
        db
    }

    #[test]
    fn test_entity_key() {
        assert_eq!(
            RedisDb::entity_key(IP_PROFILE_PREFIX, "cgrates.org", "IPs1"),
            "ipp_cgrates.org:IPs1"
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ping() {
        let db = setup_db().await;
        assert!(db.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_profile_roundtrip() {
        let db = setup_db().await;
        let prfl = IpProfile::new("cgrates.org", "IPs1");

        db.set_ip_profile(&prfl).await.unwrap();
        assert_eq!(
            db.get_ip_profile("cgrates.org", "IPs1").await.unwrap(),
            Some(prfl)
        );
        assert_eq!(
            db.ip_profile_ids("cgrates.org").await.unwrap(),
            vec!["IPs1".to_string()]
        );
        assert!(db.remove_ip_profile("cgrates.org", "IPs1").await.unwrap());
        assert!(db.get_ip_profile("cgrates.org", "IPs1").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_allocations_roundtrip() {
        let db = setup_db().await;
        let mut allocs = IpAllocations::new("cgrates.org", "IPs1");
        let usage = IpUsage::new("cgrates.org", "u1", 5.0);
        allocs.usages.insert(usage.id.clone(), usage);

        db.set_ip_allocations(&allocs).await.unwrap();
        let stored = db
            .get_ip_allocations("cgrates.org", "IPs1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.usages["u1"].units, 5.0);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_index_sets() {
        let db = setup_db().await;
        let key = "*string:*req.Account:1001";
        db.add_index_items("cgrates.org", key, &["IPs1".to_string()])
            .await
            .unwrap();
        assert!(db
            .get_index("cgrates.org", key)
            .await
            .unwrap()
            .unwrap()
            .contains("IPs1"));

        db.remove_index_items("cgrates.org", key, &["IPs1".to_string()])
            .await
            .unwrap();
        assert!(db.get_index("cgrates.org", key).await.unwrap().is_none());
    }
}
