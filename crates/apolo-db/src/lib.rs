//! Apolo IPs Data Layer
//!
//! This crate provides persistence and cached data access for the IP
//! allocation engine. It includes:
//!
//! - An in-memory store backend (`*internal`)
//! - A Redis store backend (`*redis`) built on a multiplexed ConnectionManager
//! - `DataManager`, which fronts the store with the shared read cache
//! - Filter index maintenance and candidate lookup for IP profiles

pub mod indexer;
pub mod internal;
pub mod manager;
pub mod redis_db;

pub use indexer::IndexSettings;
pub use internal::InternalDb;
pub use manager::{DataManager, SharedAllocations};
pub use redis_db::RedisDb;

// Re-export commonly used types
pub use apolo_core::{AppError, AppResult};

use apolo_core::config::DataDbConfig;
use apolo_core::traits::DataDb;
use std::sync::Arc;
use tracing::info;

/// Build the store backend selected by configuration
///
/// # Errors
///
/// Returns `AppError::Config` for an unknown `db_type` or a Redis backend
/// without URL, and `AppError::Database` if Redis is unreachable
pub async fn connect_data_db(cfg: &DataDbConfig) -> AppResult<Arc<dyn DataDb>> {
    match cfg.db_type.as_str() {
        "*internal" => {
            info!("Using internal data_db");
            Ok(Arc::new(InternalDb::new()))
        }
        "*redis" => {
            let url = cfg
                .url
                .as_deref()
                .ok_or_else(|| AppError::Config("data_db.url is required for *redis".to_string()))?;
            let db = RedisDb::new(url).await?;
            db.ping().await?;
            info!("Connected to redis data_db");
            Ok(Arc::new(db))
        }
        other => Err(AppError::Config(format!("unsupported data_db type: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_internal() {
        assert!(connect_data_db(&DataDbConfig::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_type() {
        let cfg = DataDbConfig {
            db_type: "*mongo".to_string(),
            url: None,
        };
        assert!(matches!(
            connect_data_db(&cfg).await,
            Err(AppError::Config(_))
        ));

        let cfg = DataDbConfig {
            db_type: "*redis".to_string(),
            url: None,
        };
        assert!(matches!(
            connect_data_db(&cfg).await,
            Err(AppError::Config(_))
        ));
    }
}
