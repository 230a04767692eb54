//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::models::DynamicOpt;

/// Cache partition holding IP profiles
pub const CACHE_IP_PROFILES: &str = "*ip_profiles";
/// Cache partition holding IP allocation ledgers
pub const CACHE_IP_ALLOCATIONS: &str = "*ip_allocations";
/// Cache partition memoizing matched profile IDs per usage
pub const CACHE_EVENT_IPS: &str = "*event_ips";
/// Cache partition holding filter index lookups
pub const CACHE_IP_FILTER_INDEXES: &str = "*ip_filter_indexes";
/// Cache partition holding stored filters
pub const CACHE_FILTERS: &str = "*filters";
/// Cache partition replaying RPC responses
pub const CACHE_RPC_RESPONSES: &str = "*rpc_responses";

/// Main application configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub ips: IpsConfig,
    #[serde(default)]
    pub data_db: DataDbConfig,
    #[serde(default)]
    pub caches: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Comma separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_cors_origins() -> String {
    "http://localhost:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// Settings shared by every subsystem
#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    /// Tenant used when a request does not carry one
    #[serde(default = "default_tenant")]
    pub default_tenant: String,

    /// Maximum wait for a named lock, 0 waits forever
    #[serde(default = "default_locking_timeout")]
    pub locking_timeout_ms: u64,
}

fn default_tenant() -> String {
    "cgrates.org".to_string()
}

fn default_locking_timeout() -> u64 {
    0
}

impl GeneralConfig {
    /// Lock timeout as a duration, `None` meaning no timeout
    pub fn locking_timeout(&self) -> Option<Duration> {
        match self.locking_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            default_tenant: default_tenant(),
            locking_timeout_ms: default_locking_timeout(),
        }
    }
}

/// IP service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct IpsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Persistence regime: 0 disabled, negative synchronous,
    /// positive batched every that many milliseconds
    #[serde(default)]
    pub store_interval_ms: i64,

    /// Resolve candidate profiles through filter indexes
    #[serde(default = "default_true")]
    pub indexed_selects: bool,

    /// Fields checked against `*string` indexes, all event fields when unset
    #[serde(default)]
    pub string_indexed_fields: Option<Vec<String>>,

    #[serde(default)]
    pub prefix_indexed_fields: Option<Vec<String>>,

    #[serde(default)]
    pub suffix_indexed_fields: Option<Vec<String>>,

    #[serde(default)]
    pub exists_indexed_fields: Option<Vec<String>>,

    /// Fields checked against `*notexists` indexes, none when unset
    #[serde(default)]
    pub notexists_indexed_fields: Option<Vec<String>>,

    /// Expand nested event objects when collecting index fields
    #[serde(default)]
    pub nested_fields: bool,

    #[serde(default)]
    pub opts: IpsOpts,
}

fn default_true() -> bool {
    true
}

impl IpsConfig {
    /// Persistence regime selected by `store_interval_ms`
    pub fn store_mode(&self) -> StoreMode {
        match self.store_interval_ms {
            0 => StoreMode::Disabled,
            ms if ms < 0 => StoreMode::Synchronous,
            ms => StoreMode::Batched(Duration::from_millis(ms as u64)),
        }
    }
}

impl Default for IpsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_interval_ms: 0,
            indexed_selects: true,
            string_indexed_fields: None,
            prefix_indexed_fields: None,
            suffix_indexed_fields: None,
            exists_indexed_fields: None,
            notexists_indexed_fields: None,
            nested_fields: false,
            opts: IpsOpts::default(),
        }
    }
}

/// How mutated ledgers reach the persistent store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Disabled,
    Synchronous,
    Batched(Duration),
}

/// Per-call option rules and their static defaults
#[derive(Debug, Deserialize, Clone)]
pub struct IpsOpts {
    #[serde(default)]
    pub usage_id: Vec<DynamicOpt<String>>,

    /// Lease duration overrides as duration strings (`1s`, `-1`)
    #[serde(default)]
    pub ttl: Vec<DynamicOpt<String>>,

    #[serde(default)]
    pub units: Vec<DynamicOpt<f64>>,

    #[serde(default)]
    pub default_usage_id: String,

    #[serde(default)]
    pub default_ttl: Option<String>,

    #[serde(default = "default_units")]
    pub default_units: f64,
}

fn default_units() -> f64 {
    1.0
}

impl Default for IpsOpts {
    fn default() -> Self {
        Self {
            usage_id: Vec::new(),
            ttl: Vec::new(),
            units: Vec::new(),
            default_usage_id: String::new(),
            default_ttl: None,
            default_units: default_units(),
        }
    }
}

/// Persistent store configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DataDbConfig {
    /// `*internal` or `*redis`
    #[serde(default = "default_db_type")]
    pub db_type: String,

    /// Redis connection URL, used by the `*redis` backend
    #[serde(default)]
    pub url: Option<String>,
}

fn default_db_type() -> String {
    "*internal".to_string()
}

impl Default for DataDbConfig {
    fn default() -> Self {
        Self {
            db_type: default_db_type(),
            url: None,
        }
    }
}

/// Cache configuration, one entry per partition
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub partitions: HashMap<String, PartitionConfig>,
}

impl CacheConfig {
    /// Effective settings of a partition, falling back to built-in defaults
    pub fn partition(&self, name: &str) -> PartitionConfig {
        self.partitions
            .get(name)
            .cloned()
            .unwrap_or_else(|| PartitionConfig::default_for(name))
    }

    /// Names of every partition the IP service consumes
    pub fn partition_names() -> [&'static str; 6] {
        [
            CACHE_IP_PROFILES,
            CACHE_IP_ALLOCATIONS,
            CACHE_EVENT_IPS,
            CACHE_IP_FILTER_INDEXES,
            CACHE_FILTERS,
            CACHE_RPC_RESPONSES,
        ]
    }
}

/// Size and expiry policy of a cache partition
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PartitionConfig {
    /// Maximum number of items: -1 unlimited, 0 disables the partition
    #[serde(default = "default_limit")]
    pub limit: i64,

    /// Item lifetime in seconds, 0 for no expiry
    #[serde(default)]
    pub ttl_secs: u64,

    /// When false, reads push the expiry forward
    #[serde(default)]
    pub static_ttl: bool,
}

fn default_limit() -> i64 {
    -1
}

impl PartitionConfig {
    pub fn new(limit: i64, ttl_secs: u64, static_ttl: bool) -> Self {
        Self {
            limit,
            ttl_secs,
            static_ttl,
        }
    }

    /// Built-in policy per partition; RPC response replay is opt-in
    pub fn default_for(name: &str) -> Self {
        match name {
            CACHE_RPC_RESPONSES => Self::new(0, 2, false),
            _ => Self::new(-1, 0, false),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 2080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("general.default_tenant", "cgrates.org")?
            .set_default("general.locking_timeout_ms", 0)?
            .set_default("ips.enabled", true)?
            .set_default("ips.store_interval_ms", 0)?
            .set_default("ips.indexed_selects", true)?
            .set_default("data_db.db_type", "*internal")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with APOLO_ prefix
            .add_source(
                Environment::with_prefix("APOLO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("APOLO").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.general.default_tenant, "cgrates.org");
        assert_eq!(config.general.locking_timeout(), None);
        assert!(config.ips.indexed_selects);
        assert_eq!(config.ips.opts.default_units, 1.0);
        assert_eq!(config.data_db.db_type, "*internal");
    }

    #[test]
    fn test_store_mode() {
        let mut ips = IpsConfig::default();
        assert_eq!(ips.store_mode(), StoreMode::Disabled);
        ips.store_interval_ms = -1;
        assert_eq!(ips.store_mode(), StoreMode::Synchronous);
        ips.store_interval_ms = 250;
        assert_eq!(
            ips.store_mode(),
            StoreMode::Batched(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_partition_fallbacks() {
        let mut caches = CacheConfig::default();
        assert_eq!(caches.partition(CACHE_RPC_RESPONSES).limit, 0);
        assert_eq!(caches.partition(CACHE_EVENT_IPS).limit, -1);

        caches.partitions.insert(
            CACHE_RPC_RESPONSES.to_string(),
            PartitionConfig::new(100, 10, true),
        );
        assert_eq!(
            caches.partition(CACHE_RPC_RESPONSES),
            PartitionConfig::new(100, 10, true)
        );
    }

    #[test]
    fn test_locking_timeout() {
        let general = GeneralConfig {
            default_tenant: "cgrates.org".to_string(),
            locking_timeout_ms: 150,
        };
        assert_eq!(general.locking_timeout(), Some(Duration::from_millis(150)));
    }
}
