//! Cache and lock key builders for Apolo IPs
//!
//! Provides standardized key naming patterns for cached entities and named
//! locks, ensuring consistency across the application and preventing
//! key collisions.
//!
//! # Key Patterns
//!
//! - `*ip_profiles:{tenant}:{id}` - Lock guarding an IP profile
//! - `*ip_allocations:{tenant}:{id}` - Lock guarding an allocation ledger
//! - `*ip_filter_indexes:{tenant}` - Lock guarding index resolution
//! - `{method}:{tenant}:{event_id}` - RPC response replay entries
//! - `{type}:{path}:{value}` - Filter index entries
//!
//! # Example
//!
//! ```
//! use apolo_cache::keys;
//!
//! let key = keys::ip_profile_lock_key("cgrates.org", "IPs1");
//! assert_eq!(key, "*ip_profiles:cgrates.org:IPs1");
//! ```

use apolo_core::config::{CACHE_IP_ALLOCATIONS, CACHE_IP_FILTER_INDEXES, CACHE_IP_PROFILES};
use apolo_core::concatenated_key;

/// Build the lock key of an IP profile
///
/// # Arguments
///
/// * `tenant` - The tenant owning the profile
/// * `id` - The profile ID
///
/// # Returns
///
/// A key in the format `*ip_profiles:{tenant}:{id}`
pub fn ip_profile_lock_key(tenant: &str, id: &str) -> String {
    concatenated_key(&[CACHE_IP_PROFILES, tenant, id])
}

/// Build the lock key of an IP allocation ledger
///
/// # Arguments
///
/// * `tenant` - The tenant owning the ledger
/// * `id` - The ledger ID, equal to its profile ID
///
/// # Returns
///
/// A key in the format `*ip_allocations:{tenant}:{id}`
///
/// # Example
///
/// ```
/// use apolo_cache::keys::ip_allocations_lock_key;
///
/// let key = ip_allocations_lock_key("cgrates.org", "IPs1");
/// assert_eq!(key, "*ip_allocations:cgrates.org:IPs1");
/// ```
pub fn ip_allocations_lock_key(tenant: &str, id: &str) -> String {
    concatenated_key(&[CACHE_IP_ALLOCATIONS, tenant, id])
}

/// Build the lock key serializing filter index access for a tenant
pub fn ip_index_lock_key(tenant: &str) -> String {
    concatenated_key(&[CACHE_IP_FILTER_INDEXES, tenant])
}

/// Build the RPC response cache key
///
/// # Arguments
///
/// * `method` - The RPC method name (e.g., "IPsV1.AllocateIPs")
/// * `tenant` - The resolved tenant
/// * `event_id` - The ID of the request event
///
/// # Returns
///
/// A key in the format `{method}:{tenant}:{event_id}`
pub fn rpc_cache_key(method: &str, tenant: &str, event_id: &str) -> String {
    concatenated_key(&[method, tenant, event_id])
}

/// Build a filter index key
///
/// # Arguments
///
/// * `filter_type` - Index type (e.g., "*string", "*prefix", "*none")
/// * `path` - Field path without the leading `~` (e.g., "*req.Account")
/// * `value` - Indexed value
///
/// # Example
///
/// ```
/// use apolo_cache::keys::filter_index_key;
///
/// let key = filter_index_key("*string", "*req.Account", "1001");
/// assert_eq!(key, "*string:*req.Account:1001");
/// ```
pub fn filter_index_key(filter_type: &str, path: &str, value: &str) -> String {
    concatenated_key(&[filter_type, path, value])
}

/// Build the cache key of a filter index lookup, scoped to a tenant
pub fn tenant_index_key(tenant: &str, idx_key: &str) -> String {
    concatenated_key(&[tenant, idx_key])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_keys() {
        assert_eq!(
            ip_profile_lock_key("cgrates.org", "IPs1"),
            "*ip_profiles:cgrates.org:IPs1"
        );
        assert_eq!(
            ip_allocations_lock_key("cgrates.org", "IPs1"),
            "*ip_allocations:cgrates.org:IPs1"
        );
        assert_eq!(ip_index_lock_key("cgrates.org"), "*ip_filter_indexes:cgrates.org");
    }

    #[test]
    fn test_rpc_cache_key() {
        assert_eq!(
            rpc_cache_key("IPsV1.AllocateIPs", "cgrates.org", "ev1"),
            "IPsV1.AllocateIPs:cgrates.org:ev1"
        );
    }

    #[test]
    fn test_key_uniqueness() {
        // Profile and ledger locks of the same entity must not collide
        let keys = vec![
            ip_profile_lock_key("cgrates.org", "IPs1"),
            ip_allocations_lock_key("cgrates.org", "IPs1"),
            ip_index_lock_key("cgrates.org"),
        ];

        let unique_count = keys.iter().collect::<std::collections::HashSet<_>>().len();
        assert_eq!(unique_count, keys.len());
    }
}
