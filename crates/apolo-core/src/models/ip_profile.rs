//! IP profile and pool configuration

use serde::{Deserialize, Serialize};
use std::fmt;

use super::dynamic::{DynamicBlocker, DynamicWeight, LeaseTtl};
use crate::concatenated_key;

/// Tenant-scoped configuration of one IP allocation ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpProfile {
    #[serde(rename = "Tenant")]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,

    #[serde(rename = "Weights", default)]
    pub weights: Vec<DynamicWeight>,

    /// Default lease duration for usages recorded against this profile
    #[serde(rename = "TTL", default)]
    pub ttl: LeaseTtl,

    /// Whether the ledger requires durable persistence
    #[serde(rename = "Stored", default)]
    pub stored: bool,

    #[serde(rename = "Pools", default)]
    pub pools: Vec<IpPool>,
}

impl IpProfile {
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            filter_ids: Vec::new(),
            weights: Vec::new(),
            ttl: LeaseTtl::Unlimited,
            stored: false,
            pools: Vec::new(),
        }
    }

    /// Returns the `tenant:id` key
    pub fn tenant_id(&self) -> String {
        concatenated_key(&[&self.tenant, &self.id])
    }

    /// Look up a pool declared on this profile
    pub fn pool(&self, pool_id: &str) -> Option<&IpPool> {
        self.pools.iter().find(|p| p.id == pool_id)
    }
}

/// Address family of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AddressFamily {
    #[default]
    #[serde(rename = "*ipv4")]
    Ipv4,
    #[serde(rename = "*ipv6")]
    Ipv6,
}

/// Order in which free addresses of a pool are handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllocationStrategy {
    #[default]
    #[serde(rename = "*ascending")]
    Ascending,
    #[serde(rename = "*descending")]
    Descending,
    #[serde(rename = "*random")]
    Random,
}

impl fmt::Display for AllocationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AllocationStrategy::Ascending => "*ascending",
            AllocationStrategy::Descending => "*descending",
            AllocationStrategy::Random => "*random",
        };
        write!(f, "{}", s)
    }
}

/// One address pool inside a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpPool {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,

    #[serde(rename = "Type", default)]
    pub family: AddressFamily,

    /// CIDR range, e.g. `192.168.122.0/24` or `10.0.0.1/32`
    #[serde(rename = "Range")]
    pub range: String,

    #[serde(rename = "Strategy", default)]
    pub strategy: AllocationStrategy,

    #[serde(rename = "Message", default)]
    pub message: String,

    #[serde(rename = "Weights", default)]
    pub weights: Vec<DynamicWeight>,

    #[serde(rename = "Blockers", default)]
    pub blockers: Vec<DynamicBlocker>,
}

impl IpPool {
    pub fn new(id: &str, range: &str) -> Self {
        Self {
            id: id.to_string(),
            filter_ids: Vec::new(),
            family: AddressFamily::Ipv4,
            range: range.to_string(),
            strategy: AllocationStrategy::Ascending,
            message: String::new(),
            weights: Vec::new(),
            blockers: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_profile_deserialize() {
        let prfl: IpProfile = serde_json::from_value(json!({
            "Tenant": "cgrates.org",
            "ID": "IPs1",
            "FilterIDs": ["*string:~*req.Account:1001"],
            "Weights": [{"Weight": 10}],
            "TTL": "1s",
            "Stored": true,
            "Pools": [{
                "ID": "POOL1",
                "Type": "*ipv4",
                "Range": "192.168.122.0/30",
                "Strategy": "*descending",
                "Message": "Allocated by IPs1",
                "Blockers": [{"Blocker": true}]
            }]
        }))
        .unwrap();

        assert_eq!(prfl.tenant_id(), "cgrates.org:IPs1");
        assert_eq!(prfl.ttl, LeaseTtl::Expiring(Duration::from_secs(1)));
        assert_eq!(prfl.weights[0].weight, 10.0);
        let pool = prfl.pool("POOL1").unwrap();
        assert_eq!(pool.strategy, AllocationStrategy::Descending);
        assert_eq!(pool.family, AddressFamily::Ipv4);
        assert!(pool.blockers[0].blocker);
        assert!(prfl.pool("POOL2").is_none());
    }

    #[test]
    fn test_profile_defaults() {
        let prfl: IpProfile =
            serde_json::from_value(json!({"Tenant": "cgrates.org", "ID": "IPs2"})).unwrap();
        assert_eq!(prfl.ttl, LeaseTtl::Unlimited);
        assert!(!prfl.stored);
        assert!(prfl.pools.is_empty());
    }
}
