//! IP allocation ledger model
//!
//! A ledger holds the active usages recorded against one IP profile,
//! keyed by the same `Tenant:ID`. `ttl_idx` lists the IDs of usages that
//! carry an expiry, in insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use crate::concatenated_key;

/// One lease recorded on a ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpUsage {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "ExpiryTime", default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<DateTime<Utc>>,

    #[serde(rename = "Units")]
    pub units: f64,

    #[serde(rename = "PoolID", default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,

    #[serde(rename = "Address", default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,

    /// Message of the pool the address was leased from
    #[serde(rename = "Message", default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IpUsage {
    pub fn new(tenant: &str, id: &str, units: f64) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            expiry_time: None,
            units,
            pool_id: None,
            address: None,
            message: None,
        }
    }

    /// Returns the `tenant:id` key
    pub fn tenant_id(&self) -> String {
        concatenated_key(&[&self.tenant, &self.id])
    }

    /// A usage without expiry is always active
    pub fn is_active(&self, at: DateTime<Utc>) -> bool {
        match self.expiry_time {
            None => true,
            Some(expiry) => at < expiry,
        }
    }
}

/// Lease ledger of one IP profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IpAllocations {
    #[serde(rename = "Tenant")]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Usages", default)]
    pub usages: HashMap<String, IpUsage>,

    #[serde(rename = "TTLIdx", default)]
    pub ttl_idx: Vec<String>,
}

impl IpAllocations {
    /// Create an empty ledger
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            usages: HashMap::new(),
            ttl_idx: Vec::new(),
        }
    }

    /// Returns the `tenant:id` key
    pub fn tenant_id(&self) -> String {
        concatenated_key(&[&self.tenant, &self.id])
    }

    /// Sum of units over every recorded usage
    pub fn total_units(&self) -> f64 {
        self.usages.values().map(|u| u.units).sum()
    }

    /// Addresses currently leased out of a pool
    pub fn addresses_in_pool(&self, pool_id: &str) -> HashSet<IpAddr> {
        self.usages
            .values()
            .filter(|u| u.pool_id.as_deref() == Some(pool_id))
            .filter_map(|u| u.address)
            .collect()
    }
}
