//! IP allocation services for Apolo IPs
//!
//! This crate contains the logic that turns incoming events into IP leases:
//! named locking, filter evaluation, per-call options, profile matching,
//! pool selection and ledger write-back.
//!
//! # Architecture
//!
//! - `Guardian` serializes access to profiles and ledgers by name
//! - `FilterS` evaluates inline and stored filters against event data
//! - `IpService` owns the matching pipeline and exposes the RPC methods
//! - `BackupScheduler` persists mutated ledgers per the store mode
//!
//! Services are shared across request handlers behind `Arc`.

pub mod filters;
pub mod guardian;
pub mod ips;
pub mod opts;

pub use filters::FilterS;
pub use guardian::{Guardian, LockRef};
pub use ips::backup::BackupScheduler;
pub use ips::IpService;
pub use opts::CallOpts;

/// Service constants
pub mod constants {
    /// APIOpts key overriding the usage ID
    pub const OPTS_IPS_USAGE_ID: &str = "*ipsUsageID";

    /// APIOpts key overriding the lease TTL
    pub const OPTS_IPS_TTL: &str = "*ipsTTL";

    /// APIOpts key overriding the leased units
    pub const OPTS_IPS_UNITS: &str = "*ipsUnits";

    pub const IPS_V1_GET_IPS_FOR_EVENT: &str = "IPsV1.GetIPsForEvent";
    pub const IPS_V1_AUTHORIZE_IPS: &str = "IPsV1.AuthorizeIPs";
    pub const IPS_V1_ALLOCATE_IPS: &str = "IPsV1.AllocateIPs";
    pub const IPS_V1_RELEASE_IPS: &str = "IPsV1.ReleaseIPs";
    pub const IPS_V1_GET_IP: &str = "IPsV1.GetIP";
    pub const IPS_V1_CLEAR_IP_ALLOCATIONS: &str = "IPsV1.ClearIPAllocations";
}
