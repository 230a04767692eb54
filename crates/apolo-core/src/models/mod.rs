//! Domain models for the IP allocation engine

pub mod dynamic;
pub mod event;
pub mod filter;
pub mod ip_allocations;
pub mod ip_profile;

pub use dynamic::*;
pub use event::*;
pub use filter::*;
pub use ip_allocations::*;
pub use ip_profile::*;
