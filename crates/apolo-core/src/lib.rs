//! Apolo IPs Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Apolo IP allocation engine. It includes:
//!
//! - Domain models (IP profiles, pools, allocation ledgers, events, filters)
//! - Seam traits for persistence and filter evaluation
//! - Unified error handling with HTTP response mapping
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Reply used by state-changing RPCs
pub const OK: &str = "OK";

/// Builds the `a:b:c` style key used for tenant-scoped lookups
pub fn concatenated_key(parts: &[&str]) -> String {
    parts.join(":")
}
