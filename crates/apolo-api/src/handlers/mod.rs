//! HTTP request handlers

pub mod admin;
pub mod health;
pub mod jsonrpc;

pub use admin::configure as configure_admin;
pub use health::configure as configure_health;
pub use jsonrpc::configure as configure_jsonrpc;
