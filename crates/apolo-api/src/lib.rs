//! API layer for Apolo IPs
//!
//! HTTP handlers exposing the IP service: the JSON-RPC endpoint plus
//! administrative routes for profiles and filters.

#![forbid(unsafe_code)]
#![warn(clippy::all, missing_docs)]

pub mod dto;
pub mod handlers;

use actix_web::web;

// Re-export DTOs (common types)
pub use dto::{ApiResponse, JsonRpcRequest, JsonRpcResponse};

// Re-export handler configuration functions
pub use handlers::{configure_admin, configure_health, configure_jsonrpc};

/// Configure every route served by the IP service
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.configure(configure_jsonrpc).service(
        web::scope("/api/v1")
            .configure(configure_health)
            .configure(configure_admin),
    );
}
