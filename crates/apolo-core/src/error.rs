//! Unified error handling for Apolo IPs
//!
//! This module provides a single error type covering every failure the IP
//! allocation engine can report, with automatic HTTP response mapping.
//! Errors are `Clone` so that cached RPC outcomes can be replayed verbatim.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("NO_DATABASE_CONNECTION")]
    NoDatabaseConn,

    // ==================== Cache Errors ====================
    #[error("Cache error: {0}")]
    Cache(String),

    // ==================== Locking Errors ====================
    #[error("Lock timeout after {timeout_ms}ms on keys: {keys}")]
    LockTimeout { keys: String, timeout_ms: u64 },

    // ==================== Lease Errors ====================
    #[error("duplicate IP usage with id: {0}")]
    DuplicateUsage(String),

    #[error("cannot find usage record with id: {0}")]
    UsageNotFound(String),

    #[error("cannot find usage records with ids: [{}]", .0.join(" "))]
    UsagesNotFound(Vec<String>),

    // ==================== IP Errors ====================
    #[error("IP_UNAUTHORIZED")]
    IpUnauthorized,

    #[error("no free address left in pool: {0}")]
    PoolExhausted(String),

    #[error("Invalid IP range: {0}")]
    InvalidRange(String),

    // ==================== Filter Errors ====================
    #[error("Filter parse error: {0}")]
    FilterParse(String),

    #[error("broken reference to filter: <{0}>")]
    BrokenReference(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("MANDATORY_IE_MISSING: [{}]", .0.join(" "))]
    MandatoryIeMissing(Vec<String>),

    // ==================== Resource Errors ====================
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_)
            | AppError::InvalidInput(_)
            | AppError::MandatoryIeMissing(_)
            | AppError::FilterParse(_)
            | AppError::InvalidRange(_) => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            AppError::IpUnauthorized => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound(_)
            | AppError::UsageNotFound(_)
            | AppError::UsagesNotFound(_)
            | AppError::UnsupportedMethod(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::DuplicateUsage(_) | AppError::PoolExhausted(_) => StatusCode::CONFLICT,

            // 423 Locked
            AppError::LockTimeout { .. } => StatusCode::LOCKED,

            // 503 Service Unavailable
            AppError::NoDatabaseConn => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::NoDatabaseConn => "no_database_connection",
            AppError::Cache(_) => "cache_error",
            AppError::LockTimeout { .. } => "lock_timeout",
            AppError::DuplicateUsage(_) => "duplicate_usage",
            AppError::UsageNotFound(_) => "usage_not_found",
            AppError::UsagesNotFound(_) => "usages_not_found",
            AppError::IpUnauthorized => "ip_unauthorized",
            AppError::PoolExhausted(_) => "pool_exhausted",
            AppError::InvalidRange(_) => "invalid_range",
            AppError::FilterParse(_) => "filter_parse_error",
            AppError::BrokenReference(_) => "broken_reference",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MandatoryIeMissing(_) => "mandatory_ie_missing",
            AppError::NotFound(_) => "not_found",
            AppError::UnsupportedMethod(_) => "unsupported_method",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Shorthand for checking the not-found family of errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut missing: Vec<String> = err
            .field_errors()
            .keys()
            .map(|field| field.to_string())
            .collect();
        if missing.is_empty() {
            return AppError::Validation(err.to_string());
        }
        missing.sort();
        AppError::MandatoryIeMissing(missing)
    }
}
