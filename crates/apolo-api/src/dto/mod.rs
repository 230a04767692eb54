//! Data Transfer Objects (DTOs) for API requests and responses

pub mod common;
pub mod jsonrpc;

pub use common::*;
pub use jsonrpc::*;
