//! JSON-RPC envelopes
//!
//! Requests carry CGRateS-style method names (`IPsV1.AllocateIPs`) and
//! their argument either as an object or as a one-element array.

use apolo_core::AppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Invalid method parameters
pub const INVALID_PARAMS: i32 = -32602;
/// Unknown method
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Error raised by the called method
pub const SERVER_ERROR: i32 = -32000;

/// Incoming JSON-RPC call
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcRequest {
    /// Protocol version, echoed back
    #[serde(default = "default_version")]
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Method argument
    #[serde(default)]
    pub params: Value,
    /// Request correlation ID
    #[serde(default)]
    pub id: Value,
}

fn default_version() -> String {
    "2.0".to_string()
}

impl JsonRpcRequest {
    /// Decode the method argument
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidInput` if the parameters do not match `T`
    pub fn param<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        let value = match &self.params {
            Value::Array(items) if items.len() == 1 => items[0].clone(),
            other => other.clone(),
        };
        serde_json::from_value(value)
            .map_err(|e| AppError::InvalidInput(format!("invalid params: {}", e)))
    }
}

/// Error object of a failed call
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JsonRpcError {
    /// Numeric error class
    pub code: i32,
    /// Error message as produced by the service
    pub message: String,
    /// Machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl From<&AppError> for JsonRpcError {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::UnsupportedMethod(_) => METHOD_NOT_FOUND,
            AppError::InvalidInput(_)
            | AppError::Validation(_)
            | AppError::MandatoryIeMissing(_) => INVALID_PARAMS,
            _ => SERVER_ERROR,
        };
        Self {
            code,
            message: err.to_string(),
            data: Some(err.error_code().to_string()),
        }
    }
}

/// Outgoing JSON-RPC reply
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcResponse {
    /// Protocol version
    pub jsonrpc: String,
    /// Method result, absent on error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error, absent on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    /// Correlation ID of the request
    pub id: Value,
}

impl JsonRpcResponse {
    /// Reply for a finished call
    pub fn from_result(req: &JsonRpcRequest, result: Result<Value, AppError>) -> Self {
        let (result, error) = match result {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(JsonRpcError::from(&e))),
        };
        Self {
            jsonrpc: req.jsonrpc.clone(),
            result,
            error,
            id: req.id.clone(),
        }
    }
}
