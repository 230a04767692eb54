//! JSON-RPC handler
//!
//! Single endpoint dispatching the `IPsV1.*` methods to the IP service.

use actix_web::{web, HttpResponse};
use apolo_core::{
    models::{CgrEvent, ClearIpAllocationsArgs, TenantId},
    AppError,
};
use apolo_services::constants::{
    IPS_V1_ALLOCATE_IPS, IPS_V1_AUTHORIZE_IPS, IPS_V1_CLEAR_IP_ALLOCATIONS, IPS_V1_GET_IP,
    IPS_V1_GET_IPS_FOR_EVENT, IPS_V1_RELEASE_IPS,
};
use apolo_services::IpService;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::dto::{JsonRpcRequest, JsonRpcResponse};

fn to_value<T: Serialize>(result: Result<T, AppError>) -> Result<Value, AppError> {
    result.and_then(|reply| serde_json::to_value(reply).map_err(AppError::from))
}

/// Run one call against the service
pub async fn call(svc: &IpService, req: &JsonRpcRequest) -> Result<Value, AppError> {
    match req.method.as_str() {
        IPS_V1_GET_IPS_FOR_EVENT => {
            let ev: CgrEvent = req.param()?;
            to_value(svc.v1_get_ips_for_event(&ev).await)
        }
        IPS_V1_AUTHORIZE_IPS => {
            let ev: CgrEvent = req.param()?;
            to_value(svc.v1_authorize_ips(&ev).await)
        }
        IPS_V1_ALLOCATE_IPS => {
            let ev: CgrEvent = req.param()?;
            to_value(svc.v1_allocate_ips(&ev).await)
        }
        IPS_V1_RELEASE_IPS => {
            let ev: CgrEvent = req.param()?;
            to_value(svc.v1_release_ips(&ev).await)
        }
        IPS_V1_GET_IP => {
            let arg: TenantId = req.param()?;
            to_value(svc.v1_get_ip(&arg).await)
        }
        IPS_V1_CLEAR_IP_ALLOCATIONS => {
            let args: ClearIpAllocationsArgs = req.param()?;
            to_value(svc.v1_clear_ip_allocations(&args).await)
        }
        other => Err(AppError::UnsupportedMethod(other.to_string())),
    }
}

/// Dispatch a JSON-RPC request
///
/// POST /jsonrpc
///
/// Method errors are reported inside the JSON-RPC envelope with HTTP 200.
#[instrument(skip(svc, req), fields(method = %req.method))]
pub async fn dispatch(svc: web::Data<IpService>, req: web::Json<JsonRpcRequest>) -> HttpResponse {
    let result = call(svc.get_ref(), &req).await;
    match &result {
        Ok(_) => debug!("{} succeeded", req.method),
        Err(e) => warn!("<IPs> {} failed: {}", req.method, e),
    }
    HttpResponse::Ok().json(JsonRpcResponse::from_result(&req, result))
}

/// Configure the JSON-RPC route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/jsonrpc", web::post().to(dispatch));
}
