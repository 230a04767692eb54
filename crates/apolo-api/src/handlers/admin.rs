//! Administrative handlers
//!
//! REST-style endpoints to load IP profiles and filters.

use actix_web::{web, HttpResponse};
use apolo_core::{
    models::{Filter, IpProfile},
    AppError, OK,
};
use apolo_services::IpService;
use tracing::{info, instrument};

use crate::dto::ApiResponse;

/// Get a stored IP profile
///
/// GET /api/v1/ip-profiles/{tenant}/{id}
#[instrument(skip(svc))]
pub async fn get_ip_profile(
    svc: web::Data<IpService>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (tenant, id) = path.into_inner();
    let profile = svc.data_manager().get_ip_profile(&tenant, &id).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::success(profile.as_ref())))
}

/// Create or replace an IP profile
///
/// PUT /api/v1/ip-profiles
#[instrument(skip(svc, profile), fields(id = %profile.id))]
pub async fn set_ip_profile(
    svc: web::Data<IpService>,
    profile: web::Json<IpProfile>,
) -> Result<HttpResponse, AppError> {
    let profile = profile.into_inner();
    if profile.id.is_empty() {
        return Err(AppError::MandatoryIeMissing(vec!["ID".to_string()]));
    }
    svc.set_ip_profile(profile).await?;
    info!("IP profile stored");
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(OK, "IP profile stored")))
}

/// Remove an IP profile and its allocations
///
/// DELETE /api/v1/ip-profiles/{tenant}/{id}
#[instrument(skip(svc))]
pub async fn remove_ip_profile(
    svc: web::Data<IpService>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, AppError> {
    let (tenant, id) = path.into_inner();
    svc.remove_ip_profile(&tenant, &id).await?;
    info!(tenant = %tenant, id = %id, "IP profile removed");
    Ok(HttpResponse::NoContent().finish())
}

/// Create or replace a filter
///
/// PUT /api/v1/filters
#[instrument(skip(svc, filter), fields(id = %filter.id))]
pub async fn set_filter(
    svc: web::Data<IpService>,
    filter: web::Json<Filter>,
) -> Result<HttpResponse, AppError> {
    let filter = filter.into_inner();
    if filter.id.is_empty() {
        return Err(AppError::MandatoryIeMissing(vec!["ID".to_string()]));
    }
    svc.set_filter(filter).await?;
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(OK, "Filter stored")))
}

/// Configure admin routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/ip-profiles")
            .route("", web::put().to(set_ip_profile))
            .route("/{tenant}/{id}", web::get().to(get_ip_profile))
            .route("/{tenant}/{id}", web::delete().to(remove_ip_profile)),
    )
    .service(web::scope("/filters").route("", web::put().to(set_filter)));
}
