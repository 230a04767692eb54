//! Health check handler

use actix_web::{web, HttpResponse};
use apolo_services::IpService;

/// Health check endpoint
///
/// GET /api/v1/health
pub async fn health_check(svc: web::Data<IpService>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "apolo-ips",
        "version": env!("CARGO_PKG_VERSION"),
        "data_db": svc.data_manager().has_data_db(),
        "backup_loop": svc.backup().is_running(),
    }))
}

/// Configure the health route
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check));
}
