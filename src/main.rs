//! Apolo IPs Server
//!
//! IP allocation engine serving CGRateS-style `IPsV1` JSON-RPC calls.

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpServer};
use anyhow::Context;
use apolo_api::configure_routes;
use apolo_cache::MemoryCache;
use apolo_core::config::AppConfig;
use apolo_db::{connect_data_db, DataManager, IndexSettings};
use apolo_services::{FilterS, Guardian, IpService};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "apolo_ips={},apolo_api={},apolo_services={},apolo_db={},actix_web=info",
            log_level, log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    init_tracing();

    info!("Starting Apolo IPs v{}", env!("CARGO_PKG_VERSION"));

    let config = match env::var("APOLO_CONFIG") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    if !config.ips.enabled {
        warn!("<IPs> service disabled by configuration");
        return Ok(());
    }

    info!("Connecting to {} data store...", config.data_db.db_type);
    let data_db = connect_data_db(&config.data_db)
        .await
        .context("failed to connect data store")?;

    let cache = Arc::new(MemoryCache::new(&config.caches));
    let dm = DataManager::new(Some(data_db), cache, IndexSettings::from(&config.ips));
    let fs = Arc::new(FilterS::new(dm.clone()));
    let guardian = Arc::new(Guardian::new(config.general.locking_timeout()));

    let service = web::Data::new(IpService::new(
        config.general.clone(),
        config.ips.clone(),
        dm,
        fs,
        guardian,
    ));
    service.start();

    let bind_addr = config.server_addr();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    let cors_origins = config.server.cors_origins.clone();
    let app_service = service.clone();
    let server = HttpServer::new(move || {
        let cors_origins_inner = cors_origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                let origins: Vec<&str> = cors_origins_inner.split(',').collect();
                if let Ok(origin_str) = origin.to_str() {
                    origins.iter().any(|o| o.trim() == origin_str)
                } else {
                    false
                }
            })
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(app_service.clone())
            .app_data(web::JsonConfig::default().limit(1024 * 1024))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .configure(configure_routes)
    })
    .workers(config.server.workers)
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let result = server.await;
    service.shutdown().await;
    result.context("HTTP server error")
}
