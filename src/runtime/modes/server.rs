//! Server mode
//!
//! This module contains the HTTP server startup logic.
//! It configures and starts the HTTP server with all necessary routes.

use actix_web::{
    App, HttpServer,
    middleware::{Compress, DefaultHeaders},
    web,
};
use anyhow::Result;
use tracing::{info, warn};

use crate::api::middleware::RequestIdMiddleware;
use crate::api::services::{admin_routes, click_routes, health_routes, postback_routes};
use crate::runtime::lifetime;

/// Run the HTTP server
///
/// This function:
/// 1. Prepares server components (storage, services, webhook worker)
/// 2. Configures and starts the HTTP server
/// 3. Listens for graceful shutdown signals
///
/// **Note**: Logging system must be initialized before calling this function
pub async fn run_server() -> Result<()> {
    let startup = lifetime::startup::prepare_server_startup()
        .await
        .map_err(|e| {
            tracing::error!("Server startup failed: {}", e);
            e
        })?;

    let config = crate::config::get_config();
    let state = startup.state.clone();
    let trusted_proxies = state.trusted_proxies.clone();
    let rate_limit = config.rate_limit.clone();
    let admin_token = config.admin.token.clone();

    let cpu_count = config.server.cpu_count.clamp(1, 32);
    warn!("Using {} CPU cores for the server", cpu_count);

    if admin_token.is_empty() {
        info!("Admin API is disabled (admin.token not set)");
    }
    if trusted_proxies.is_empty() {
        warn!("No trusted proxies configured, client IP is taken from the socket peer");
    }

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestIdMiddleware) // 为每个请求生成 request_id
            .wrap(Compress::default())
            .app_data(web::Data::new(state.clone()))
            .app_data(web::PayloadConfig::new(256 * 1024))
            .app_data(web::JsonConfig::default().limit(256 * 1024))
            .wrap(DefaultHeaders::new().add(("Keep-Alive", "timeout=30, max=1000")))
            .service(health_routes())
            .service(postback_routes(rate_limit.clone(), trusted_proxies.clone()))
            .service(admin_routes(admin_token.clone()))
            .service(click_routes(rate_limit.clone(), trusted_proxies.clone()))
    })
    .keep_alive(std::time::Duration::from_secs(30))
    .client_request_timeout(std::time::Duration::from_millis(5000))
    .client_disconnect_timeout(std::time::Duration::from_millis(1000))
    .workers(cpu_count)
    .disable_signals();

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    warn!("Starting server at http://{}", bind_address);
    let server = server.bind(bind_address)?.run();
    let handle = server.handle();

    // Wait for server or shutdown signal
    tokio::select! {
        res = server => {
            res?;
        }
        _ = lifetime::shutdown::listen_for_shutdown() => {
            handle.stop(true).await;
        }
    }

    lifetime::shutdown::perform_shutdown(startup).await;
    warn!("Graceful shutdown: all tasks completed");
    Ok(())
}
