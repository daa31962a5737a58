use actix_web::{HttpResponse, web};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{error, trace};

use crate::api::response::{ApiError, ApiResponse};
use crate::api::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub database: DatabaseCheck,
    pub dead_letters: Option<u64>,
    pub response_time_ms: u32,
}

#[derive(Debug, Serialize)]
pub struct DatabaseCheck {
    pub status: &'static str,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 存活 + 数据库 ping
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let started = Instant::now();
    trace!("Received health check request");

    let database = match tokio::time::timeout(Duration::from_secs(5), state.storage.ping()).await {
        Ok(Ok(())) => DatabaseCheck {
            status: "healthy",
            backend: state.storage.backend_name().to_string(),
            error: None,
        },
        Ok(Err(e)) => {
            error!("Database health check failed: {}", e);
            DatabaseCheck {
                status: "unhealthy",
                backend: state.storage.backend_name().to_string(),
                error: Some(e.to_string()),
            }
        }
        Err(_) => {
            error!("Database health check timed out");
            DatabaseCheck {
                status: "unhealthy",
                backend: state.storage.backend_name().to_string(),
                error: Some("timeout".to_string()),
            }
        }
    };

    let healthy = database.status == "healthy";
    let dead_letters = if healthy {
        state.storage.count_dlq_items().await.ok()
    } else {
        None
    };

    let now = chrono::Utc::now();
    let report = HealthReport {
        status: if healthy { "healthy" } else { "unhealthy" },
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds().max(0) as u64,
        database,
        dead_letters,
        response_time_ms: started.elapsed().as_millis() as u32,
    };

    if healthy {
        HttpResponse::Ok().json(ApiResponse {
            success: true,
            data: Some(report),
            error: None,
        })
    } else {
        HttpResponse::ServiceUnavailable().json(ApiResponse {
            success: false,
            data: Some(report),
            error: Some(ApiError {
                code: "SERVICE_UNAVAILABLE".to_string(),
                message: "database unavailable".to_string(),
            }),
        })
    }
}
