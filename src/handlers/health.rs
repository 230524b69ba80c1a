use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::AppResult;
use crate::models::HealthResponse;
use crate::services::transforms::CompressTransform;
use crate::services::JobService;

/// Health check endpoint
pub async fn health_handler(State(service): State<JobService>) -> AppResult<Json<Value>> {
    info!("Health check requested");

    let root = service.workspaces().root().to_path_buf();
    let upload_root_writable =
        tokio::task::spawn_blocking(move || std::fs::create_dir_all(root).is_ok())
            .await
            .unwrap_or(false);

    let status = if upload_root_writable {
        "healthy"
    } else {
        "degraded"
    };

    let response = json!({
        "status": status,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "upload_root_writable": upload_root_writable,
            "registered_results": service.registry().len()
        }
    });

    info!(status = status, upload_root_writable, "Health check completed");

    Ok(Json(response))
}

/// Readiness check endpoint. Reports which compression strategy is in use.
pub async fn ready_handler(
    State(service): State<JobService>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let root = service.workspaces().root().to_path_buf();
    let library = service.config().pdfium_library_path.clone();

    let check = tokio::task::spawn_blocking(move || {
        let writable = std::fs::create_dir_all(&root).is_ok();
        (writable, CompressTransform::new(library).strategy())
    })
    .await;

    match check {
        Ok((true, strategy)) => {
            info!(compression_strategy = strategy, "Readiness check passed");
            Ok(Json(HealthResponse {
                status: "ready".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                service: env!("CARGO_PKG_NAME").to_string(),
                compression_strategy: strategy.to_string(),
            }))
        }
        _ => {
            warn!("Readiness check failed - upload root unavailable");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
