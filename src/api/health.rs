//! Health check endpoint
//!
//! - GET /api/v1/health - Liveness, database reachability and schema version

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::api::middleware::AppState;
use crate::db::migrations;

/// Response for the health check
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
    /// Embedded migrations not yet recorded as applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_migrations: Option<usize>,
}

impl HealthResponse {
    fn degraded(
        database: &'static str,
        pending_migrations: Option<usize>,
    ) -> (StatusCode, Json<Self>) {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Self {
                status: "degraded",
                database,
                pending_migrations,
            }),
        )
    }
}

/// GET /api/v1/health
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    if let Err(e) = state.pool.ping().await {
        tracing::warn!("Health check failed: {}", e);
        return HealthResponse::degraded("unreachable", None);
    }

    match migrations::pending_count(&state.pool).await {
        Ok(0) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                database: "ok",
                pending_migrations: Some(0),
            }),
        ),
        Ok(pending) => {
            tracing::warn!("Health check: {} migrations pending", pending);
            HealthResponse::degraded("outdated", Some(pending))
        }
        Err(e) => {
            tracing::warn!("Health check could not read migrations: {}", e);
            HealthResponse::degraded("outdated", None)
        }
    }
}
