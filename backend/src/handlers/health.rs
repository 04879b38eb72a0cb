use axum::{extract::State, http::StatusCode, Json};

use crate::{models::wire::HealthResponse, state::AppState};

/// Liveness plus a store ping. 503 when the store is unreachable.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.auth.ping_store().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".into(),
                database: "connected".into(),
            }),
        ),
        Err(err) => {
            tracing::warn!(error = %err, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".into(),
                    database: "unreachable".into(),
                }),
            )
        }
    }
}
