use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::app::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub(crate) async fn live() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// レコードストアに到達できるかを確かめる readiness プローブ。
pub(crate) async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.dao().count_jobs().await {
        Ok(_) => (StatusCode::OK, Json(HealthResponse { status: "ok" })).into_response(),
        Err(error) => {
            tracing::warn!(error = %error, "readiness probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse { status: "unavailable" }),
            )
                .into_response()
        }
    }
}
