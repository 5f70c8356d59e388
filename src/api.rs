pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod results;
pub(crate) mod upload;

use axum::{
    Router,
    routing::get,
};

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/live", get(health::live))
        .route("/health/ready", get(health::ready))
        .route("/jobs", get(jobs::list).post(jobs::create))
        .route("/jobs/{id}", get(jobs::get_one).delete(jobs::delete))
        .route("/jobs/{id}/partial", get(results::partial))
        .route("/jobs/{id}/results", get(results::final_results))
        .route("/ws/upload", get(upload::upgrade))
        .with_state(state)
}
