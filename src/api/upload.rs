use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};
use tracing::debug;

use crate::app::AppState;
use crate::upload::session;

/// `GET /ws/upload` — アップロードセッションへのアップグレード。
pub(crate) async fn upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    debug!("upload websocket upgrade requested");
    let orchestrator = state.orchestrator();
    ws.on_upgrade(move |socket| session::run(orchestrator, socket))
}
