//! Axum WebSocket upgrade handler.

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::run_session;
use crate::app_state::AppState;

/// `GET /` and `GET /ws`: upgrade the HTTP connection to WebSocket.
///
/// The session counts against [`AppState::sessions`] from the moment the
/// upgrade is accepted until its close frame has been written.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let tracked = state.sessions.token();
    ws.on_upgrade(move |socket| async move {
        run_session(socket, state).await;
        drop(tracked);
    })
}
