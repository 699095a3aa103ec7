//! The Pusher-compatible WebSocket gateway.

mod handler;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/app/{app_key}", get(handler::upgrade))
        .with_state(state)
}
