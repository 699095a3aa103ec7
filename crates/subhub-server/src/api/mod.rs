//! REST routes: signed event injection plus read-only channel/presence
//! introspection, per `/apps/{app_id}/...`.

mod auth;
mod channels;
mod events;
mod health;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router with all sub-routes.
pub fn router(state: Arc<AppState>) -> Router {
    let signed = Router::new()
        .route("/apps/{app_id}/events", post(events::trigger))
        .route("/apps/{app_id}/channels", get(channels::list))
        .route("/apps/{app_id}/channels/{name}", get(channels::show))
        .route("/apps/{app_id}/channels/{name}/users", get(channels::users))
        .route_layer(from_fn_with_state(state.clone(), auth::verify_signature))
        .with_state(state);

    Router::new().merge(signed).merge(health::router())
}
