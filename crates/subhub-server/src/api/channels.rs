//! `GET /apps/{app_id}/channels`, `.../channels/{name}`, and
//! `.../channels/{name}/users` — read-only views over what this
//! instance's Subscription Index and Presence Registry currently know.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use subhub_common::error::{AppError, AppResult};

use crate::channels::ChannelKind;
use crate::core::presence::PresenceRegistry;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default, rename = "filter_by_prefix")]
    pub filter_by_prefix: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Path(_app_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Value>> {
    let want_user_count = query.info.as_deref().is_some_and(|i| i.contains("user_count"));
    let names = state.bus.index().occupied_topics(query.filter_by_prefix.as_deref());

    let mut channels = serde_json::Map::new();
    for name in names {
        let mut entry = serde_json::Map::new();
        if want_user_count && matches!(ChannelKind::classify(&name), ChannelKind::Presence) {
            let registry = PresenceRegistry::new(&state.bus);
            if let Ok(count) = registry.member_count(&name).await {
                entry.insert("user_count".to_string(), json!(count));
            }
        }
        channels.insert(name, Value::Object(entry));
    }

    Ok(Json(json!({ "channels": channels })))
}

pub async fn show(
    State(state): State<Arc<AppState>>,
    Path((_app_id, name)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    let subscription_count = state.bus.index().subscriber_count(&name);
    let mut body = json!({
        "occupied": subscription_count > 0,
        "subscription_count": subscription_count,
    });

    if matches!(ChannelKind::classify(&name), ChannelKind::Presence) {
        let registry = PresenceRegistry::new(&state.bus);
        let count = registry
            .member_count(&name)
            .await
            .map_err(AppError::Internal)?;
        body["user_count"] = json!(count);
    }

    Ok(Json(body))
}

pub async fn users(
    State(state): State<Arc<AppState>>,
    Path((_app_id, name)): Path<(String, String)>,
) -> AppResult<Json<Value>> {
    if !matches!(ChannelKind::classify(&name), ChannelKind::Presence) {
        return Err(AppError::BadRequest(
            "user listing is only available for presence channels".to_string(),
        ));
    }

    let registry = PresenceRegistry::new(&state.bus);
    let roster = registry.roster(&name).await.map_err(AppError::Internal)?;
    let users: Vec<Value> = roster.into_iter().map(|(id, _)| json!({ "id": id })).collect();

    Ok(Json(json!({ "users": users })))
}
