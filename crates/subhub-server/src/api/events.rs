//! `POST /apps/{app_id}/events` — let a backend inject an event onto one
//! or more channels without holding a WebSocket connection open.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use subhub_common::error::{AppError, AppResult};

use crate::core::message::Message;
use crate::state::AppState;

const MAX_DATA_BYTES: usize = 10 * 1024;

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub name: String,
    pub data: Value,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub socket_id: Option<String>,
}

pub async fn trigger(
    State(state): State<Arc<AppState>>,
    Path(_app_id): Path<String>,
    Json(req): Json<EventRequest>,
) -> AppResult<Json<Value>> {
    let encoded_len = serde_json::to_vec(&req.data)
        .map_err(|e| AppError::Internal(e.into()))?
        .len();
    if encoded_len > MAX_DATA_BYTES {
        return Err(AppError::BadRequest("data exceeds 10KB".to_string()));
    }

    let mut channels = req.channels.unwrap_or_default();
    if let Some(channel) = req.channel {
        channels.push(channel);
    }
    if channels.is_empty() {
        return Err(AppError::BadRequest(
            "events require at least one of channel or channels".to_string(),
        ));
    }

    for channel in &channels {
        let mut msg = Message::new(req.name.clone(), req.data.clone(), state.bus.node_id().to_string());
        if let Some(socket_id) = &req.socket_id {
            msg = msg.with_sender(socket_id.clone());
        }
        state
            .bus
            .publish(channel, &msg)
            .await
            .map_err(AppError::Internal)?;
    }

    Ok(Json(json!({})))
}
