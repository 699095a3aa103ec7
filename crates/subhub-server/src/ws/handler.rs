//! The WebSocket upgrade entry point: wires a fresh [`Session`] and
//! [`SocketController`] together, forwards the session's outbound
//! frames into the socket sink, and feeds inbound frames to the
//! controller until the transport closes.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};

use crate::core::session::{Session, SessionConfig};
use crate::core::socket::SocketController;
use crate::services::redis as redis_services;
use crate::state::AppState;

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(app_key): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, app_key))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, app_key: String) {
    let socket_id = uuid::Uuid::new_v4().to_string();
    let cfg = SessionConfig::default();
    let activity_timeout_secs = cfg.activity_timeout.as_secs();
    let (session, mut outbound) = Session::spawn(socket_id.clone(), cfg);

    let (auth_secret, app_settings) = {
        let mut conn = state.bus.write_conn().await;
        let secret = redis_services::lookup_auth_secret(&mut conn, &app_key)
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let settings = redis_services::load_app_settings(&mut conn, &app_key)
            .await
            .unwrap_or_default();
        (secret, settings)
    };

    let controller = SocketController::new(session.clone(), state.bus.clone(), auth_secret, app_settings);
    controller.send_connection_established(activity_timeout_secs);

    let (mut sink, mut stream) = socket.split();

    let outbound_task = tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if sink.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                controller.handle_frame(&text).await;
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(socket_id = %socket_id, error = %e, "websocket read error");
                break;
            }
        }
    }

    session.detach_receiver();
    controller.handle_disconnect().await;
    outbound_task.abort();
}
