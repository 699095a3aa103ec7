//! REST signature verification: `auth_key`, `auth_timestamp`,
//! `auth_version`, `body_md5`, `auth_signature` query parameters,
//! signed per `"<METHOD>\n<PATH>\n<sorted query string>"`.

use std::collections::BTreeMap;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;

use subhub_common::auth as hmac_auth;

use crate::state::AppState;

const MAX_BODY_BYTES: usize = 64 * 1024;
const TIMESTAMP_WINDOW_SECS: i64 = 600;

/// Re-check every inbound REST request's signature before it reaches a
/// handler. Handlers never see an unauthenticated request.
pub async fn verify_signature(
    State(state): State<std::sync::Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();

    let query: BTreeMap<String, String> = parts
        .uri
        .query()
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .into_owned()
                .collect()
        })
        .unwrap_or_default();

    let auth_key = query.get("auth_key").ok_or(StatusCode::UNAUTHORIZED)?;
    let auth_timestamp = query.get("auth_timestamp").ok_or(StatusCode::UNAUTHORIZED)?;
    let body_md5_given = query.get("body_md5").ok_or(StatusCode::UNAUTHORIZED)?;
    let auth_signature = query.get("auth_signature").ok_or(StatusCode::UNAUTHORIZED)?;
    if !query.contains_key("auth_version") {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let timestamp: i64 = auth_timestamp.parse().map_err(|_| StatusCode::UNAUTHORIZED)?;
    let now = chrono::Utc::now().timestamp();
    if (now - timestamp).abs() > TIMESTAMP_WINDOW_SECS {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let computed_md5 = hmac_auth::body_md5(&bytes);
    if computed_md5 != *body_md5_given {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let secret = {
        let mut conn = state.bus.write_conn().await;
        crate::services::redis::lookup_auth_secret(&mut conn, auth_key)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::UNAUTHORIZED)?
    };

    let canonical_query: String = query
        .iter()
        .filter(|(k, _)| k.as_str() != "auth_signature")
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let message = format!("{}\n{}\n{}", parts.method.as_str(), parts.uri.path(), canonical_query);

    if !hmac_auth::verify(&secret, &message, auth_signature) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}
