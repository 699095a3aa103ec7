//! Redis-backed lookups that aren't part of the pub/sub fabric itself:
//! per-app settings, auth key secrets, and the type-dispatched
//! read-through used by object/keyspace channels.

use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

fn app_settings_key(app_id: &str) -> String {
    format!("subhub:app:{app_id}:settings")
}

const AUTH_KEYS_HASH: &str = "subhub:auth:keys";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default)]
    pub force_encryption: bool,
    #[serde(default = "default_enable_client_events")]
    pub enable_client_events: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            force_encryption: false,
            enable_client_events: default_enable_client_events(),
        }
    }
}

fn default_app_name() -> String {
    "default".to_string()
}

fn default_enable_client_events() -> bool {
    true
}

/// Load an app's settings hash, falling back to defaults field-by-field
/// when the hash (or individual fields) don't exist yet.
pub async fn load_app_settings(
    conn: &mut redis::aio::ConnectionManager,
    app_id: &str,
) -> anyhow::Result<AppSettings> {
    let fields: Vec<(String, String)> = conn.hgetall(app_settings_key(app_id)).await?;
    let mut settings = AppSettings::default();
    for (field, value) in fields {
        match field.as_str() {
            "name" => settings.name = value,
            "force_encryption" => settings.force_encryption = value == "true",
            "enable_client_events" => settings.enable_client_events = value == "true",
            _ => {}
        }
    }
    Ok(settings)
}

pub async fn save_app_settings(
    conn: &mut redis::aio::ConnectionManager,
    app_id: &str,
    settings: &AppSettings,
) -> anyhow::Result<()> {
    let pairs = [
        ("name", settings.name.clone()),
        ("force_encryption", settings.force_encryption.to_string()),
        (
            "enable_client_events",
            settings.enable_client_events.to_string(),
        ),
    ];
    conn.hset_multiple::<_, _, _, ()>(app_settings_key(app_id), &pairs)
        .await?;
    Ok(())
}

/// Look up the shared secret for a REST/WS auth key. `None` if unknown.
pub async fn lookup_auth_secret(
    conn: &mut redis::aio::ConnectionManager,
    auth_key: &str,
) -> anyhow::Result<Option<String>> {
    let secret: Option<String> = conn.hget(AUTH_KEYS_HASH, auth_key).await?;
    Ok(secret)
}

/// Read the current value behind an object/keyspace channel's key,
/// dispatching on the Redis type the way `GET`, `HGETALL`, `LRANGE`,
/// `SMEMBERS`, and `ZRANGE ... WITHSCORES` each shape differently.
pub async fn read_object_channel_value(
    conn: &mut redis::aio::ConnectionManager,
    key: &str,
) -> anyhow::Result<serde_json::Value> {
    let kind: String = redis::cmd("TYPE").arg(key).query_async(conn).await?;

    let value = match kind.as_str() {
        "string" => {
            let v: Option<String> = conn.get(key).await?;
            match v {
                Some(s) => serde_json::json!(s),
                None => serde_json::Value::Null,
            }
        }
        "hash" => {
            let v: Vec<(String, String)> = conn.hgetall(key).await?;
            serde_json::Value::Object(v.into_iter().map(|(k, val)| (k, serde_json::json!(val))).collect())
        }
        "list" => {
            let v: Vec<String> = conn.lrange(key, 0, -1).await?;
            serde_json::json!(v)
        }
        "set" => {
            let v: Vec<String> = conn.smembers(key).await?;
            serde_json::json!(v)
        }
        "zset" => {
            let v: Vec<(String, f64)> = conn.zrange_withscores(key, 0, -1).await?;
            serde_json::json!(v
                .into_iter()
                .map(|(member, score)| serde_json::json!([member, score]))
                .collect::<Vec<_>>())
        }
        _ => serde_json::Value::Null,
    };

    Ok(value)
}

/// The keyspace notification channel name Redis publishes to for writes
/// to `key` (requires `notify-keyspace-events` configured on the Redis
/// server with at least the generic command class, e.g. `KEA`).
pub fn keyspace_notification_channel(db_index: u8, key: &str) -> String {
    format!("__keyspace@{db_index}__:{key}")
}
