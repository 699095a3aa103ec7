//! `object-*` channels: like `keyspace-*`, but the client also gets an
//! immediate snapshot of the current value as part of subscribing,
//! before any further `change` events arrive.

use crate::services::redis as redis_services;

pub use super::keyspace::{notification_topic, redis_key_for, Watcher};

/// Read the current value to send as the subscribe-time snapshot.
pub async fn initial_value(
    conn: &mut redis::aio::ConnectionManager,
    channel: &str,
) -> anyhow::Result<serde_json::Value> {
    redis_services::read_object_channel_value(conn, redis_key_for(channel)).await
}
