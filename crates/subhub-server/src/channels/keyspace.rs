//! `keyspace-*` channels: no initial payload on subscribe, just a live
//! feed of `change` events whenever the underlying Redis key is
//! written, driven by Redis keyspace notifications
//! (`notify-keyspace-events` must include at least the generic command
//! class on the server being watched).
//!
//! `object-*` channels (see `channels::object`) reuse the same
//! [`Watcher`] to drive their own live updates after their initial
//! snapshot.

use std::sync::Arc;

use crate::core::bus::PubSubBus;
use crate::core::index::Subscriber;
use crate::core::message::Message;
use crate::services::redis as redis_services;

/// Redis DB index keyspace notifications are read from. Fixed at 0 —
/// the protocol this hub speaks has no per-channel way to name a
/// different database, so every object/keyspace channel is assumed to
/// point at database 0.
const KEYSPACE_DB_INDEX: u8 = 0;

pub fn redis_key_for(channel: &str) -> &str {
    channel
        .strip_prefix("keyspace-")
        .or_else(|| channel.strip_prefix("object-"))
        .unwrap_or(channel)
}

pub fn notification_topic(redis_key: &str) -> String {
    redis_services::keyspace_notification_channel(KEYSPACE_DB_INDEX, redis_key)
}

/// Re-reads `redis_key` and republishes its value as a `change` event
/// on `target_channel` whenever it receives a keyspace notification.
/// Registered as a `Subscriber` on the notification topic, not as a
/// real socket — there is exactly one per (redis_key, target_channel)
/// pair, for as long as at least one local socket is on the channel.
pub struct Watcher {
    id: String,
    redis_key: String,
    target_channel: String,
    bus: Arc<PubSubBus>,
}

impl Watcher {
    pub fn new(redis_key: &str, target_channel: &str, bus: Arc<PubSubBus>) -> Arc<Self> {
        Arc::new(Self {
            id: format!("watcher:{target_channel}"),
            redis_key: redis_key.to_string(),
            target_channel: target_channel.to_string(),
            bus,
        })
    }
}

impl Subscriber for Watcher {
    fn id(&self) -> &str {
        &self.id
    }

    fn send(&self, _topic: &str, _msg: Message) {
        // The keyspace notification this fires on already reached every
        // node that's watching `redis_key` directly from Redis, so each
        // node's own re-read only needs to reach its own local sockets —
        // `bus.publish` would also re-`PUBLISH` on `target_channel`,
        // which every *other* node is separately subscribed to and
        // would deliver a second copy of the same change.
        let bus = self.bus.clone();
        let redis_key = self.redis_key.clone();
        let target_channel = self.target_channel.clone();
        tokio::spawn(async move {
            let value = {
                let mut conn = bus.read_conn().await;
                redis_services::read_object_channel_value(&mut conn, &redis_key).await
            };
            match value {
                Ok(value) => {
                    let msg = Message::new("change", value, bus.node_id().to_string());
                    bus.index().publish_local(&target_channel, &msg, None);
                }
                Err(e) => {
                    tracing::warn!(key = %redis_key, error = %e, "object/keyspace read-through failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_keyspace_prefix() {
        assert_eq!(redis_key_for("keyspace-foo"), "foo");
    }

    #[test]
    fn strips_object_prefix() {
        assert_eq!(redis_key_for("object-foo"), "foo");
    }

    #[test]
    fn notification_topic_targets_db_zero() {
        assert_eq!(notification_topic("foo"), "__keyspace@0__:foo");
    }
}
