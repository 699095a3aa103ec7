//! The Presence Registry — tracks who is on a `presence-*` channel,
//! globally across every hub instance, via two Redis hashes per
//! channel: one holding each member's user info, one holding a
//! per-member connection refcount so a user with several open sockets
//! (or sockets on several different nodes) only triggers one
//! `member_added`/`member_removed` pair for the whole deployment.
//!
//! Roster reads go through the Bus's write endpoint rather than the
//! read endpoint used for object channels — we can't be sure a read
//! replica has caught up with a join that just happened on this
//! request, and a stale roster is a worse user experience than one
//! extra round trip to the master.

use redis::AsyncCommands;

use super::bus::PubSubBus;

fn members_key(channel: &str) -> String {
    format!("subhub:presence:{channel}:members")
}

fn refcounts_key(channel: &str) -> String {
    format!("subhub:presence:{channel}:refcounts")
}

pub struct PresenceRegistry<'a> {
    bus: &'a PubSubBus,
}

impl<'a> PresenceRegistry<'a> {
    pub fn new(bus: &'a PubSubBus) -> Self {
        Self { bus }
    }

    /// Record a connection joining `channel` as `user_id`. Returns
    /// `true` if this is the user's first connection to the channel
    /// anywhere in the deployment — the caller should broadcast
    /// `pusher_internal:member_added` only in that case.
    pub async fn join(
        &self,
        channel: &str,
        user_id: &str,
        user_info: &serde_json::Value,
    ) -> anyhow::Result<bool> {
        let mut conn = self.bus.write_conn().await;
        let count: i64 = conn.hincr(refcounts_key(channel), user_id, 1).await?;
        if count == 1 {
            let payload = serde_json::to_string(user_info)?;
            conn.hset::<_, _, _, ()>(members_key(channel), user_id, payload)
                .await?;
        }
        Ok(count == 1)
    }

    /// Record a connection leaving `channel` as `user_id`. Returns
    /// `true` if that was the user's last connection — the caller
    /// should broadcast `pusher_internal:member_removed` only then.
    pub async fn leave(&self, channel: &str, user_id: &str) -> anyhow::Result<bool> {
        let mut conn = self.bus.write_conn().await;
        let count: i64 = conn.hincr(refcounts_key(channel), user_id, -1).await?;
        if count <= 0 {
            conn.hdel::<_, _, ()>(members_key(channel), user_id)
                .await?;
            conn.hdel::<_, _, ()>(refcounts_key(channel), user_id)
                .await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Full roster: `(user_id, user_info)` pairs, read from the write
    /// endpoint.
    pub async fn roster(&self, channel: &str) -> anyhow::Result<Vec<(String, serde_json::Value)>> {
        let mut conn = self.bus.write_conn().await;
        let raw: Vec<(String, String)> = conn.hgetall(members_key(channel)).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(user_id, json)| {
                serde_json::from_str(&json).ok().map(|v| (user_id, v))
            })
            .collect())
    }

    pub async fn member_count(&self, channel: &str) -> anyhow::Result<u64> {
        let mut conn = self.bus.write_conn().await;
        let count: u64 = conn.hlen(members_key(channel)).await?;
        Ok(count)
    }
}
