//! `presence-*` channels: like `private-*`, but the client-supplied
//! `channel_data` (signed along with `socket_id:channel`) carries a
//! `user_id` and arbitrary `user_info`, and membership is tracked in
//! the Presence Registry so `member_added`/`member_removed` events and
//! the subscribe-time roster can be produced.

use super::verify_presence_auth;

pub struct SubscribeRequest<'a> {
    pub socket_id: &'a str,
    pub channel: &'a str,
    pub channel_data: &'a str,
    pub signature: &'a str,
}

pub struct ChannelData {
    pub user_id: String,
    pub user_info: serde_json::Value,
}

pub fn parse_channel_data(raw: &str) -> anyhow::Result<ChannelData> {
    let v: serde_json::Value = serde_json::from_str(raw)?;
    let user_id = v
        .get("user_id")
        .and_then(|u| u.as_str())
        .ok_or_else(|| anyhow::anyhow!("channel_data missing user_id"))?
        .to_string();
    let user_info = v.get("user_info").cloned().unwrap_or(serde_json::Value::Null);
    Ok(ChannelData { user_id, user_info })
}

pub fn authorize(secret: &str, req: &SubscribeRequest) -> Result<ChannelData, ()> {
    if verify_presence_auth(secret, req.socket_id, req.channel, req.channel_data, req.signature) {
        parse_channel_data(req.channel_data).map_err(|_| ())
    } else {
        Err(())
    }
}

/// The `presence` field of a `pusher_internal:subscription_succeeded`
/// payload: ids, a user_id→user_info hash, and a count.
pub fn roster_payload(roster: &[(String, serde_json::Value)]) -> serde_json::Value {
    let ids: Vec<&str> = roster.iter().map(|(id, _)| id.as_str()).collect();
    let hash: serde_json::Map<String, serde_json::Value> = roster
        .iter()
        .map(|(id, info)| (id.clone(), info.clone()))
        .collect();
    serde_json::json!({
        "presence": {
            "ids": ids,
            "hash": hash,
            "count": roster.len(),
        }
    })
}

pub fn member_added_payload(user_id: &str, user_info: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({ "user_id": user_id, "user_info": user_info })
}

pub fn member_removed_payload(user_id: &str) -> serde_json::Value {
    serde_json::json!({ "user_id": user_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use subhub_common::auth as hmac_auth;

    /// S4 — a valid presence subscribe signs `socket_id:channel:channel_data`
    /// and yields the parsed `user_id`/`user_info` back to the caller.
    #[test]
    fn valid_signature_authorizes_and_parses_channel_data() {
        let channel_data = r#"{"user_id":"u1","user_info":{"name":"Ann"}}"#;
        let message = format!("sock-1:presence-lobby:{channel_data}");
        let signature = hmac_auth::sign("secret", &message);
        let req = SubscribeRequest {
            socket_id: "sock-1",
            channel: "presence-lobby",
            channel_data,
            signature: &signature,
        };

        let parsed = authorize("secret", &req).expect("signature should verify");
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.user_info, serde_json::json!({"name": "Ann"}));
    }

    #[test]
    fn tampered_channel_data_is_rejected() {
        let signed_data = r#"{"user_id":"u1","user_info":{}}"#;
        let message = format!("sock-1:presence-lobby:{signed_data}");
        let signature = hmac_auth::sign("secret", &message);

        let req = SubscribeRequest {
            socket_id: "sock-1",
            channel: "presence-lobby",
            channel_data: r#"{"user_id":"u2","user_info":{}}"#,
            signature: &signature,
        };
        assert!(authorize("secret", &req).is_err());
    }

    #[test]
    fn channel_data_missing_user_id_fails_to_parse() {
        assert!(parse_channel_data(r#"{"user_info":{}}"#).is_err());
    }

    #[test]
    fn roster_payload_matches_s4_shape() {
        let roster = vec![("u1".to_string(), serde_json::json!({"name": "Ann"}))];
        let payload = roster_payload(&roster);
        assert_eq!(
            payload,
            serde_json::json!({
                "presence": {
                    "ids": ["u1"],
                    "hash": {"u1": {"name": "Ann"}},
                    "count": 1,
                }
            })
        );
    }
}
