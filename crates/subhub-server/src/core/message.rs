//! Wire and bus data types shared by every layer above the transport.

use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

/// A Pusher protocol event frame, as exchanged over the WebSocket and
/// accepted by the REST events endpoint.
///
/// `data` is kept as a structured `Value` on this side, but the wire
/// format double-encodes it: every server frame carries `data` as a
/// JSON string holding the encoded payload, which Pusher clients
/// `JSON.parse` themselves (`events.go`'s `RAW_CONNECTION_ESTABLISHED`/
/// `RAW_CHANNEL_EVENT` templates both quote `data` this way). `Serialize`
/// is therefore hand-written to stringify `data` on the way out; inbound
/// frames (`pusher:subscribe`'s `data` is a real object on the wire) use
/// the derived `Deserialize` unchanged.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub event: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, rename = "socket_id")]
    pub socket_id: Option<String>,
}

impl Serialize for Event {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = serde_json::to_string(&self.data).map_err(serde::ser::Error::custom)?;

        let mut len = 2;
        if self.channel.is_some() {
            len += 1;
        }
        if self.socket_id.is_some() {
            len += 1;
        }

        let mut state = serializer.serialize_struct("Event", len)?;
        state.serialize_field("event", &self.event)?;
        if let Some(channel) = &self.channel {
            state.serialize_field("channel", channel)?;
        }
        state.serialize_field("data", &data)?;
        if let Some(socket_id) = &self.socket_id {
            state.serialize_field("socket_id", socket_id)?;
        }
        state.end()
    }
}

impl Event {
    pub fn new(event: impl Into<String>, channel: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            channel: Some(channel.into()),
            data,
            socket_id: None,
        }
    }

    /// A frame with no channel — `pusher:ping`/`pong`/`connection_established`
    /// aren't scoped to any one channel.
    pub fn global(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            channel: None,
            data,
            socket_id: None,
        }
    }
}

/// An item carried on the cross-node bus and fanned out to local
/// subscribers of a topic (a Pusher channel name).
///
/// `node_id` identifies the hub instance that originally published the
/// message locally; a reader loop that sees its own `node_id` come back
/// off Redis skips re-delivery, since the local fan-out already happened
/// at publish time. `sender` identifies the originating local subscriber
/// (if any) so the socket that published an event never receives its own
/// echo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub name: String,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    pub node_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Message {
    pub fn new(name: impl Into<String>, data: serde_json::Value, node_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data,
            sender: None,
            node_id: node_id.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn to_event(&self, channel: &str) -> Event {
        Event::new(self.name.clone(), channel.to_string(), self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Spec S5 / §6: every server frame's `data` is a JSON-encoded
    /// string, not a nested object, so a real Pusher client's
    /// `JSON.parse(frame.data)` has something to parse.
    #[test]
    fn event_data_serializes_as_a_json_string() {
        let event = Event::new("load", "object-k", serde_json::json!({"a": "1"}));
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire["event"], "load");
        assert_eq!(wire["channel"], "object-k");
        assert_eq!(wire["data"], serde_json::json!("{\"a\":\"1\"}"));
    }

    #[test]
    fn global_event_omits_channel_and_still_stringifies_data() {
        let event = Event::global("pusher:pong", serde_json::json!({}));
        let wire = serde_json::to_value(&event).unwrap();

        assert_eq!(wire.get("channel"), None);
        assert_eq!(wire["data"], serde_json::json!("{}"));
    }
}
