//! The Socket Controller — owns one client connection's protocol state:
//! parses inbound frames, dispatches `pusher:subscribe`/`unsubscribe`
//! and `client-*` events through the right channel policy, and
//! implements [`Subscriber`] so the Subscription Index can hand it
//! messages to forward straight back out as `Event` frames.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::channels::{
    keyspace as keyspace_policy, object as object_policy, presence as presence_policy,
    private as private_policy, ChannelKind,
};
use crate::core::bus::PubSubBus;
use crate::core::index::Subscriber;
use crate::core::message::{Event, Message};
use crate::core::presence::PresenceRegistry;
use crate::core::session::{Session, SessionSignal};
use crate::services::redis::AppSettings;

#[derive(Debug, Deserialize, Default)]
struct SubscribeData {
    channel: String,
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    channel_data: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct UnsubscribeData {
    channel: String,
}

pub struct SocketController {
    session: Arc<Session>,
    bus: Arc<PubSubBus>,
    auth_secret: String,
    app_settings: AppSettings,
    presence_memberships: Mutex<HashMap<String, String>>,
}

impl SocketController {
    pub fn new(
        session: Arc<Session>,
        bus: Arc<PubSubBus>,
        auth_secret: String,
        app_settings: AppSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            bus,
            auth_secret,
            app_settings,
            presence_memberships: Mutex::new(HashMap::new()),
        })
    }

    pub fn socket_id(&self) -> &str {
        self.session.id()
    }

    pub fn send_connection_established(&self, activity_timeout_secs: u64) {
        self.session.send(Event::global(
            "pusher:connection_established",
            serde_json::json!({
                "socket_id": self.socket_id(),
                "activity_timeout": activity_timeout_secs,
            }),
        ));
    }

    /// Parse and dispatch one inbound text frame from the client.
    ///
    /// Takes `&Arc<Self>` (not `&self`) because subscribing to a channel
    /// means handing the Subscription Index a cloneable `Arc<dyn
    /// Subscriber>` — the controller needs to clone its own `Arc`, which
    /// a plain `&self` receiver can't reconstruct.
    pub async fn handle_frame(self: &Arc<Self>, raw: &str) {
        self.session.notify(SessionSignal::Activity);

        let event: Event = match serde_json::from_str(raw) {
            Ok(e) => e,
            Err(e) => {
                tracing::debug!(socket_id = %self.socket_id(), error = %e, "dropping malformed frame");
                return;
            }
        };

        match event.event.as_str() {
            "pusher:ping" => {
                self.session.send(Event::global("pusher:pong", serde_json::json!({})));
            }
            "pusher:pong" => {
                self.session.notify(SessionSignal::PongReceived);
            }
            "pusher:subscribe" => {
                let data: SubscribeData = serde_json::from_value(event.data).unwrap_or_default();
                self.handle_subscribe(data).await;
            }
            "pusher:unsubscribe" => {
                let data: UnsubscribeData = serde_json::from_value(event.data).unwrap_or_default();
                self.handle_unsubscribe(&data.channel).await;
            }
            name if name.starts_with("client-") => {
                self.handle_client_event(event).await;
            }
            other => {
                tracing::debug!(socket_id = %self.socket_id(), event = other, "ignoring unrecognized event");
            }
        }
    }

    async fn handle_client_event(self: &Arc<Self>, event: Event) {
        let Some(channel) = event.channel.clone() else {
            return;
        };
        let kind = ChannelKind::classify(&channel);
        if !matches!(kind, ChannelKind::Private | ChannelKind::Presence) {
            // Client events are only accepted on channels the socket had
            // to authenticate onto.
            return;
        }
        if !self.app_settings.enable_client_events {
            tracing::debug!(channel = %channel, "client events disabled for this app, dropping");
            return;
        }
        if !self.bus.index().is_subscribed(self.socket_id(), &channel) {
            return;
        }

        let msg = Message::new(event.event, event.data, self.bus.node_id().to_string())
            .with_sender(self.socket_id().to_string());
        if let Err(e) = self.bus.publish(&channel, &msg).await {
            tracing::warn!(channel = %channel, error = %e, "failed to publish client event");
        }
    }

    async fn handle_subscribe(self: &Arc<Self>, data: SubscribeData) {
        let channel = data.channel;
        let kind = ChannelKind::classify(&channel);

        match kind {
            ChannelKind::Public => {
                self.subscribe_local(&channel);
                self.send_subscription_succeeded(&channel, serde_json::json!({}));
            }
            ChannelKind::Private => {
                let Some(auth) = data.auth else { return };
                let Some(signature) = auth.split(':').nth(1) else {
                    return;
                };
                let req = private_policy::SubscribeRequest {
                    socket_id: self.socket_id(),
                    channel: &channel,
                    signature,
                };
                if private_policy::authorize(&self.auth_secret, &req).is_err() {
                    tracing::debug!(channel = %channel, socket_id = %self.socket_id(), "private auth failed");
                    return;
                }
                self.subscribe_local(&channel);
                self.send_subscription_succeeded(&channel, serde_json::json!({}));
            }
            ChannelKind::Presence => {
                if self.presence_memberships.lock().expect("poisoned").contains_key(&channel) {
                    // Already joined this channel from this socket; the
                    // protocol has no resubscribe semantics, so a second
                    // subscribe is just ignored rather than double-counted.
                    return;
                }
                let Some(auth) = data.auth else { return };
                let Some(channel_data) = data.channel_data else {
                    return;
                };
                let Some(signature) = auth.split(':').nth(1) else {
                    return;
                };
                let req = presence_policy::SubscribeRequest {
                    socket_id: self.socket_id(),
                    channel: &channel,
                    channel_data: &channel_data,
                    signature,
                };
                let parsed = match presence_policy::authorize(&self.auth_secret, &req) {
                    Ok(parsed) => parsed,
                    Err(()) => {
                        tracing::debug!(channel = %channel, socket_id = %self.socket_id(), "presence auth failed");
                        return;
                    }
                };

                self.subscribe_local(&channel);
                {
                    let mut memberships = self.presence_memberships.lock().expect("poisoned");
                    memberships.insert(channel.clone(), parsed.user_id.clone());
                }

                let registry = PresenceRegistry::new(&self.bus);
                match registry.join(&channel, &parsed.user_id, &parsed.user_info).await {
                    Ok(first) => {
                        if first {
                            let msg = Message::new(
                                "pusher_internal:member_added",
                                presence_policy::member_added_payload(&parsed.user_id, &parsed.user_info),
                                self.bus.node_id().to_string(),
                            )
                            .with_sender(self.socket_id().to_string());
                            let _ = self.bus.publish(&channel, &msg).await;
                        }
                    }
                    Err(e) => tracing::warn!(channel = %channel, error = %e, "presence join failed"),
                }

                match registry.roster(&channel).await {
                    Ok(roster) => {
                        self.send_subscription_succeeded(&channel, presence_policy::roster_payload(&roster));
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "presence roster read failed");
                        self.send_subscription_succeeded(&channel, presence_policy::roster_payload(&[]));
                    }
                }
            }
            ChannelKind::Object => {
                self.subscribe_local(&channel);
                self.ensure_watcher(&channel);

                let redis_key = object_policy::redis_key_for(&channel).to_string();
                let mut conn = self.bus.write_conn().await;
                match object_policy::initial_value(&mut conn, &channel).await {
                    Ok(value) => {
                        drop(conn);
                        self.send_subscription_succeeded(&channel, serde_json::json!({}));
                        self.session.send(Event::new("load", channel.clone(), value));
                    }
                    Err(e) => {
                        tracing::warn!(key = %redis_key, error = %e, "object channel initial read failed");
                        self.send_subscription_succeeded(&channel, serde_json::json!({}));
                    }
                }
            }
            ChannelKind::Keyspace => {
                self.subscribe_local(&channel);
                self.ensure_watcher(&channel);
                self.send_subscription_succeeded(&channel, serde_json::json!({}));
            }
        }
    }

    fn ensure_watcher(&self, channel: &str) {
        let redis_key = keyspace_policy::redis_key_for(channel);
        let notif_topic = keyspace_policy::notification_topic(redis_key);
        let watcher = keyspace_policy::Watcher::new(redis_key, channel, self.bus.clone());
        self.bus.subscribe(watcher, &notif_topic);
    }

    fn teardown_watcher_if_empty(&self, channel: &str) {
        let kind = ChannelKind::classify(channel);
        if !matches!(kind, ChannelKind::Object | ChannelKind::Keyspace) {
            return;
        }
        if self.bus.index().subscriber_count(channel) > 0 {
            return;
        }
        let redis_key = keyspace_policy::redis_key_for(channel);
        let notif_topic = keyspace_policy::notification_topic(redis_key);
        self.bus.unsubscribe(&format!("watcher:{channel}"), &notif_topic);
    }

    async fn handle_unsubscribe(self: &Arc<Self>, channel: &str) {
        self.bus.unsubscribe(self.socket_id(), channel);

        if let Some(user_id) = self
            .presence_memberships
            .lock()
            .expect("poisoned")
            .remove(channel)
        {
            let registry = PresenceRegistry::new(&self.bus);
            if let Ok(true) = registry.leave(channel, &user_id).await {
                let msg = Message::new(
                    "pusher_internal:member_removed",
                    presence_policy::member_removed_payload(&user_id),
                    self.bus.node_id().to_string(),
                )
                .with_sender(self.socket_id().to_string());
                let _ = self.bus.publish(channel, &msg).await;
            }
        }

        self.teardown_watcher_if_empty(channel);
    }

    /// Full teardown on transport close: leave every channel this
    /// socket held, decrementing presence membership and tearing down
    /// any object/keyspace watchers that are no longer needed.
    pub async fn handle_disconnect(self: &Arc<Self>) {
        let channels = self.bus.index().topics_of(self.socket_id());
        self.bus.disconnect(self.socket_id());

        let memberships = {
            let mut guard = self.presence_memberships.lock().expect("poisoned");
            std::mem::take(&mut *guard)
        };
        let registry = PresenceRegistry::new(&self.bus);
        for (channel, user_id) in memberships {
            if let Ok(true) = registry.leave(&channel, &user_id).await {
                let msg = Message::new(
                    "pusher_internal:member_removed",
                    presence_policy::member_removed_payload(&user_id),
                    self.bus.node_id().to_string(),
                )
                .with_sender(self.socket_id().to_string());
                let _ = self.bus.publish(&channel, &msg).await;
            }
        }

        for channel in channels {
            self.teardown_watcher_if_empty(&channel);
        }

        self.session.notify(SessionSignal::Disconnected);
    }

    fn subscribe_local(self: &Arc<Self>, channel: &str) {
        let subscriber: Arc<dyn Subscriber> = self.clone();
        self.bus.subscribe(subscriber, channel);
    }

    fn send_subscription_succeeded(&self, channel: &str, data: serde_json::Value) {
        self.session.send(Event::new(
            "pusher_internal:subscription_succeeded",
            channel.to_string(),
            data,
        ));
    }
}

impl Subscriber for SocketController {
    fn id(&self) -> &str {
        self.session.id()
    }

    fn send(&self, topic: &str, msg: Message) {
        self.session.send(msg.to_event(topic));
    }
}
