//! The Subscription Index — the local pub/sub fabric.
//!
//! Maintains a bidirectional map between topics (channel names) and
//! subscribers under a single `RwLock`, so adds/removes/lookups never
//! see a torn view of each other. Both directions are needed: topic →
//! subscribers to fan a message out, subscriber → topics to clean up a
//! socket's interest in one shot on disconnect.
//!
//! `add`/`remove` report whether the *topic* just transitioned between
//! zero and one local subscriber, which is exactly the signal the
//! PubSub Bus needs to decide whether to issue a Redis `SUBSCRIBE` or
//! `UNSUBSCRIBE` for that topic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Anything that can receive a fanned-out message. Sockets implement
/// this; tests use a lightweight recording double.
pub trait Subscriber: Send + Sync {
    /// Stable id, compared (by value, not pointer) to suppress echoing a
    /// message back to the socket that published it.
    fn id(&self) -> &str;
    /// `topic` is the channel name the message arrived on — a
    /// subscriber fanned out to several topics needs it to know which
    /// channel to stamp on the outgoing frame.
    fn send(&self, topic: &str, msg: super::message::Message);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AddOutcome {
    /// `false` if this (subscriber, topic) pair was already present.
    pub inserted: bool,
    /// `true` if `topic` had zero local subscribers before this add.
    pub first_subscriber: bool,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RemoveOutcome {
    /// `false` if the pair wasn't present (remove is idempotent).
    pub removed: bool,
    /// `true` if `topic` now has zero local subscribers.
    pub now_empty: bool,
}

struct Inner {
    topic_subs: HashMap<String, HashMap<String, Arc<dyn Subscriber>>>,
    sub_topics: HashMap<String, HashSet<String>>,
}

pub struct SubscriptionIndex {
    inner: RwLock<Inner>,
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                topic_subs: HashMap::new(),
                sub_topics: HashMap::new(),
            }),
        }
    }

    /// Idempotent: adding the same subscriber to the same topic twice is
    /// a no-op on the second call (`inserted: false`).
    pub fn add(&self, sub: Arc<dyn Subscriber>, topic: &str) -> AddOutcome {
        let mut inner = self.inner.write().expect("subscription index poisoned");
        let subs = inner.topic_subs.entry(topic.to_string()).or_default();
        let first_subscriber = subs.is_empty();
        let inserted = subs.insert(sub.id().to_string(), sub.clone()).is_none();
        inner
            .sub_topics
            .entry(sub.id().to_string())
            .or_default()
            .insert(topic.to_string());
        AddOutcome {
            inserted,
            first_subscriber: inserted && first_subscriber,
        }
    }

    /// Idempotent: removing an absent pair reports `removed: false`.
    pub fn remove(&self, sub_id: &str, topic: &str) -> RemoveOutcome {
        let mut inner = self.inner.write().expect("subscription index poisoned");
        let removed = match inner.topic_subs.get_mut(topic) {
            Some(subs) => subs.remove(sub_id).is_some(),
            None => false,
        };
        let now_empty = match inner.topic_subs.get(topic) {
            Some(subs) => {
                let empty = subs.is_empty();
                if empty {
                    inner.topic_subs.remove(topic);
                }
                empty
            }
            None => false,
        };
        if let Some(topics) = inner.sub_topics.get_mut(sub_id) {
            topics.remove(topic);
            if topics.is_empty() {
                inner.sub_topics.remove(sub_id);
            }
        }
        RemoveOutcome { removed, now_empty }
    }

    /// Remove a subscriber from every topic it held (socket disconnect).
    /// Returns the topics that became empty as a result, so the caller
    /// can issue the matching Redis `UNSUBSCRIBE`s.
    pub fn remove_all(&self, sub_id: &str) -> Vec<String> {
        let mut inner = self.inner.write().expect("subscription index poisoned");
        let topics = inner.sub_topics.remove(sub_id).unwrap_or_default();
        let mut now_empty = Vec::new();
        for topic in topics {
            if let Some(subs) = inner.topic_subs.get_mut(&topic) {
                subs.remove(sub_id);
                if subs.is_empty() {
                    inner.topic_subs.remove(&topic);
                    now_empty.push(topic);
                }
            }
        }
        now_empty
    }

    pub fn subscribers_of(&self, topic: &str) -> Vec<Arc<dyn Subscriber>> {
        let inner = self.inner.read().expect("subscription index poisoned");
        inner
            .topic_subs
            .get(topic)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn topics_of(&self, sub_id: &str) -> HashSet<String> {
        let inner = self.inner.read().expect("subscription index poisoned");
        inner.sub_topics.get(sub_id).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        let inner = self.inner.read().expect("subscription index poisoned");
        inner.topic_subs.get(topic).map_or(0, HashMap::len)
    }

    pub fn is_subscribed(&self, sub_id: &str, topic: &str) -> bool {
        let inner = self.inner.read().expect("subscription index poisoned");
        inner
            .sub_topics
            .get(sub_id)
            .is_some_and(|topics| topics.contains(topic))
    }

    /// Deliver `msg` to every local subscriber of `topic` except
    /// `exclude`, if given. Returns the number of sockets it reached.
    pub fn publish_local(
        &self,
        topic: &str,
        msg: &super::message::Message,
        exclude: Option<&str>,
    ) -> usize {
        let subs = self.subscribers_of(topic);
        let mut delivered = 0;
        for sub in subs {
            if Some(sub.id()) == exclude {
                continue;
            }
            sub.send(topic, msg.clone());
            delivered += 1;
        }
        delivered
    }

    /// All topics with at least one local subscriber, optionally
    /// filtered by prefix (used by the REST `GET channels` endpoint).
    pub fn occupied_topics(&self, prefix: Option<&str>) -> Vec<String> {
        let inner = self.inner.read().expect("subscription index poisoned");
        inner
            .topic_subs
            .keys()
            .filter(|t| prefix.map_or(true, |p| t.starts_with(p)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Message;
    use std::sync::Mutex;

    struct Recorder {
        id: String,
        received: Mutex<Vec<(String, Message)>>,
    }

    impl Recorder {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    impl Subscriber for Recorder {
        fn id(&self) -> &str {
            &self.id
        }
        fn send(&self, topic: &str, msg: Message) {
            self.received.lock().unwrap().push((topic.to_string(), msg));
        }
    }

    #[test]
    fn first_subscriber_transition_fires_once() {
        let index = SubscriptionIndex::new();
        let a = Recorder::new("a");
        let b = Recorder::new("b");

        let first = index.add(a.clone(), "room-1");
        assert!(first.inserted && first.first_subscriber);

        let second = index.add(b.clone(), "room-1");
        assert!(second.inserted && !second.first_subscriber);

        let dup = index.add(a, "room-1");
        assert!(!dup.inserted && !dup.first_subscriber);
    }

    #[test]
    fn now_empty_fires_on_last_remove_only() {
        let index = SubscriptionIndex::new();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        index.add(a.clone(), "room-1");
        index.add(b.clone(), "room-1");

        let first = index.remove("a", "room-1");
        assert!(first.removed && !first.now_empty);

        let second = index.remove("b", "room-1");
        assert!(second.removed && second.now_empty);

        let idempotent = index.remove("b", "room-1");
        assert!(!idempotent.removed && !idempotent.now_empty);
    }

    #[test]
    fn remove_all_cleans_up_every_topic() {
        let index = SubscriptionIndex::new();
        let a = Recorder::new("a");
        index.add(a.clone(), "room-1");
        index.add(a.clone(), "room-2");

        let emptied = index.remove_all("a");
        assert_eq!(emptied.len(), 2);
        assert_eq!(index.subscriber_count("room-1"), 0);
        assert_eq!(index.subscriber_count("room-2"), 0);
        assert!(index.topics_of("a").is_empty());
    }

    #[test]
    fn publish_local_excludes_sender() {
        let index = SubscriptionIndex::new();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        index.add(a.clone(), "room-1");
        index.add(b.clone(), "room-1");

        let msg = Message::new("greeting", serde_json::json!({"hi": true}), "node-1");
        let delivered = index.publish_local("room-1", &msg, Some("a"));

        assert_eq!(delivered, 1);
        assert!(a.received.lock().unwrap().is_empty());
        assert_eq!(b.received.lock().unwrap().len(), 1);
    }
}
