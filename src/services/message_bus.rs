//! Topic-addressed publish/subscribe bus with per-subscriber bounded,
//! priority-ordered delivery.
//!
//! Subscribers never block each other: each one owns its own queue, so a
//! slow consumer only ever drops its own messages, never another's.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, Notify, RwLock};
use uuid::Uuid;

use crate::domain::error::BusError;
use crate::domain::model::{Message, MessageMetadata, Priority, TrustLevel};

/// Matches a subscription pattern against a concrete topic.
///
/// `"*"` matches every topic. A pattern ending in `.*` matches topics with
/// exactly one additional segment beyond the prefix (`"kernel.*"` matches
/// `"kernel.status"` but not `"kernel.status.detail"`). Anything else must
/// match the topic exactly.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        let mut topic_segments = topic.split('.');
        let prefix_segments: Vec<&str> = prefix.split('.').collect();
        for expected in &prefix_segments {
            match topic_segments.next() {
                Some(actual) if actual == *expected => {}
                _ => return false,
            }
        }
        // Exactly one segment must remain after the prefix.
        return topic_segments.next().is_some() && topic_segments.next().is_none();
    }
    pattern == topic
}

/// Bounded, priority-ordered mailbox for a single subscriber.
struct Mailbox {
    queues: [VecDeque<Message>; 4],
    capacity: usize,
    dropped: u64,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            queues: Default::default(),
            capacity,
            dropped: 0,
        }
    }

    fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn push(&mut self, message: Message) -> bool {
        if self.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        let rank = priority_rank(message.metadata.priority);
        self.queues[rank].push_back(message);
        true
    }

    fn pop(&mut self) -> Option<Message> {
        for queue in &mut self.queues {
            if let Some(message) = queue.pop_front() {
                return Some(message);
            }
        }
        None
    }
}

fn priority_rank(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Normal => 2,
        Priority::Low => 3,
    }
}

/// A live subscription handle returned by [`MessageBus::subscribe`].
///
/// Cloning shares the same underlying mailbox; dropping all clones does
/// not unsubscribe (call [`MessageBus::unsubscribe`] explicitly).
pub struct Subscription {
    mailbox: Arc<Mutex<Mailbox>>,
    notify: Arc<Notify>,
    shutdown: Arc<AtomicBool>,
}

impl Subscription {
    /// Wait for and return the next message, highest priority first.
    ///
    /// Returns `None` once the bus has been stopped and the mailbox has
    /// drained.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            {
                let mut mailbox = self.mailbox.lock().await;
                if let Some(message) = mailbox.pop() {
                    return Some(message);
                }
            }
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Number of messages dropped for this subscriber due to a full mailbox.
    pub async fn dropped_count(&self) -> u64 {
        self.mailbox.lock().await.dropped
    }

    /// Current mailbox depth.
    pub async fn depth(&self) -> usize {
        self.mailbox.lock().await.len()
    }
}

struct SubscriberEntry {
    mailbox: Arc<Mutex<Mailbox>>,
    notify: Arc<Notify>,
}

/// Access control entry: whether `source` may publish to `topic`.
type AclKey = (String, String);

#[derive(Debug, Default, Clone)]
pub struct BusStats {
    pub messages_published: u64,
    pub messages_delivered: u64,
    pub messages_denied: u64,
    pub active_subscriptions: usize,
}

/// Configuration for a [`MessageBus`].
#[derive(Debug, Clone)]
pub struct MessageBusConfig {
    pub default_mailbox_capacity: usize,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            default_mailbox_capacity: 1024,
        }
    }
}

/// Central topic-addressed bus. One instance per runtime.
pub struct MessageBus {
    config: MessageBusConfig,
    started: AtomicBool,
    shutdown: Arc<AtomicBool>,
    subscriptions: RwLock<HashMap<(String, String), SubscriberEntry>>,
    acl: RwLock<Option<HashMap<AclKey, bool>>>,
    published: AtomicU64,
    delivered: AtomicU64,
    denied: AtomicU64,
}

impl MessageBus {
    pub fn new(config: MessageBusConfig) -> Self {
        Self {
            config,
            started: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            subscriptions: RwLock::new(HashMap::new()),
            acl: RwLock::new(None),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    pub fn start(&self) -> Result<(), BusError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BusError::AlreadyStarted);
        }
        self.shutdown.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Stop the bus, waking every blocked subscriber so `recv` returns
    /// `None` once mailboxes have drained.
    pub async fn stop(&self) -> Result<(), BusError> {
        if !self.started.swap(false, Ordering::SeqCst) {
            return Err(BusError::NotStarted);
        }
        self.shutdown.store(true, Ordering::SeqCst);
        let subscriptions = self.subscriptions.read().await;
        for entry in subscriptions.values() {
            entry.notify.notify_waiters();
        }
        Ok(())
    }

    /// Replace the ACL table. `None` means every publish is allowed.
    pub async fn set_acl(&self, table: Option<HashMap<AclKey, bool>>) {
        *self.acl.write().await = table;
    }

    /// Subscribe `subscriber` to `topic_pattern`. Idempotent: subscribing
    /// twice to the same pattern returns the existing mailbox.
    pub async fn subscribe(
        &self,
        subscriber: impl Into<String>,
        topic_pattern: impl Into<String>,
    ) -> Result<Subscription, BusError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(BusError::NotStarted);
        }
        let key = (subscriber.into(), topic_pattern.into());
        let mut subscriptions = self.subscriptions.write().await;
        let entry = subscriptions.entry(key).or_insert_with(|| SubscriberEntry {
            mailbox: Arc::new(Mutex::new(Mailbox::new(self.config.default_mailbox_capacity))),
            notify: Arc::new(Notify::new()),
        });
        Ok(Subscription {
            mailbox: entry.mailbox.clone(),
            notify: entry.notify.clone(),
            shutdown: self.shutdown.clone(),
        })
    }

    /// Remove a subscription. A missing `topic_pattern` removes all of
    /// `subscriber`'s subscriptions.
    pub async fn unsubscribe(&self, subscriber: &str, topic_pattern: Option<&str>) {
        let mut subscriptions = self.subscriptions.write().await;
        match topic_pattern {
            Some(pattern) => {
                subscriptions.remove(&(subscriber.to_string(), pattern.to_string()));
            }
            None => {
                subscriptions.retain(|(s, _), _| s != subscriber);
            }
        }
    }

    /// Publish a message. Returns the number of subscribers it was
    /// delivered to (0 if denied by ACL or nobody is listening).
    pub async fn publish(
        &self,
        source: impl Into<String>,
        topic: impl Into<String>,
        payload: serde_json::Value,
        priority: Priority,
        trust_level: TrustLevel,
        target: Option<String>,
    ) -> Result<usize, BusError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(BusError::NotStarted);
        }
        let source = source.into();
        let topic = topic.into();

        if let Some(table) = self.acl.read().await.as_ref() {
            let allowed = table
                .get(&(source.clone(), topic.clone()))
                .copied()
                .unwrap_or(true);
            if !allowed {
                self.denied.fetch_add(1, Ordering::Relaxed);
                return Err(BusError::AclDenied {
                    acl_source: source,
                    topic,
                });
            }
        }

        let message = Message {
            message_type: topic.clone(),
            source: source.clone(),
            target,
            payload,
            metadata: MessageMetadata {
                timestamp: Utc::now(),
                correlation_id: Some(Uuid::new_v4()),
                trust_level,
                auth_token: None,
                source_kernel: source,
                target_kernel: None,
                priority,
            },
        };

        self.published.fetch_add(1, Ordering::Relaxed);

        let subscriptions = self.subscriptions.read().await;
        let mut delivered = 0usize;
        for ((_, pattern), entry) in subscriptions.iter() {
            if topic_matches(pattern, &topic) {
                let mut mailbox = entry.mailbox.lock().await;
                if mailbox.push(message.clone()) {
                    delivered += 1;
                    entry.notify.notify_waiters();
                }
            }
        }
        self.delivered.fetch_add(delivered as u64, Ordering::Relaxed);
        Ok(delivered)
    }

    pub async fn active_topics(&self) -> HashSet<String> {
        self.subscriptions
            .read()
            .await
            .keys()
            .map(|(_, pattern)| pattern.clone())
            .collect()
    }

    pub async fn stats(&self) -> BusStats {
        BusStats {
            messages_published: self.published.load(Ordering::Relaxed),
            messages_delivered: self.delivered.load(Ordering::Relaxed),
            messages_denied: self.denied.load(Ordering::Relaxed),
            active_subscriptions: self.subscriptions.read().await.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> MessageBus {
        let bus = MessageBus::new(MessageBusConfig::default());
        bus.start().unwrap();
        bus
    }

    #[test]
    fn wildcard_matches_everything() {
        assert!(topic_matches("*", "kernel.status"));
        assert!(topic_matches("*", "anything"));
    }

    #[test]
    fn segment_wildcard_matches_one_level() {
        assert!(topic_matches("kernel.*", "kernel.status"));
        assert!(!topic_matches("kernel.*", "kernel.status.detail"));
        assert!(!topic_matches("kernel.*", "other.status"));
    }

    #[test]
    fn exact_pattern_requires_exact_topic() {
        assert!(topic_matches("kernel.status", "kernel.status"));
        assert!(!topic_matches("kernel.status", "kernel.status.detail"));
    }

    #[tokio::test]
    async fn publish_before_start_is_rejected() {
        let bus = MessageBus::new(MessageBusConfig::default());
        let result = bus
            .publish("a", "t", serde_json::json!({}), Priority::Normal, TrustLevel::Medium, None)
            .await;
        assert!(matches!(result, Err(BusError::NotStarted)));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let bus = bus();
        let _ = bus.subscribe("watcher", "kernel.*").await.unwrap();
        let _ = bus.subscribe("watcher", "kernel.*").await.unwrap();
        assert_eq!(bus.stats().await.active_subscriptions, 1);
    }

    #[tokio::test]
    async fn delivers_in_priority_order() {
        let bus = bus();
        let sub = bus.subscribe("watcher", "kernel.*").await.unwrap();

        bus.publish("a", "kernel.status", serde_json::json!(1), Priority::Low, TrustLevel::Medium, None)
            .await
            .unwrap();
        bus.publish("a", "kernel.status", serde_json::json!(2), Priority::Critical, TrustLevel::Medium, None)
            .await
            .unwrap();
        bus.publish("a", "kernel.status", serde_json::json!(3), Priority::Normal, TrustLevel::Medium, None)
            .await
            .unwrap();

        let first = sub.recv().await.unwrap();
        assert_eq!(first.payload, serde_json::json!(2));
        let second = sub.recv().await.unwrap();
        assert_eq!(second.payload, serde_json::json!(3));
        let third = sub.recv().await.unwrap();
        assert_eq!(third.payload, serde_json::json!(1));
    }

    #[tokio::test]
    async fn drops_when_mailbox_full() {
        let mut config = MessageBusConfig::default();
        config.default_mailbox_capacity = 2;
        let bus = MessageBus::new(config);
        bus.start().unwrap();
        let sub = bus.subscribe("watcher", "*").await.unwrap();

        for i in 0..5 {
            bus.publish("a", "t", serde_json::json!(i), Priority::Normal, TrustLevel::Medium, None)
                .await
                .unwrap();
        }

        assert_eq!(sub.dropped_count().await, 3);
        assert_eq!(sub.depth().await, 2);
    }

    #[tokio::test]
    async fn acl_denies_unlisted_publisher() {
        let bus = bus();
        let mut table = HashMap::new();
        table.insert(("bad".to_string(), "secret.topic".to_string()), false);
        bus.set_acl(Some(table)).await;

        let result = bus
            .publish("bad", "secret.topic", serde_json::json!({}), Priority::Normal, TrustLevel::Medium, None)
            .await;
        assert!(matches!(result, Err(BusError::AclDenied { .. })));
    }

    #[tokio::test]
    async fn stop_wakes_blocked_subscribers() {
        let bus = Arc::new(bus());
        let sub = bus.subscribe("watcher", "*").await.unwrap();

        let bus2 = bus.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            bus2.stop().await.unwrap();
        });

        let result = sub.recv().await;
        assert!(result.is_none());
        handle.await.unwrap();
    }
}
