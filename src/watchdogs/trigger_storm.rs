//! Circuit breaker over the Message Bus's own traffic: watches every
//! publish via a wildcard subscription and raises incidents when the
//! event rate or event diversity looks pathological.

use std::collections::{BTreeMap, VecDeque};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::Mutex;

use crate::domain::error::WatchdogError;
use crate::domain::model::Priority;
use crate::services::message_bus::MessageBus;

#[derive(Debug, Clone)]
pub struct TriggerStormConfig {
    pub storm_threshold_events_per_second: u32,
    pub cascade_depth_limit: usize,
    pub circuit_breaker_threshold: u32,
    pub circuit_cooldown: Duration,
    pub ring_buffer_window: Duration,
}

impl Default for TriggerStormConfig {
    fn default() -> Self {
        Self {
            storm_threshold_events_per_second: 100,
            cascade_depth_limit: 10,
            circuit_breaker_threshold: 500,
            circuit_cooldown: Duration::seconds(60),
            ring_buffer_window: Duration::minutes(5),
        }
    }
}

struct Observation {
    event_type: String,
    at: DateTime<Utc>,
}

/// Observes all bus traffic and opens a circuit when traffic looks
/// like a storm, a cascade, or a sustained overload.
pub struct TriggerStormSafeguard {
    config: TriggerStormConfig,
    ring: Mutex<VecDeque<Observation>>,
    /// Per-event-type token bucket; a `check()` failure means that
    /// topic exceeded `storm_threshold_events_per_second`.
    limiters: Mutex<BTreeMap<String, Arc<DefaultDirectRateLimiter>>>,
    circuit_open: AtomicBool,
    opened_at: Mutex<Option<DateTime<Utc>>>,
    /// Event types currently in an active storm episode; gates
    /// `event.incident` publication so one episode yields one incident.
    storm_active: Mutex<std::collections::BTreeSet<String>>,
    bus: Arc<MessageBus>,
}

impl TriggerStormSafeguard {
    pub fn new(config: TriggerStormConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            ring: Mutex::new(VecDeque::new()),
            limiters: Mutex::new(BTreeMap::new()),
            circuit_open: AtomicBool::new(false),
            opened_at: Mutex::new(None),
            storm_active: Mutex::new(std::collections::BTreeSet::new()),
            bus,
        }
    }

    pub fn is_open(&self) -> bool {
        self.circuit_open.load(Ordering::SeqCst)
    }

    /// Record a single observed publish and evaluate all three triggers.
    pub async fn observe(&self, event_type: &str) -> Result<(), WatchdogError> {
        self.maybe_close_circuit().await;
        if self.is_open() {
            return Err(WatchdogError::CircuitOpen);
        }

        let now = Utc::now();
        {
            let mut ring = self.ring.lock().await;
            ring.push_back(Observation { event_type: event_type.to_string(), at: now });
            let cutoff = now - self.config.ring_buffer_window;
            while ring.front().map(|o| o.at < cutoff).unwrap_or(false) {
                ring.pop_front();
            }
        }

        if self.storm_detected(event_type).await {
            if self.latch_storm(event_type).await {
                self.publish_incident("trigger_storm_mitigation", "storm", event_type).await;
            }
        } else {
            self.unlatch_storm(event_type).await;
        }
        if self.cascade_detected().await {
            self.publish_incident("event_cascade_breaker", "cascade", event_type).await;
        }
        if self.circuit_breaker_tripped(now).await {
            self.open_circuit(now).await;
        }

        Ok(())
    }

    /// A topic is storming once it exceeds its own per-second token
    /// bucket; each topic gets an independently refilling bucket.
    async fn storm_detected(&self, event_type: &str) -> bool {
        let mut limiters = self.limiters.lock().await;
        let limiter = limiters.entry(event_type.to_string()).or_insert_with(|| {
            let rate = NonZeroU32::new(self.config.storm_threshold_events_per_second)
                .unwrap_or_else(|| NonZeroU32::new(1).expect("1 is non-zero"));
            Arc::new(RateLimiter::direct(Quota::per_second(rate)))
        });
        limiter.check().is_err()
    }

    /// Marks `event_type` as storming. Returns `true` the first time
    /// (the episode just started), `false` if it was already latched.
    async fn latch_storm(&self, event_type: &str) -> bool {
        self.storm_active.lock().await.insert(event_type.to_string())
    }

    async fn unlatch_storm(&self, event_type: &str) {
        self.storm_active.lock().await.remove(event_type);
    }

    async fn cascade_detected(&self) -> bool {
        let ring = self.ring.lock().await;
        if ring.len() < self.config.cascade_depth_limit {
            return false;
        }
        let distinct: std::collections::HashSet<&str> = ring
            .iter()
            .rev()
            .take(self.config.cascade_depth_limit)
            .map(|o| o.event_type.as_str())
            .collect();
        distinct.len() < 3
    }

    async fn circuit_breaker_tripped(&self, now: DateTime<Utc>) -> bool {
        let ring = self.ring.lock().await;
        let ten_seconds_ago = now - Duration::seconds(10);
        let count = ring.iter().filter(|o| o.at >= ten_seconds_ago).count();
        count as u32 > self.config.circuit_breaker_threshold
    }

    async fn open_circuit(&self, now: DateTime<Utc>) {
        self.circuit_open.store(true, Ordering::SeqCst);
        *self.opened_at.lock().await = Some(now);
        let _ = self
            .bus
            .publish(
                "trigger_storm_safeguard",
                "event.emergency",
                serde_json::json!({ "reason": "circuit_breaker_tripped" }),
                Priority::Critical,
                Default::default(),
                None,
            )
            .await;
    }

    async fn maybe_close_circuit(&self) {
        if !self.is_open() {
            return;
        }
        let opened_at = *self.opened_at.lock().await;
        if let Some(opened_at) = opened_at {
            if Utc::now() - opened_at >= self.config.circuit_cooldown {
                self.circuit_open.store(false, Ordering::SeqCst);
                *self.opened_at.lock().await = None;
            }
        }
    }

    async fn publish_incident(&self, playbook: &str, kind: &str, event_type: &str) {
        let _ = self
            .bus
            .publish(
                "trigger_storm_safeguard",
                "event.incident",
                serde_json::json!({ "kind": kind, "playbook": playbook, "event_type": event_type }),
                Priority::High,
                Default::default(),
                None,
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Arc<MessageBus> {
        let bus = Arc::new(MessageBus::new(Default::default()));
        bus.start().unwrap();
        bus
    }

    #[tokio::test]
    async fn storm_of_single_type_is_detected() {
        let mut config = TriggerStormConfig::default();
        config.storm_threshold_events_per_second = 5;
        let safeguard = TriggerStormSafeguard::new(config, bus());
        for _ in 0..10 {
            safeguard.observe("task.enqueue").await.unwrap();
        }
        assert!(safeguard.storm_detected("task.enqueue").await);
    }

    #[tokio::test]
    async fn storm_episode_emits_exactly_one_incident() {
        let mut config = TriggerStormConfig::default();
        config.storm_threshold_events_per_second = 5;
        config.cascade_depth_limit = 1000;
        config.circuit_breaker_threshold = 1000;
        let bus = bus();
        let mut incidents = bus.subscribe("watchdog_test", "event.incident").await.unwrap();
        let safeguard = TriggerStormSafeguard::new(config, bus);

        for _ in 0..20 {
            safeguard.observe("event.metric").await.unwrap();
        }

        incidents.recv().await.expect("one incident for the storm episode");
        let second = tokio::time::timeout(std::time::Duration::from_millis(50), incidents.recv()).await;
        assert!(second.is_err(), "storm episode should not re-publish while still active");
    }

    #[tokio::test]
    async fn cascade_of_few_distinct_types_is_detected() {
        let mut config = TriggerStormConfig::default();
        config.cascade_depth_limit = 4;
        let safeguard = TriggerStormSafeguard::new(config, bus());
        for _ in 0..4 {
            safeguard.observe("event.metric").await.unwrap();
        }
        assert!(safeguard.cascade_detected().await);
    }

    #[tokio::test]
    async fn circuit_opens_under_sustained_overload_and_blocks_further_events() {
        let mut config = TriggerStormConfig::default();
        config.circuit_breaker_threshold = 3;
        config.storm_threshold_events_per_second = 1000;
        config.cascade_depth_limit = 1000;
        let safeguard = TriggerStormSafeguard::new(config, bus());
        for _ in 0..4 {
            safeguard.observe("a").await.ok();
        }
        assert!(safeguard.is_open());
        let result = safeguard.observe("b").await;
        assert!(matches!(result, Err(WatchdogError::CircuitOpen)));
    }
}
