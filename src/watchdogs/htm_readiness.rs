//! Verifies the worker pool and intent queue are live enough for the
//! Hierarchical Task Manager to accept work.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::error::WatchdogError;
use crate::domain::model::Priority;
use crate::services::message_bus::MessageBus;

#[derive(Debug, Clone)]
pub struct HtmReadinessConfig {
    pub min_workers: usize,
    pub worker_heartbeat_timeout: Duration,
}

impl Default for HtmReadinessConfig {
    fn default() -> Self {
        Self {
            min_workers: 3,
            worker_heartbeat_timeout: Duration::seconds(30),
        }
    }
}

pub struct HtmReadiness {
    config: HtmReadinessConfig,
    worker_heartbeats: RwLock<BTreeMap<String, DateTime<Utc>>>,
    intent_queue_initialized: RwLock<bool>,
    bus: Arc<MessageBus>,
}

impl HtmReadiness {
    pub fn new(config: HtmReadinessConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            worker_heartbeats: RwLock::new(BTreeMap::new()),
            intent_queue_initialized: RwLock::new(false),
            bus,
        }
    }

    pub async fn mark_intent_queue_initialized(&self) {
        *self.intent_queue_initialized.write().await = true;
    }

    pub async fn record_worker_heartbeat(&self, worker_id: impl Into<String>) {
        self.worker_heartbeats.write().await.insert(worker_id.into(), Utc::now());
    }

    /// Returns `Ok(())` when the live worker count meets `min_workers`
    /// and the intent queue is initialized; otherwise errors and emits
    /// `htm_worker_recovery` for each dead worker found.
    pub async fn check(&self) -> Result<(), WatchdogError> {
        let now = Utc::now();
        let heartbeats = self.worker_heartbeats.read().await;

        let mut live = 0usize;
        let mut dead = Vec::new();
        for (worker_id, last_seen) in heartbeats.iter() {
            if now - *last_seen <= self.config.worker_heartbeat_timeout {
                live += 1;
            } else {
                dead.push(worker_id.clone());
            }
        }
        drop(heartbeats);

        for worker_id in &dead {
            self.publish_incident("htm_worker_recovery", worker_id).await;
        }

        if !*self.intent_queue_initialized.read().await || live < self.config.min_workers {
            return Err(WatchdogError::InsufficientWorkers {
                min_workers: self.config.min_workers,
                live,
            });
        }
        Ok(())
    }

    async fn publish_incident(&self, playbook: &str, worker_id: &str) {
        let _ = self
            .bus
            .publish(
                "htm_readiness",
                "event.incident",
                serde_json::json!({ "playbook": playbook, "worker_id": worker_id }),
                Priority::High,
                Default::default(),
                None,
            )
            .await;
    }
}
