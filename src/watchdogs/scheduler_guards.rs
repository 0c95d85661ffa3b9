//! Tracks scheduler health and raises incidents on queue-depth or
//! heartbeat breaches.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::error::WatchdogError;
use crate::domain::model::Priority;
use crate::services::message_bus::MessageBus;

#[derive(Debug, Clone)]
pub struct SchedulerGuardConfig {
    pub queue_depth_warn: usize,
    pub queue_depth_critical: usize,
    pub heartbeat_timeout: Duration,
}

impl Default for SchedulerGuardConfig {
    fn default() -> Self {
        Self {
            queue_depth_warn: 500,
            queue_depth_critical: 2000,
            heartbeat_timeout: Duration::seconds(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSnapshot {
    pub is_ready: bool,
    pub is_healthy: bool,
    pub queue_depth: usize,
    pub dispatch_rate: f64,
    pub last_heartbeat: DateTime<Utc>,
    pub error_count: u64,
}

pub struct SchedulerGuards {
    config: SchedulerGuardConfig,
    snapshot: RwLock<SchedulerSnapshot>,
    bus: Arc<MessageBus>,
}

impl SchedulerGuards {
    pub fn new(config: SchedulerGuardConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            snapshot: RwLock::new(SchedulerSnapshot {
                is_ready: false,
                is_healthy: true,
                queue_depth: 0,
                dispatch_rate: 0.0,
                last_heartbeat: Utc::now(),
                error_count: 0,
            }),
            bus,
        }
    }

    pub async fn record_snapshot(&self, snapshot: SchedulerSnapshot) {
        *self.snapshot.write().await = snapshot;
    }

    /// Evaluate the current snapshot against thresholds, publishing an
    /// incident for any breach.
    pub async fn check(&self) -> Result<(), WatchdogError> {
        let snapshot = self.snapshot.read().await.clone();

        if snapshot.queue_depth > self.config.queue_depth_critical {
            self.publish_incident("scheduler_load_shedding", "queue_depth_critical").await;
            return Err(WatchdogError::QueueDepthCritical(snapshot.queue_depth));
        }
        if snapshot.queue_depth > self.config.queue_depth_warn {
            self.publish_incident("scheduler_recovery", "queue_depth_warn").await;
        }
        if Utc::now() - snapshot.last_heartbeat > self.config.heartbeat_timeout {
            self.publish_incident("scheduler_recovery", "heartbeat_timeout").await;
        }
        Ok(())
    }

    async fn publish_incident(&self, playbook: &str, reason: &str) {
        let _ = self
            .bus
            .publish(
                "scheduler_guards",
                "event.incident",
                serde_json::json!({ "playbook": playbook, "reason": reason }),
                Priority::High,
                Default::default(),
                None,
            )
            .await;
    }
}
