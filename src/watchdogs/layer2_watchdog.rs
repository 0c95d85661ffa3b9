//! Aggregates readiness across the four named orchestration components
//! and publishes telemetry to Unified Logic on a fixed cadence.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::model::Priority;
use crate::services::message_bus::MessageBus;

/// The four components this watchdog monitors, by name.
pub const MONITORED_COMPONENTS: [&str; 4] = [
    "htm_orchestrator",
    "trigger_mesh",
    "event_policy_engine",
    "scheduler",
];

#[derive(Debug, Clone)]
pub struct Layer2WatchdogConfig {
    pub check_interval: Duration,
}

impl Default for Layer2WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::seconds(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentHealth {
    Healthy,
    Unhealthy,
}

pub struct Layer2Watchdog {
    config: Layer2WatchdogConfig,
    health: RwLock<BTreeMap<&'static str, ComponentHealth>>,
    bus: Arc<MessageBus>,
}

impl Layer2Watchdog {
    pub fn new(config: Layer2WatchdogConfig, bus: Arc<MessageBus>) -> Self {
        let mut health = BTreeMap::new();
        for component in MONITORED_COMPONENTS {
            health.insert(component, ComponentHealth::Healthy);
        }
        Self {
            config,
            health: RwLock::new(health),
            bus,
        }
    }

    pub fn check_interval(&self) -> Duration {
        self.config.check_interval
    }

    pub async fn report(&self, component: &'static str, health: ComponentHealth) {
        self.health.write().await.insert(component, health);
        if health == ComponentHealth::Unhealthy {
            let _ = self
                .bus
                .publish(
                    "layer2_watchdog",
                    "event.incident",
                    serde_json::json!({ "component": component, "health": "unhealthy" }),
                    Priority::High,
                    Default::default(),
                    None,
                )
                .await;
        }
    }

    /// Publish the aggregated readiness snapshot to Unified Logic.
    pub async fn publish_telemetry(&self) {
        let health = self.health.read().await;
        let snapshot: BTreeMap<&'static str, ComponentHealth> = health.clone();
        let all_healthy = snapshot.values().all(|h| *h == ComponentHealth::Healthy);

        let _ = self
            .bus
            .publish(
                "layer2_watchdog",
                "system.health",
                serde_json::json!({ "components": snapshot, "all_healthy": all_healthy, "checked_at": Utc::now() }),
                Priority::Normal,
                Default::default(),
                None,
            )
            .await;
    }

    pub async fn is_all_healthy(&self) -> bool {
        self.health.read().await.values().all(|h| *h == ComponentHealth::Healthy)
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
    async fn starts_with_all_four_components_healthy() {
        let watchdog = Layer2Watchdog::new(Layer2WatchdogConfig::default(), bus());
        assert!(watchdog.is_all_healthy().await);
    }

    #[tokio::test]
    async fn reporting_unhealthy_component_flips_aggregate() {
        let watchdog = Layer2Watchdog::new(Layer2WatchdogConfig::default(), bus());
        watchdog.report("scheduler", ComponentHealth::Unhealthy).await;
        assert!(!watchdog.is_all_healthy().await);
    }

    #[tokio::test]
    async fn publish_telemetry_does_not_panic_on_empty_subscribers() {
        let watchdog = Layer2Watchdog::new(Layer2WatchdogConfig::default(), bus());
        watchdog.publish_telemetry().await;
    }
}
