//! Registry of running components, guardian of their contracts, and
//! source of truth for trust.
//!
//! Subscribes to `kernel.register`, `kernel.status`, `kernel.heartbeat`
//! on the Message Bus and publishes `kernel.manifest.updated`,
//! `trust.score.updated`, `event.quarantine` in response.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use crate::domain::error::ClarityError;
use crate::domain::model::{ComponentManifest, HealthState, MetricContract, Priority, TrustLevel};
use crate::services::immutable_log::ImmutableLog;
use crate::services::message_bus::MessageBus;

#[derive(Debug, Clone)]
pub struct ClarityConfig {
    pub trust_increase_rate: u8,
    pub trust_decrease_rate: u8,
    pub quarantine_threshold: u8,
    pub heartbeat_timeout: Duration,
    pub heartbeat_check_interval: Duration,
}

impl Default for ClarityConfig {
    fn default() -> Self {
        Self {
            trust_increase_rate: 5,
            trust_decrease_rate: 10,
            quarantine_threshold: 30,
            heartbeat_timeout: Duration::seconds(60),
            heartbeat_check_interval: Duration::seconds(30),
        }
    }
}

/// Registry and trust authority for all kernels on the bus.
pub struct ClarityKernel {
    config: ClarityConfig,
    manifests: RwLock<BTreeMap<String, ComponentManifest>>,
    bus: Arc<MessageBus>,
    log: Arc<ImmutableLog>,
}

impl ClarityKernel {
    pub fn new(config: ClarityConfig, bus: Arc<MessageBus>, log: Arc<ImmutableLog>) -> Self {
        Self {
            config,
            manifests: RwLock::new(BTreeMap::new()),
            bus,
            log,
        }
    }

    /// Handle a `kernel.register` message: create a fresh manifest.
    ///
    /// Re-registering an existing `component_id` with identical fields
    /// is a no-op: no manifest reset, no duplicate log entry or event.
    pub async fn register(
        &self,
        component_id: impl Into<String>,
        component_name: impl Into<String>,
        component_type: impl Into<String>,
        capabilities: Vec<String>,
        contracts: BTreeMap<String, MetricContract>,
    ) -> Result<(), ClarityError> {
        let component_id = component_id.into();
        let component_name = component_name.into();
        let component_type = component_type.into();

        {
            let manifests = self.manifests.read().await;
            if let Some(existing) = manifests.get(&component_id) {
                if existing.component_name == component_name
                    && existing.component_type == component_type
                    && existing.capabilities == capabilities
                    && existing.contracts == contracts
                {
                    return Ok(());
                }
            }
        }

        let now = Utc::now();
        let manifest = ComponentManifest {
            component_id: component_id.clone(),
            component_name,
            component_type,
            capabilities,
            contracts,
            registered_at: now,
            last_heartbeat: now,
            last_status_report: None,
            trust_score: 50,
            health_state: HealthState::Unknown,
            heartbeat_misses: 0,
            contract_violations: 0,
        };

        self.manifests.write().await.insert(component_id.clone(), manifest);

        self.log
            .append("clarity_kernel", "kernel.register", component_id.as_str(), None, None)
            .await
            .ok();

        let _ = self
            .bus
            .publish(
                "clarity_kernel",
                "kernel.manifest.updated",
                serde_json::json!({ "component_id": component_id }),
                Priority::Normal,
                TrustLevel::High,
                None,
            )
            .await;

        Ok(())
    }

    /// Handle a `kernel.status` message: validate metrics, adjust trust.
    pub async fn report_status(
        &self,
        component_id: &str,
        health_state: HealthState,
        metrics: &BTreeMap<String, f64>,
    ) -> Result<(), ClarityError> {
        let mut manifests = self.manifests.write().await;
        let manifest = manifests
            .get_mut(component_id)
            .ok_or_else(|| ClarityError::UnknownComponent(component_id.to_string()))?;

        manifest.last_status_report = Some(Utc::now());
        manifest.health_state = health_state;

        let mut all_satisfied = true;
        for (metric, value) in metrics {
            if let Some(contract) = manifest.contracts.get(metric) {
                if !contract.is_satisfied_by(*value) {
                    all_satisfied = false;
                    manifest.contract_violations += 1;
                }
            }
        }

        if all_satisfied {
            manifest.trust_score = manifest.trust_score.saturating_add(self.config.trust_increase_rate).min(100);
        } else {
            manifest.trust_score = manifest.trust_score.saturating_sub(self.config.trust_decrease_rate);
        }
        let trust_score = manifest.trust_score;
        drop(manifests);

        self.emit_trust_update(component_id, trust_score, "status_report").await;

        if trust_score < self.config.quarantine_threshold {
            self.emit_quarantine(component_id, "low_trust_score").await;
        }

        Ok(())
    }

    /// Handle a `kernel.heartbeat` message.
    pub async fn heartbeat(&self, component_id: &str) -> Result<(), ClarityError> {
        let mut manifests = self.manifests.write().await;
        let manifest = manifests
            .get_mut(component_id)
            .ok_or_else(|| ClarityError::UnknownComponent(component_id.to_string()))?;
        manifest.last_heartbeat = Utc::now();
        manifest.heartbeat_misses = 0;
        Ok(())
    }

    /// One pass of the background heartbeat-miss sweep. Call on an
    /// interval timer (`config.heartbeat_check_interval`).
    pub async fn sweep_heartbeats(&self) {
        let now = Utc::now();
        let mut quarantine_candidates = Vec::new();
        let mut trust_updates = Vec::new();

        {
            let mut manifests = self.manifests.write().await;
            for manifest in manifests.values_mut() {
                if now - manifest.last_heartbeat > self.config.heartbeat_timeout {
                    manifest.heartbeat_misses += 1;
                    manifest.trust_score = manifest
                        .trust_score
                        .saturating_sub(self.config.trust_decrease_rate);
                    trust_updates.push((manifest.component_id.clone(), manifest.trust_score));
                    if manifest.heartbeat_misses >= 3 {
                        quarantine_candidates.push(manifest.component_id.clone());
                    }
                }
            }
        }

        for (component_id, trust_score) in trust_updates {
            self.emit_trust_update(&component_id, trust_score, "heartbeat_miss").await;
        }

        for component_id in quarantine_candidates {
            self.emit_quarantine(&component_id, "heartbeat_miss").await;
        }
    }

    async fn emit_trust_update(&self, component_id: &str, trust_score: u8, reason: &str) {
        self.log
            .append(
                "clarity_kernel",
                "trust.score.updated",
                component_id,
                Some(serde_json::json!({ "trust_score": trust_score, "reason": reason })),
                None,
            )
            .await
            .ok();

        let _ = self
            .bus
            .publish(
                "clarity_kernel",
                "trust.score.updated",
                serde_json::json!({ "component_id": component_id, "trust_score": trust_score, "reason": reason }),
                Priority::Normal,
                TrustLevel::High,
                None,
            )
            .await;
    }

    async fn emit_quarantine(&self, component_id: &str, reason: &str) {
        self.log
            .append(
                "clarity_kernel",
                "event.quarantine",
                component_id,
                Some(serde_json::json!({ "reason": reason })),
                None,
            )
            .await
            .ok();

        let _ = self
            .bus
            .publish(
                "clarity_kernel",
                "event.quarantine",
                serde_json::json!({ "component_id": component_id, "reason": reason }),
                Priority::High,
                TrustLevel::High,
                None,
            )
            .await;
    }

    /// Record an ad hoc audit entry attributed to the Clarity Framework
    /// for a caller that has no registered manifest of its own -- used
    /// by the Intent Governance Router's Tier 4 emergency path, which
    /// must audit to both the Immutable Log and Clarity.
    pub async fn audit(&self, resource: &str, note: &str) {
        self.log
            .append(
                "clarity_kernel",
                "event.emergency_audit",
                resource,
                Some(serde_json::json!({ "note": note })),
                None,
            )
            .await
            .ok();
    }

    pub async fn manifest(&self, component_id: &str) -> Option<ComponentManifest> {
        self.manifests.read().await.get(component_id).cloned()
    }

    pub async fn is_quarantined(&self, component_id: &str) -> bool {
        self.manifests
            .read()
            .await
            .get(component_id)
            .map(|m| m.trust_score < self.config.quarantine_threshold)
            .unwrap_or(false)
    }
}
