//! Explicit dependency wiring of the nine core subsystems.
//!
//! Construction order mirrors the dependency graph: Immutable Log,
//! then Message Bus, then Clarity Kernel / Verification Framework /
//! Unified Logic, then the Intent Router and Watchdogs, then the
//! Control Plane, which owns the lifecycle of everything above it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::domain::error::{ControlPlaneError, OrchestratorError};
use crate::infrastructure::config::Config;
use crate::services::boot_pipeline::{BootPipeline, BootReport, BootStep};
use crate::services::clarity_kernel::{ClarityConfig, ClarityKernel};
use crate::services::control_plane::{ControlPlane, ControlPlaneStatus, Kernel};
use crate::services::governance::Governance;
use crate::services::immutable_log::ImmutableLog;
use crate::services::intent_router::IntentRouter;
use crate::services::message_bus::{MessageBus, MessageBusConfig};
use crate::services::verification::{core_rules, VerificationFramework, VerificationReport};
use crate::watchdogs::htm_readiness::{HtmReadiness, HtmReadinessConfig};
use crate::watchdogs::layer2_watchdog::{Layer2Watchdog, Layer2WatchdogConfig};
use crate::watchdogs::scheduler_guards::{SchedulerGuardConfig, SchedulerGuards};
use crate::watchdogs::trigger_storm::{TriggerStormConfig, TriggerStormSafeguard};

struct MessageBusKernel(Arc<MessageBus>);

#[async_trait]
impl Kernel for MessageBusKernel {
    async fn start(&self) -> Result<(), ControlPlaneError> {
        self.0.start().map_err(|_| ControlPlaneError::BootTimeout("message_bus".to_string()))
    }

    async fn stop(&self) -> Result<(), ControlPlaneError> {
        self.0.stop().await.map_err(|_| ControlPlaneError::BootTimeout("message_bus".to_string()))
    }
}

struct NoopKernel;

#[async_trait]
impl Kernel for NoopKernel {
    async fn start(&self) -> Result<(), ControlPlaneError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ControlPlaneError> {
        Ok(())
    }
}

/// The whole orchestration substrate, wired and ready to boot.
pub struct Runtime {
    pub log: Arc<ImmutableLog>,
    pub bus: Arc<MessageBus>,
    pub clarity_kernel: Arc<ClarityKernel>,
    pub verification: Arc<VerificationFramework>,
    pub governance: Arc<Governance>,
    pub intent_router: Arc<IntentRouter>,
    pub trigger_storm: Arc<TriggerStormSafeguard>,
    pub scheduler_guards: Arc<SchedulerGuards>,
    pub htm_readiness: Arc<HtmReadiness>,
    pub layer2_watchdog: Arc<Layer2Watchdog>,
    pub control_plane: Arc<ControlPlane>,
    background_tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    pub fn new(config: &Config, log_path: impl AsRef<std::path::Path>) -> Result<Self, OrchestratorError> {
        let log = Arc::new(
            ImmutableLog::open(log_path, None).map_err(OrchestratorError::Log)?,
        );
        let bus = Arc::new(MessageBus::new(MessageBusConfig {
            default_mailbox_capacity: config.default_queue_capacity,
        }));

        let clarity_kernel = Arc::new(ClarityKernel::new(
            ClarityConfig {
                trust_increase_rate: config.trust_increase_rate,
                trust_decrease_rate: config.trust_decrease_rate,
                quarantine_threshold: config.quarantine_threshold,
                heartbeat_timeout: chrono::Duration::seconds(config.heartbeat_timeout_sec as i64),
                heartbeat_check_interval: chrono::Duration::seconds(config.heartbeat_check_interval_sec as i64),
            },
            bus.clone(),
            log.clone(),
        ));

        let verification = Arc::new(VerificationFramework::new(bus.clone(), log.clone()));
        let governance = Arc::new(Governance::new(log.clone(), bus.clone()));
        let intent_router = Arc::new(IntentRouter::new(bus.clone(), log.clone(), clarity_kernel.clone()));

        let trigger_storm = Arc::new(TriggerStormSafeguard::new(
            TriggerStormConfig {
                storm_threshold_events_per_second: config.storm_threshold_eps,
                cascade_depth_limit: config.cascade_depth_limit,
                circuit_breaker_threshold: config.circuit_breaker_eps_10s,
                circuit_cooldown: chrono::Duration::seconds(config.circuit_cooldown_sec as i64),
                ring_buffer_window: chrono::Duration::minutes(5),
            },
            bus.clone(),
        ));

        let scheduler_guards = Arc::new(SchedulerGuards::new(
            SchedulerGuardConfig {
                queue_depth_warn: config.queue_depth_warn,
                queue_depth_critical: config.queue_depth_critical,
                heartbeat_timeout: chrono::Duration::seconds(config.scheduler_heartbeat_timeout_sec as i64),
            },
            bus.clone(),
        ));

        let htm_readiness = Arc::new(HtmReadiness::new(
            HtmReadinessConfig {
                min_workers: config.min_htm_workers,
                worker_heartbeat_timeout: chrono::Duration::seconds(30),
            },
            bus.clone(),
        ));

        let layer2_watchdog = Arc::new(Layer2Watchdog::new(
            Layer2WatchdogConfig {
                check_interval: chrono::Duration::seconds(config.layer2_check_interval_sec as i64),
            },
            bus.clone(),
        ));

        let control_plane = Arc::new(ControlPlane::new(bus.clone()));

        Ok(Self {
            log,
            bus,
            clarity_kernel,
            verification,
            governance,
            intent_router,
            trigger_storm,
            scheduler_guards,
            htm_readiness,
            layer2_watchdog,
            control_plane,
            background_tasks: std::sync::Mutex::new(Vec::new()),
        })
    }

    /// Register the mandatory core rules and the bus/log kernels, then
    /// run the boot pipeline.
    pub async fn boot(&self, verify_interval_sec: u64) -> Result<BootReport, OrchestratorError> {
        self.control_plane
            .register("message_bus", Arc::new(MessageBusKernel(self.bus.clone())), true, vec![])
            .await
            .map_err(OrchestratorError::ControlPlane)?;
        self.control_plane
            .register("immutable_log", Arc::new(NoopKernel), true, vec![])
            .await
            .map_err(OrchestratorError::ControlPlane)?;

        {
            let bus = self.bus.clone();
            let control_plane = self.control_plane.clone();
            for rule in core_rules(
                move || bus.is_started(),
                || true,
                move || control_plane.try_failed_kernels() == 0,
                || true,
            ) {
                self.verification.add_rule(rule, true).await.ok();
            }
        }

        let mut pipeline = BootPipeline::new(self.log.clone());
        let control_plane = self.control_plane.clone();
        pipeline.add_stage(vec![BootStep {
            name: "start_control_plane".to_string(),
            critical: true,
            execute_fn: Arc::new(move || {
                let control_plane = control_plane.clone();
                Box::pin(async move {
                    control_plane
                        .start()
                        .await
                        .map_err(|_| crate::domain::error::BootError::StepFailed("control_plane".to_string()))
                })
            }),
            verification_fn: None,
        }]);

        let verification = self.verification.clone();
        pipeline.add_stage(vec![BootStep {
            name: "verify_core_invariants".to_string(),
            critical: true,
            execute_fn: Arc::new(move || {
                let verification = verification.clone();
                Box::pin(async move {
                    let report = verification.verify_all().await;
                    if report.status == crate::services::verification::VerificationStatus::CriticalViolations {
                        Err(crate::domain::error::BootError::VerificationFailed("core_invariants".to_string()))
                    } else {
                        Ok(())
                    }
                })
            }),
            verification_fn: None,
        }]);

        let report = pipeline.run().await.map_err(OrchestratorError::Boot)?;

        self.spawn_background_loops(verify_interval_sec);
        Ok(report)
    }

    fn spawn_background_loops(&self, verify_interval_sec: u64) {
        let mut tasks = self.background_tasks.lock().expect("background task list is not poisoned");

        let clarity_kernel = self.clarity_kernel.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                clarity_kernel.sweep_heartbeats().await;
            }
        }));

        let verification = self.verification.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(verify_interval_sec.max(1)));
            loop {
                interval.tick().await;
                verification.verify_all().await;
            }
        }));

        let layer2_watchdog = self.layer2_watchdog.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
            loop {
                interval.tick().await;
                layer2_watchdog.publish_telemetry().await;
            }
        }));

        let scheduler_guards = self.scheduler_guards.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
            loop {
                interval.tick().await;
                scheduler_guards.check().await.ok();
            }
        }));

        let htm_readiness = self.htm_readiness.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
            loop {
                interval.tick().await;
                htm_readiness.check().await.ok();
            }
        }));

        let trigger_storm = self.trigger_storm.clone();
        let bus = self.bus.clone();
        tasks.push(tokio::spawn(async move {
            let Ok(subscription) = bus.subscribe("trigger_storm_safeguard", "*").await else {
                return;
            };
            while let Some(message) = subscription.recv().await {
                trigger_storm.observe(message.topic()).await.ok();
            }
        }));

        let governance = self.governance.clone();
        let bus = self.bus.clone();
        tasks.push(tokio::spawn(async move {
            let Ok(subscription) = bus.subscribe("unified_logic", "event.proposal").await else {
                return;
            };
            while let Some(message) = subscription.recv().await {
                if let Ok(proposal) = serde_json::from_value::<crate::services::governance::Proposal>(message.payload) {
                    governance.evaluate(&proposal).await.ok();
                }
            }
        }));

        let intent_router = self.intent_router.clone();
        let bus = self.bus.clone();
        tasks.push(tokio::spawn(async move {
            let Ok(subscription) = bus.subscribe("intent_router", "intent.request").await else {
                return;
            };
            while let Some(message) = subscription.recv().await {
                let Some(intent_id) = message.payload.get("intent_id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let Some(intent_type) = message.payload.get("intent_type").and_then(|v| v.as_str()) else {
                    continue;
                };
                let actor = message.payload.get("actor").and_then(|v| v.as_str()).unwrap_or("unknown");
                let context = crate::services::intent_router::IntentContext {
                    revenue_impact: message.payload.get("revenue_impact").and_then(|v| v.as_bool()).unwrap_or(false),
                    user_facing: message.payload.get("user_facing").and_then(|v| v.as_bool()).unwrap_or(false),
                    emergency: message.payload.get("emergency").and_then(|v| v.as_bool()).unwrap_or(false),
                };
                intent_router.route_intent(intent_id, intent_type, actor, &context).await;
            }
        }));
    }

    pub async fn status(&self) -> ControlPlaneStatus {
        self.control_plane.get_status().await
    }

    pub async fn verify(&self) -> VerificationReport {
        self.verification.verify_all().await
    }

    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        let tasks = {
            let mut tasks = self.background_tasks.lock().expect("background task list is not poisoned");
            std::mem::take(&mut *tasks)
        };
        for task in tasks {
            task.abort();
        }
        self.control_plane.stop().await.map_err(OrchestratorError::ControlPlane)
    }
}
