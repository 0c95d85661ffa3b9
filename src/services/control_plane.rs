//! Lifecycle management for every kernel registered with the runtime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::domain::error::ControlPlaneError;
use crate::domain::model::{Priority, SystemState};
use crate::services::message_bus::MessageBus;

/// A component the Control Plane can start, stop, and health-check.
#[async_trait]
pub trait Kernel: Send + Sync {
    async fn start(&self) -> Result<(), ControlPlaneError>;
    async fn stop(&self) -> Result<(), ControlPlaneError>;
    async fn health(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelState {
    Registered,
    Starting,
    Running,
    Failed,
    Stopped,
}

struct KernelEntry {
    kernel: Arc<dyn Kernel>,
    critical: bool,
    dependencies: Vec<String>,
    state: KernelState,
    restart_attempts: u32,
    backoff: ExponentialBackoff,
}

fn new_backoff() -> ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_secs(1))
        .with_max_interval(Duration::from_secs(30))
        .with_max_elapsed_time(None)
        .build()
}

#[derive(Debug, Clone, Serialize)]
pub struct KernelStatus {
    pub state: KernelState,
    pub critical: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlPlaneStatus {
    pub system_state: SystemState,
    pub total_kernels: usize,
    pub running_kernels: usize,
    pub failed_kernels: usize,
    pub kernels: BTreeMap<String, KernelStatus>,
}

pub struct ControlPlane {
    kernels: RwLock<BTreeMap<String, KernelEntry>>,
    order: RwLock<Vec<String>>,
    system_state: RwLock<SystemState>,
    bus: Arc<MessageBus>,
    restart_cap: u32,
}

impl ControlPlane {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            kernels: RwLock::new(BTreeMap::new()),
            order: RwLock::new(Vec::new()),
            system_state: RwLock::new(SystemState::Booting),
            bus,
            restart_cap: 5,
        }
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        kernel: Arc<dyn Kernel>,
        critical: bool,
        dependencies: Vec<String>,
    ) -> Result<(), ControlPlaneError> {
        let name = name.into();
        let mut kernels = self.kernels.write().await;
        if kernels.contains_key(&name) {
            return Err(ControlPlaneError::DuplicateKernel(name));
        }
        kernels.insert(
            name.clone(),
            KernelEntry {
                kernel,
                critical,
                dependencies,
                state: KernelState::Registered,
                restart_attempts: 0,
                backoff: new_backoff(),
            },
        );
        self.order.write().await.push(name);
        Ok(())
    }

    /// Topologically order registered kernels by declared dependencies.
    async fn dependency_order(&self) -> Vec<String> {
        let kernels = self.kernels.read().await;
        let mut resolved = Vec::new();
        let mut remaining: Vec<String> = self.order.read().await.clone();

        while !remaining.is_empty() {
            let next = remaining
                .iter()
                .position(|name| {
                    kernels[name]
                        .dependencies
                        .iter()
                        .all(|dep| resolved.contains(dep))
                })
                .unwrap_or(0);
            resolved.push(remaining.remove(next));
        }
        resolved
    }

    /// Start every kernel in dependency order. A critical kernel's
    /// failure aborts the whole sequence.
    pub async fn start(&self) -> Result<(), ControlPlaneError> {
        let order = self.dependency_order().await;

        for name in &order {
            let (kernel, critical) = {
                let mut kernels = self.kernels.write().await;
                let entry = kernels.get_mut(name).expect("name came from this plane's own order");
                entry.state = KernelState::Starting;
                (entry.kernel.clone(), entry.critical)
            };

            match kernel.start().await {
                Ok(()) => {
                    self.kernels.write().await.get_mut(name).unwrap().state = KernelState::Running;
                }
                Err(err) => {
                    self.kernels.write().await.get_mut(name).unwrap().state = KernelState::Failed;
                    if critical {
                        *self.system_state.write().await = SystemState::Degraded;
                        return Err(ControlPlaneError::BootTimeout(name.clone()));
                    }
                    tracing::warn!(kernel = %name, error = %err, "non-critical kernel failed to start");
                }
            }
        }

        *self.system_state.write().await = SystemState::Running;
        Ok(())
    }

    /// Stop every kernel in reverse dependency order.
    pub async fn stop(&self) -> Result<(), ControlPlaneError> {
        *self.system_state.write().await = SystemState::ShuttingDown;
        let mut order = self.dependency_order().await;
        order.reverse();

        for name in &order {
            let kernel = {
                let kernels = self.kernels.read().await;
                match kernels.get(name) {
                    Some(entry) => entry.kernel.clone(),
                    None => continue,
                }
            };
            if kernel.stop().await.is_ok() {
                self.kernels.write().await.get_mut(name).unwrap().state = KernelState::Stopped;
            }
        }

        *self.system_state.write().await = SystemState::Stopped;
        Ok(())
    }

    /// Attempt to restart a failed critical kernel with exponential
    /// back-off (1s initial, 30s cap, 5 attempts).
    pub async fn restart_kernel(&self, name: &str) -> Result<(), ControlPlaneError> {
        let (kernel, attempts) = {
            let kernels = self.kernels.read().await;
            let entry = kernels
                .get(name)
                .ok_or_else(|| ControlPlaneError::UnknownKernel(name.to_string()))?;
            (entry.kernel.clone(), entry.restart_attempts)
        };

        if attempts >= self.restart_cap {
            *self.system_state.write().await = SystemState::Degraded;
            let _ = self
                .bus
                .publish(
                    "control_plane",
                    "system.control",
                    serde_json::json!({ "reason": "restart_budget_exhausted", "kernel": name }),
                    Priority::Critical,
                    Default::default(),
                    None,
                )
                .await;
            return Err(ControlPlaneError::RestartBudgetExhausted(name.to_string()));
        }

        let delay = {
            let mut kernels = self.kernels.write().await;
            let entry = kernels.get_mut(name).expect("checked above");
            entry.backoff.next_backoff().unwrap_or(Duration::from_secs(30))
        };
        tokio::time::sleep(delay).await;

        let mut kernels = self.kernels.write().await;
        let entry = kernels.get_mut(name).expect("checked above");
        entry.restart_attempts += 1;

        match kernel.start().await {
            Ok(()) => {
                entry.state = KernelState::Running;
                entry.restart_attempts = 0;
                entry.backoff = new_backoff();
                Ok(())
            }
            Err(_) => {
                entry.state = KernelState::Failed;
                Err(ControlPlaneError::BootTimeout(name.to_string()))
            }
        }
    }

    /// Best-effort, non-blocking failed-kernel count for use from a
    /// synchronous verification rule. Returns 0 if the table is
    /// momentarily locked by a concurrent lifecycle operation.
    pub fn try_failed_kernels(&self) -> usize {
        self.kernels
            .try_read()
            .map(|kernels| kernels.values().filter(|e| e.state == KernelState::Failed).count())
            .unwrap_or(0)
    }

    pub async fn get_status(&self) -> ControlPlaneStatus {
        let kernels = self.kernels.read().await;
        let mut running = 0usize;
        let mut failed = 0usize;
        let mut by_name = BTreeMap::new();

        for (name, entry) in kernels.iter() {
            match entry.state {
                KernelState::Running => running += 1,
                KernelState::Failed => failed += 1,
                _ => {}
            }
            by_name.insert(
                name.clone(),
                KernelStatus {
                    state: entry.state,
                    critical: entry.critical,
                },
            );
        }

        ControlPlaneStatus {
            system_state: *self.system_state.read().await,
            total_kernels: kernels.len(),
            running_kernels: running,
            failed_kernels: failed,
            kernels: by_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubKernel {
        started: Arc<AtomicBool>,
        fail: bool,
    }

    #[async_trait]
    impl Kernel for StubKernel {
        async fn start(&self) -> Result<(), ControlPlaneError> {
            if self.fail {
                return Err(ControlPlaneError::BootTimeout("stub".to_string()));
            }
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> Result<(), ControlPlaneError> {
            self.started.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    fn bus() -> Arc<MessageBus> {
        let bus = Arc::new(MessageBus::new(Default::default()));
        bus.start().unwrap();
        bus
    }

    #[tokio::test]
    async fn starts_kernels_in_dependency_order() {
        let plane = ControlPlane::new(bus());
        let started = Arc::new(AtomicBool::new(false));
        plane
            .register("log", Arc::new(StubKernel { started: started.clone(), fail: false }), true, vec![])
            .await
            .unwrap();
        plane
            .register(
                "bus",
                Arc::new(StubKernel { started: started.clone(), fail: false }),
                true,
                vec!["log".to_string()],
            )
            .await
            .unwrap();

        plane.start().await.unwrap();
        let status = plane.get_status().await;
        assert_eq!(status.system_state, SystemState::Running);
        assert_eq!(status.running_kernels, 2);
    }

    #[tokio::test]
    async fn critical_kernel_failure_degrades_system() {
        let plane = ControlPlane::new(bus());
        plane
            .register("critical", Arc::new(StubKernel { started: Arc::new(AtomicBool::new(false)), fail: true }), true, vec![])
            .await
            .unwrap();

        let result = plane.start().await;
        assert!(result.is_err());
        let status = plane.get_status().await;
        assert_eq!(status.system_state, SystemState::Degraded);
    }

    #[tokio::test]
    async fn non_critical_failure_does_not_abort_boot() {
        let plane = ControlPlane::new(bus());
        plane
            .register("optional", Arc::new(StubKernel { started: Arc::new(AtomicBool::new(false)), fail: true }), false, vec![])
            .await
            .unwrap();

        plane.start().await.unwrap();
        let status = plane.get_status().await;
        assert_eq!(status.system_state, SystemState::Running);
        assert_eq!(status.failed_kernels, 1);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let plane = ControlPlane::new(bus());
        let make = || Arc::new(StubKernel { started: Arc::new(AtomicBool::new(false)), fail: false }) as Arc<dyn Kernel>;
        plane.register("dup", make(), false, vec![]).await.unwrap();
        let result = plane.register("dup", make(), false, vec![]).await;
        assert!(matches!(result, Err(ControlPlaneError::DuplicateKernel(_))));
    }

    #[tokio::test]
    async fn restart_budget_exhaustion_marks_system_degraded() {
        let plane = ControlPlane::new(bus());
        let attempts = Arc::new(AtomicUsize::new(0));
        plane
            .register("flaky", Arc::new(StubKernel { started: Arc::new(AtomicBool::new(false)), fail: true }), true, vec![])
            .await
            .unwrap();

        for _ in 0..5 {
            let _ = plane.restart_kernel("flaky").await;
            attempts.fetch_add(1, Ordering::SeqCst);
        }
        let result = plane.restart_kernel("flaky").await;
        assert!(matches!(result, Err(ControlPlaneError::RestartBudgetExhausted(_))));
    }
}
