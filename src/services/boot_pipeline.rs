//! Dependency-ordered staged startup with per-step execution and
//! verification.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::error::BootError;
use crate::services::immutable_log::ImmutableLog;

type StepFuture = Pin<Box<dyn Future<Output = Result<(), BootError>> + Send>>;
type VerifyFuture = Pin<Box<dyn Future<Output = bool> + Send>>;

pub type ExecuteFn = Arc<dyn Fn() -> StepFuture + Send + Sync>;
pub type VerifyFn = Arc<dyn Fn() -> VerifyFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
}

pub struct BootStep {
    pub name: String,
    pub critical: bool,
    pub execute_fn: ExecuteFn,
    pub verification_fn: Option<VerifyFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStatus {
    Ready,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct BootReport {
    pub boot_id: Uuid,
    pub status: BootStatus,
    pub steps_executed: usize,
    pub steps_failed: usize,
    pub duration_seconds: f64,
}

pub struct BootPipeline {
    stages: Vec<Vec<BootStep>>,
    log: Arc<ImmutableLog>,
}

impl BootPipeline {
    pub fn new(log: Arc<ImmutableLog>) -> Self {
        Self { stages: Vec::new(), log }
    }

    pub fn add_stage(&mut self, steps: Vec<BootStep>) {
        self.stages.push(steps);
    }

    /// Execute every stage in order. A failed critical step aborts
    /// immediately; non-critical failures are logged and skipped over.
    pub async fn run(&self) -> Result<BootReport, BootError> {
        let boot_id = Uuid::new_v4();
        let started_at = Utc::now();

        self.log
            .append("boot_pipeline", "boot_start", boot_id.to_string(), None, None)
            .await
            .ok();

        let mut steps_executed = 0usize;
        let mut steps_failed = 0usize;
        let mut aborted = false;

        'stages: for stage in &self.stages {
            for step in stage {
                steps_executed += 1;
                let outcome = (step.execute_fn)().await;

                let verified = match &outcome {
                    Ok(()) => match &step.verification_fn {
                        Some(verify) => verify().await,
                        None => true,
                    },
                    Err(_) => false,
                };

                if outcome.is_err() || !verified {
                    steps_failed += 1;
                    self.log
                        .append(
                            "boot_pipeline",
                            "boot_step_failed",
                            step.name.as_str(),
                            Some(serde_json::json!({ "critical": step.critical })),
                            None,
                        )
                        .await
                        .ok();

                    if step.critical {
                        aborted = true;
                        break 'stages;
                    }
                }
            }
        }

        let duration_seconds = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
        let status = if aborted { BootStatus::Aborted } else { BootStatus::Ready };

        let report = BootReport {
            boot_id,
            status,
            steps_executed,
            steps_failed,
            duration_seconds,
        };

        self.log
            .append(
                "boot_pipeline",
                "boot_complete",
                boot_id.to_string(),
                Some(serde_json::to_value(&report).map_err(|_| BootError::StepFailed("report_serialization".to_string()))?),
                None,
            )
            .await
            .ok();

        if aborted {
            return Err(BootError::StepFailed("critical boot step failed".to_string()));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    fn harness_log() -> Arc<ImmutableLog> {
        let n = SEQ.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("boot-pipeline-test-{n}.jsonl"));
        Arc::new(ImmutableLog::open(&path, None).unwrap())
    }

    fn ok_step(name: &str, critical: bool) -> BootStep {
        BootStep {
            name: name.to_string(),
            critical,
            execute_fn: Arc::new(|| Box::pin(async { Ok(()) })),
            verification_fn: None,
        }
    }

    fn failing_step(name: &str, critical: bool) -> BootStep {
        BootStep {
            name: name.to_string(),
            critical,
            execute_fn: Arc::new(move || Box::pin(async { Err(BootError::StepFailed("boom".to_string())) })),
            verification_fn: None,
        }
    }

    #[tokio::test]
    async fn all_steps_passing_reports_ready() {
        let mut pipeline = BootPipeline::new(harness_log());
        pipeline.add_stage(vec![ok_step("a", true), ok_step("b", true)]);
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.status, BootStatus::Ready);
        assert_eq!(report.steps_executed, 2);
        assert_eq!(report.steps_failed, 0);
    }

    #[tokio::test]
    async fn critical_step_failure_aborts_pipeline() {
        let mut pipeline = BootPipeline::new(harness_log());
        pipeline.add_stage(vec![failing_step("critical_step", true)]);
        pipeline.add_stage(vec![ok_step("never_runs", true)]);
        let result = pipeline.run().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_critical_step_failure_continues_pipeline() {
        let mut pipeline = BootPipeline::new(harness_log());
        pipeline.add_stage(vec![failing_step("optional", false)]);
        pipeline.add_stage(vec![ok_step("later", true)]);
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.status, BootStatus::Ready);
        assert_eq!(report.steps_failed, 1);
        assert_eq!(report.steps_executed, 2);
    }

    #[tokio::test]
    async fn failed_verification_counts_as_step_failure() {
        let mut pipeline = BootPipeline::new(harness_log());
        pipeline.add_stage(vec![BootStep {
            name: "unverified".to_string(),
            critical: false,
            execute_fn: Arc::new(|| Box::pin(async { Ok(()) })),
            verification_fn: Some(Arc::new(|| Box::pin(async { false }))),
        }]);
        let report = pipeline.run().await.unwrap();
        assert_eq!(report.steps_failed, 1);
    }
}
