//! Continuous enforcement of named invariants over the running system.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::error::VerificationError;
use crate::domain::model::Priority;
use crate::services::immutable_log::ImmutableLog;
use crate::services::message_bus::MessageBus;

/// Outcome of a single rule evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    Passed,
    Violated(String),
}

pub type RuleCheck = Arc<dyn Fn() -> RuleOutcome + Send + Sync>;
pub type RemediationFn = Arc<dyn Fn() -> Result<(), String> + Send + Sync>;

/// A named invariant, with optional auto-remediation.
pub struct Rule {
    pub name: String,
    pub check: RuleCheck,
    pub auto_remediate: bool,
    pub remediation_fn: Option<RemediationFn>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    AllVerified,
    ViolationsDetected,
    CriticalViolations,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VerificationReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub violations: Vec<String>,
    pub status: VerificationStatus,
}

/// Names of the four rules every deployment registers at boot.
pub const CORE_RULE_NAMES: [&str; 4] = [
    "message_bus_running",
    "immutable_log_writable",
    "critical_kernels_running",
    "governance_not_bypassed",
];

pub struct VerificationFramework {
    rules: RwLock<BTreeMap<String, Rule>>,
    critical_rules: RwLock<Vec<String>>,
    bus: Arc<MessageBus>,
    log: Arc<ImmutableLog>,
}

impl VerificationFramework {
    pub fn new(bus: Arc<MessageBus>, log: Arc<ImmutableLog>) -> Self {
        Self {
            rules: RwLock::new(BTreeMap::new()),
            critical_rules: RwLock::new(Vec::new()),
            bus,
            log,
        }
    }

    pub async fn add_rule(&self, rule: Rule, critical: bool) -> Result<(), VerificationError> {
        let mut rules = self.rules.write().await;
        if rules.contains_key(&rule.name) {
            return Err(VerificationError::DuplicateRule(rule.name));
        }
        if critical {
            self.critical_rules.write().await.push(rule.name.clone());
        }
        rules.insert(rule.name.clone(), rule);
        Ok(())
    }

    /// Evaluate every registered rule, logging and remediating violations.
    pub async fn verify_all(&self) -> VerificationReport {
        let rules = self.rules.read().await;
        let critical_rules = self.critical_rules.read().await;

        let mut passed = 0usize;
        let mut violations = Vec::new();
        let mut critical_violation = false;

        for rule in rules.values() {
            match (rule.check)() {
                RuleOutcome::Passed => passed += 1,
                RuleOutcome::Violated(reason) => {
                    violations.push(format!("{}: {reason}", rule.name));

                    self.log
                        .append(
                            "verification_framework",
                            "rule.violation",
                            rule.name.as_str(),
                            Some(serde_json::json!({ "reason": reason })),
                            None,
                        )
                        .await
                        .ok();

                    if critical_rules.contains(&rule.name) {
                        critical_violation = true;
                    }

                    if rule.auto_remediate {
                        if let Some(remediation) = &rule.remediation_fn {
                            if let Err(err) = remediation() {
                                self.log
                                    .append(
                                        "verification_framework",
                                        "remediation.failed",
                                        rule.name.as_str(),
                                        Some(serde_json::json!({ "error": err })),
                                        None,
                                    )
                                    .await
                                    .ok();
                            }
                        }
                    }
                }
            }
        }

        let total = rules.len();
        let failed = violations.len();
        let status = if critical_violation {
            VerificationStatus::CriticalViolations
        } else if failed > 0 {
            VerificationStatus::ViolationsDetected
        } else {
            VerificationStatus::AllVerified
        };

        let report = VerificationReport {
            total,
            passed,
            failed,
            violations,
            status,
        };

        self.publish_report(&report).await;
        report
    }

    async fn publish_report(&self, report: &VerificationReport) {
        let priority = if report.status == VerificationStatus::CriticalViolations {
            Priority::Critical
        } else {
            Priority::Normal
        };

        if report.status == VerificationStatus::CriticalViolations {
            let _ = self
                .bus
                .publish(
                    "verification_framework",
                    "system.control",
                    serde_json::json!({ "reason": "critical_violation", "violations": report.violations }),
                    priority,
                    Default::default(),
                    None,
                )
                .await;
        }

        for violation in &report.violations {
            let _ = self
                .bus
                .publish(
                    "verification_framework",
                    "system.health",
                    serde_json::json!({ "violation": violation, "checked_at": Utc::now() }),
                    Priority::Normal,
                    Default::default(),
                    None,
                )
                .await;
        }
    }

    pub async fn rule_count(&self) -> usize {
        self.rules.read().await.len()
    }
}

/// Build the four mandatory core rules from live subsystem handles.
pub fn core_rules(
    bus_running: impl Fn() -> bool + Send + Sync + 'static,
    log_writable: impl Fn() -> bool + Send + Sync + 'static,
    critical_kernels_running: impl Fn() -> bool + Send + Sync + 'static,
    governance_not_bypassed: impl Fn() -> bool + Send + Sync + 'static,
) -> Vec<Rule> {
    vec![
        Rule {
            name: CORE_RULE_NAMES[0].to_string(),
            check: Arc::new(move || {
                if bus_running() {
                    RuleOutcome::Passed
                } else {
                    RuleOutcome::Violated("message bus is not running".to_string())
                }
            }),
            auto_remediate: false,
            remediation_fn: None,
        },
        Rule {
            name: CORE_RULE_NAMES[1].to_string(),
            check: Arc::new(move || {
                if log_writable() {
                    RuleOutcome::Passed
                } else {
                    RuleOutcome::Violated("immutable log is not writable".to_string())
                }
            }),
            auto_remediate: false,
            remediation_fn: None,
        },
        Rule {
            name: CORE_RULE_NAMES[2].to_string(),
            check: Arc::new(move || {
                if critical_kernels_running() {
                    RuleOutcome::Passed
                } else {
                    RuleOutcome::Violated("a critical kernel is not running".to_string())
                }
            }),
            auto_remediate: false,
            remediation_fn: None,
        },
        Rule {
            name: CORE_RULE_NAMES[3].to_string(),
            check: Arc::new(move || {
                if governance_not_bypassed() {
                    RuleOutcome::Passed
                } else {
                    RuleOutcome::Violated("a high-risk proposal lacks a decision entry".to_string())
                }
            }),
            auto_remediate: false,
            remediation_fn: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    async fn harness() -> VerificationFramework {
        let bus = Arc::new(MessageBus::new(Default::default()));
        bus.start().unwrap();
        let n = SEQ.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("verification-test-{n}.jsonl"));
        let log = Arc::new(ImmutableLog::open(&path, None).unwrap());
        VerificationFramework::new(bus, log)
    }

    #[tokio::test]
    async fn all_passing_rules_report_all_verified() {
        let framework = harness().await;
        framework
            .add_rule(
                Rule {
                    name: "always_passes".to_string(),
                    check: Arc::new(|| RuleOutcome::Passed),
                    auto_remediate: false,
                    remediation_fn: None,
                },
                false,
            )
            .await
            .unwrap();

        let report = framework.verify_all().await;
        assert_eq!(report.status, VerificationStatus::AllVerified);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn non_critical_violation_reports_violations_detected() {
        let framework = harness().await;
        framework
            .add_rule(
                Rule {
                    name: "always_fails".to_string(),
                    check: Arc::new(|| RuleOutcome::Violated("nope".to_string())),
                    auto_remediate: false,
                    remediation_fn: None,
                },
                false,
            )
            .await
            .unwrap();

        let report = framework.verify_all().await;
        assert_eq!(report.status, VerificationStatus::ViolationsDetected);
    }

    #[tokio::test]
    async fn critical_violation_escalates_status() {
        let framework = harness().await;
        framework
            .add_rule(
                Rule {
                    name: "critical_check".to_string(),
                    check: Arc::new(|| RuleOutcome::Violated("down".to_string())),
                    auto_remediate: false,
                    remediation_fn: None,
                },
                true,
            )
            .await
            .unwrap();

        let report = framework.verify_all().await;
        assert_eq!(report.status, VerificationStatus::CriticalViolations);
    }

    #[tokio::test]
    async fn duplicate_rule_name_is_rejected() {
        let framework = harness().await;
        let make_rule = || Rule {
            name: "dup".to_string(),
            check: Arc::new(|| RuleOutcome::Passed) as RuleCheck,
            auto_remediate: false,
            remediation_fn: None,
        };
        framework.add_rule(make_rule(), false).await.unwrap();
        let result = framework.add_rule(make_rule(), false).await;
        assert!(matches!(result, Err(VerificationError::DuplicateRule(_))));
    }

    #[tokio::test]
    async fn auto_remediation_runs_on_violation() {
        let framework = harness().await;
        let remediated = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let remediated_clone = remediated.clone();

        framework
            .add_rule(
                Rule {
                    name: "self_healing".to_string(),
                    check: Arc::new(|| RuleOutcome::Violated("broken".to_string())),
                    auto_remediate: true,
                    remediation_fn: Some(Arc::new(move || {
                        remediated_clone.store(true, Ordering::SeqCst);
                        Ok(())
                    })),
                },
                false,
            )
            .await
            .unwrap();

        framework.verify_all().await;
        assert!(remediated.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn core_rules_builds_four_named_rules() {
        let framework = harness().await;
        for rule in core_rules(|| true, || true, || true, || true) {
            framework.add_rule(rule, true).await.unwrap();
        }
        assert_eq!(framework.rule_count().await, 4);
        let report = framework.verify_all().await;
        assert_eq!(report.status, VerificationStatus::AllVerified);
    }
}
