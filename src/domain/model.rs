//! Shared vocabulary: priorities, trust levels, and the envelope types
//! that cross subsystem boundaries on the Message Bus.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Delivery priority. Ordered so that `Critical > High > Normal > Low`
/// compares correctly with the derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Wire encoding per the external interface: 1..4, low to critical.
    pub const fn as_wire_code(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Critical => 4,
        }
    }

    /// All variants, ordered highest priority first -- the order a
    /// per-subscriber dequeue loop should poll its priority queues in.
    pub const fn all_highest_first() -> [Priority; 4] {
        [Self::Critical, Self::High, Self::Normal, Self::Low]
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Degree of trust attached to the source of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    Low,
    Medium,
    High,
    Verified,
}

impl Default for TrustLevel {
    fn default() -> Self {
        Self::Medium
    }
}

/// Health of a registered component, as observed by the Clarity Kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::Unknown
    }
}

/// Message envelope metadata (§3 Message.metadata).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
    #[serde(default)]
    pub trust_level: TrustLevel,
    pub auth_token: Option<String>,
    pub source_kernel: String,
    pub target_kernel: Option<String>,
    #[serde(default)]
    pub priority: Priority,
}

/// A message carried on the bus. `payload` is a JSON object rather
/// than a closed struct -- subscribers downcast by topic, not by type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: String,
    pub source: String,
    pub target: Option<String>,
    pub payload: Value,
    pub metadata: MessageMetadata,
}

impl Message {
    pub fn topic(&self) -> &str {
        &self.message_type
    }
}

/// A component manifest (§3 Component Manifest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentManifest {
    pub component_id: String,
    pub component_name: String,
    pub component_type: String,
    pub capabilities: Vec<String>,
    pub contracts: BTreeMap<String, MetricContract>,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub last_status_report: Option<DateTime<Utc>>,
    pub trust_score: u8,
    pub health_state: HealthState,
    pub heartbeat_misses: u32,
    pub contract_violations: u32,
}

/// A metric's declared contract: either an exact target or a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricContract {
    Target(f64),
    Range { min: Option<f64>, max: Option<f64> },
}

impl MetricContract {
    pub fn is_satisfied_by(&self, value: f64) -> bool {
        match self {
            Self::Target(target) => (value - target).abs() < f64::EPSILON,
            Self::Range { min, max } => {
                min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
            }
        }
    }
}

/// Structured 5W1H narrative, attached to a Decision Record when the
/// evidence supplied with a proposal is rich enough to fill it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rationale5w1h {
    pub who: String,
    pub what: String,
    pub when: DateTime<Utc>,
    pub where_: String,
    pub why: Vec<String>,
    pub how: String,
}

/// A decision record (§3 Decision Record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub decision_id: Uuid,
    pub decision_type: DecisionType,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub rationale: String,
    pub rationale_5w1h: Option<Rationale5w1h>,
    pub confidence: f64,
    pub risk_score: f64,
    pub alternatives_considered: Vec<String>,
    pub evidence: Value,
    pub metrics: BTreeMap<String, f64>,
    pub kpis: BTreeMap<String, f64>,
    pub approved: bool,
    pub executed: bool,
    pub result: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Autonomous,
    ApprovalRequired,
    PolicyEnforcement,
    RiskAssessment,
    TrustCalculation,
    ProposalCreation,
}

/// Outcome of governance evaluation (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    NeedsReview,
    Rejected,
}

impl Decision {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::NeedsReview => "needs_review",
            Self::Rejected => "rejected",
        }
    }
}

/// Declared risk level of a proposal (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const fn as_score(self) -> f64 {
        match self {
            Self::Low => 0.2,
            Self::Medium => 0.5,
            Self::High => 0.75,
            Self::Critical => 0.95,
        }
    }
}

/// An autonomy tier assigned by the Intent Governance Router (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AutonomyTier(pub u8);

impl AutonomyTier {
    pub const HUMAN_APPROVAL: Self = Self(0);
    pub const REVIEW_REQUIRED: Self = Self(1);
    pub const AUTONOMOUS_LOW_RISK: Self = Self(2);
    pub const AUTONOMOUS_HIGH_IMPACT: Self = Self(3);
    pub const EMERGENCY: Self = Self(4);
}

/// Record of a single intent's routing decision (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRoutingRecord {
    pub intent_id: String,
    pub intent_type: String,
    pub actor: String,
    pub autonomy_tier: AutonomyTier,
    pub approved: bool,
    pub requires_vote: bool,
    pub requires_human: bool,
    pub reasoning: Vec<String>,
    pub routed_to: String,
}

/// Overall system health as reported by the Control Plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    Booting,
    Running,
    Degraded,
    ShuttingDown,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_ordering_matches_dequeue_policy() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn priority_wire_codes_match_spec() {
        assert_eq!(Priority::Low.as_wire_code(), 1);
        assert_eq!(Priority::Normal.as_wire_code(), 2);
        assert_eq!(Priority::High.as_wire_code(), 3);
        assert_eq!(Priority::Critical.as_wire_code(), 4);
    }

    #[test]
    fn metric_contract_range_bounds() {
        let c = MetricContract::Range {
            min: Some(0.0),
            max: Some(1.0),
        };
        assert!(c.is_satisfied_by(0.5));
        assert!(!c.is_satisfied_by(1.5));
    }

    #[test]
    fn metric_contract_target_uses_float_tolerance() {
        let c = MetricContract::Target(10.0);
        assert!(c.is_satisfied_by(10.0));
        assert!(!c.is_satisfied_by(10.5));
    }
}
