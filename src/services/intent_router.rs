//! Classifies intents into autonomy tiers and routes them accordingly.
//!
//! Subscribes to `intent.request` on the Message Bus and produces an
//! Intent Routing Record for every intent it sees, driving Tier 0's
//! human-review queue, Tier 1's post-hoc audit log, Tier 3's vote
//! requirement on Unified Logic, and Tier 4's emergency broadcast.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::error::RouterError;
use crate::domain::model::{AutonomyTier, IntentRoutingRecord, Priority, TrustLevel};
use crate::services::clarity_kernel::ClarityKernel;
use crate::services::immutable_log::ImmutableLog;
use crate::services::message_bus::MessageBus;

/// Tier 1, the default for any intent type not in the static map.
const DEFAULT_TIER: AutonomyTier = AutonomyTier::REVIEW_REQUIRED;

fn tier_table() -> BTreeMap<&'static str, AutonomyTier> {
    BTreeMap::from([
        ("modify_governance", AutonomyTier::HUMAN_APPROVAL),
        ("execute_sandbox", AutonomyTier::REVIEW_REQUIRED),
        ("query_knowledge", AutonomyTier::AUTONOMOUS_LOW_RISK),
        ("self_improve", AutonomyTier::AUTONOMOUS_HIGH_IMPACT),
        ("emergency_recovery", AutonomyTier::EMERGENCY),
    ])
}

fn mission_priority_table() -> BTreeMap<&'static str, f64> {
    BTreeMap::from([
        ("modify_governance", 0.9),
        ("execute_sandbox", 0.4),
        ("query_knowledge", 0.2),
        ("self_improve", 0.6),
        ("emergency_recovery", 1.0),
    ])
}

/// Context flags that can boost mission-alignment priority.
#[derive(Debug, Clone, Default)]
pub struct IntentContext {
    pub revenue_impact: bool,
    pub user_facing: bool,
    pub emergency: bool,
}

/// Outcome of routing a single intent.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    PendingHumanApproval,
    ApprovedForReview,
    ApprovedAutonomous,
    ApprovedPendingVote,
    ApprovedEmergency,
}

pub struct IntentRouter {
    bus: Arc<MessageBus>,
    log: Arc<ImmutableLog>,
    clarity: Arc<ClarityKernel>,
}

impl IntentRouter {
    pub fn new(bus: Arc<MessageBus>, log: Arc<ImmutableLog>, clarity: Arc<ClarityKernel>) -> Self {
        Self { bus, log, clarity }
    }

    pub fn tier_for(&self, intent_type: &str) -> AutonomyTier {
        tier_table().get(intent_type).copied().unwrap_or(DEFAULT_TIER)
    }

    /// Mission alignment score in `[0, 1]`, boosted by context flags.
    pub fn mission_alignment(&self, intent_type: &str, context: &IntentContext) -> f64 {
        let base = mission_priority_table().get(intent_type).copied().unwrap_or(0.3);
        let mut boosted = base;
        if context.revenue_impact {
            boosted += 0.2;
        }
        if context.user_facing {
            boosted += 0.1;
        }
        if context.emergency {
            boosted += 0.3;
        }
        boosted.min(1.0)
    }

    /// Classify an intent, returning its outcome or an error if it
    /// requires human approval and was submitted for autonomous
    /// execution anyway. Pure: no side effects, unlike [`route_intent`].
    pub fn route(&self, intent_type: &str, allow_autonomous: bool) -> Result<RouteOutcome, RouterError> {
        let tier = self.tier_for(intent_type);

        if tier == AutonomyTier::HUMAN_APPROVAL {
            if allow_autonomous {
                return Err(RouterError::HumanApprovalRequired(intent_type.to_string()));
            }
            return Ok(RouteOutcome::PendingHumanApproval);
        }

        let outcome = match tier {
            AutonomyTier::REVIEW_REQUIRED => RouteOutcome::ApprovedForReview,
            AutonomyTier::AUTONOMOUS_LOW_RISK => RouteOutcome::ApprovedAutonomous,
            AutonomyTier::AUTONOMOUS_HIGH_IMPACT => RouteOutcome::ApprovedPendingVote,
            AutonomyTier::EMERGENCY => RouteOutcome::ApprovedEmergency,
            _ => RouteOutcome::ApprovedForReview,
        };
        Ok(outcome)
    }

    /// Classify an intent, apply its tier's routing side effects (§4.6),
    /// and produce the Intent Routing Record that audits the decision.
    pub async fn route_intent(
        &self,
        intent_id: impl Into<String>,
        intent_type: &str,
        actor: impl Into<String>,
        context: &IntentContext,
    ) -> IntentRoutingRecord {
        let intent_id = intent_id.into();
        let actor = actor.into();
        let tier = self.tier_for(intent_type);
        let alignment = self.mission_alignment(intent_type, context);

        let mut reasoning = vec![format!(
            "intent_type '{intent_type}' maps to autonomy tier {}",
            tier.0
        )];
        reasoning.push(format!("mission alignment score {alignment:.2}"));

        let (approved, requires_vote, requires_human, routed_to) = match tier {
            AutonomyTier::HUMAN_APPROVAL => {
                reasoning.push("tier 0: enqueued for human review before any execution".to_string());
                let _ = self
                    .bus
                    .publish(
                        "intent_router",
                        "task.enqueue",
                        serde_json::json!({ "intent_id": intent_id, "queue": "human_review" }),
                        Priority::High,
                        TrustLevel::Medium,
                        None,
                    )
                    .await;
                (false, false, true, "human_review".to_string())
            }
            AutonomyTier::REVIEW_REQUIRED => {
                reasoning.push("tier 1: logged for post-hoc review".to_string());
                (true, false, false, "post_hoc_review".to_string())
            }
            AutonomyTier::AUTONOMOUS_LOW_RISK => {
                reasoning.push("tier 2: executed autonomously, no review required".to_string());
                let _ = self
                    .bus
                    .publish(
                        "intent_router",
                        "task.enqueue",
                        serde_json::json!({ "intent_id": intent_id, "queue": "execution" }),
                        Priority::Normal,
                        TrustLevel::Medium,
                        None,
                    )
                    .await;
                (true, false, false, "execution".to_string())
            }
            AutonomyTier::AUTONOMOUS_HIGH_IMPACT => {
                reasoning.push("tier 3: routed to unified logic, requires a vote before execution".to_string());
                let _ = self
                    .bus
                    .publish(
                        "intent_router",
                        "event.proposal",
                        serde_json::json!({
                            "proposal_id": intent_id,
                            "proposal_type": intent_type,
                            "description": format!("high-impact intent '{intent_type}' routed for vote"),
                            "evidence": { "mission_alignment": alignment },
                            "confidence": 1.0,
                            "risk_level": "high",
                            "requires_human_approval": false,
                            "actor": actor,
                        }),
                        Priority::High,
                        TrustLevel::Medium,
                        None,
                    )
                    .await;
                (true, true, false, "unified_logic".to_string())
            }
            AutonomyTier::EMERGENCY => {
                reasoning.push("tier 4: emergency path, heavy audit to the log and clarity".to_string());
                self.clarity.audit(&intent_id, "emergency intent routed").await;
                let _ = self
                    .bus
                    .publish(
                        "intent_router",
                        "event.emergency",
                        serde_json::json!({ "intent_id": intent_id, "intent_type": intent_type }),
                        Priority::Critical,
                        TrustLevel::High,
                        None,
                    )
                    .await;
                (true, false, false, "emergency_handler".to_string())
            }
            _ => {
                reasoning.push("unrecognized tier defaulted to post-hoc review".to_string());
                (true, false, false, "post_hoc_review".to_string())
            }
        };

        let record = IntentRoutingRecord {
            intent_id: intent_id.clone(),
            intent_type: intent_type.to_string(),
            actor: actor.clone(),
            autonomy_tier: tier,
            approved,
            requires_vote,
            requires_human,
            reasoning,
            routed_to,
        };

        self.log
            .append(
                "intent_router",
                "event.intent_routed",
                intent_id.as_str(),
                Some(serde_json::to_value(&record).unwrap_or_default()),
                None,
            )
            .await
            .ok();

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    async fn harness() -> IntentRouter {
        let bus = Arc::new(MessageBus::new(Default::default()));
        bus.start().unwrap();
        let n = SEQ.fetch_add(1, Ordering::SeqCst);
        let log_path = std::env::temp_dir().join(format!("intent-router-test-{n}.jsonl"));
        let log = Arc::new(ImmutableLog::open(&log_path, None).unwrap());
        let clarity = Arc::new(ClarityKernel::new(Default::default(), bus.clone(), log.clone()));
        IntentRouter::new(bus, log, clarity)
    }

    #[tokio::test]
    async fn known_intent_types_map_to_declared_tiers() {
        let router = harness().await;
        assert_eq!(router.tier_for("query_knowledge"), AutonomyTier::AUTONOMOUS_LOW_RISK);
        assert_eq!(router.tier_for("execute_sandbox"), AutonomyTier::REVIEW_REQUIRED);
        assert_eq!(router.tier_for("self_improve"), AutonomyTier::AUTONOMOUS_HIGH_IMPACT);
        assert_eq!(router.tier_for("modify_governance"), AutonomyTier::HUMAN_APPROVAL);
        assert_eq!(router.tier_for("emergency_recovery"), AutonomyTier::EMERGENCY);
    }

    #[tokio::test]
    async fn unknown_intent_type_defaults_to_tier_one() {
        let router = harness().await;
        assert_eq!(router.tier_for("something_new"), AutonomyTier::REVIEW_REQUIRED);
    }

    #[tokio::test]
    async fn tier_zero_autonomous_attempt_is_rejected() {
        let router = harness().await;
        let result = router.route("modify_governance", true);
        assert!(matches!(result, Err(RouterError::HumanApprovalRequired(_))));
    }

    #[tokio::test]
    async fn tier_zero_non_autonomous_is_pending_human_approval() {
        let router = harness().await;
        let result = router.route("modify_governance", false).unwrap();
        assert_eq!(result, RouteOutcome::PendingHumanApproval);
    }

    #[tokio::test]
    async fn tier_four_routes_to_emergency() {
        let router = harness().await;
        let result = router.route("emergency_recovery", true).unwrap();
        assert_eq!(result, RouteOutcome::ApprovedEmergency);
    }

    #[tokio::test]
    async fn mission_alignment_clamps_at_one() {
        let router = harness().await;
        let context = IntentContext {
            revenue_impact: true,
            user_facing: true,
            emergency: true,
        };
        assert_eq!(router.mission_alignment("emergency_recovery", &context), 1.0);
    }

    #[tokio::test]
    async fn mission_alignment_unboosted_matches_base_priority() {
        let router = harness().await;
        let context = IntentContext::default();
        assert_eq!(router.mission_alignment("query_knowledge", &context), 0.2);
    }

    #[tokio::test]
    async fn tier_zero_intent_is_enqueued_for_human_review() {
        let router = harness().await;
        let mut queue = router.bus.subscribe("test", "task.enqueue").await.unwrap();
        let record = router
            .route_intent("i1", "modify_governance", "actor", &IntentContext::default())
            .await;
        assert!(!record.approved);
        assert!(record.requires_human);
        assert_eq!(record.routed_to, "human_review");
        let message = queue.recv().await.expect("tier 0 enqueues for human review");
        assert_eq!(message.payload.get("queue").and_then(|v| v.as_str()), Some("human_review"));
    }

    #[tokio::test]
    async fn tier_three_intent_requires_vote_and_publishes_proposal() {
        let router = harness().await;
        let mut proposals = router.bus.subscribe("test", "event.proposal").await.unwrap();
        let record = router
            .route_intent("i2", "self_improve", "actor", &IntentContext::default())
            .await;
        assert!(record.approved);
        assert!(record.requires_vote);
        assert_eq!(record.routed_to, "unified_logic");
        let message = proposals.recv().await.expect("tier 3 publishes a proposal");
        assert_eq!(message.payload.get("risk_level").and_then(|v| v.as_str()), Some("high"));
    }

    #[tokio::test]
    async fn tier_four_intent_audits_and_broadcasts_emergency() {
        let router = harness().await;
        let mut emergencies = router.bus.subscribe("test", "event.emergency").await.unwrap();
        let record = router
            .route_intent("i3", "emergency_recovery", "actor", &IntentContext::default())
            .await;
        assert_eq!(record.routed_to, "emergency_handler");
        emergencies.recv().await.expect("tier 4 broadcasts an emergency");

        let entries = router.log.search("i3").await.unwrap();
        assert!(entries.iter().any(|e| e.action == "event.emergency_audit"));
        assert!(entries.iter().any(|e| e.action == "event.intent_routed"));
    }

    #[tokio::test]
    async fn tier_one_intent_is_logged_without_a_bus_side_effect() {
        let router = harness().await;
        let record = router
            .route_intent("i4", "execute_sandbox", "actor", &IntentContext::default())
            .await;
        assert!(record.approved);
        assert!(!record.requires_vote);
        assert_eq!(record.routed_to, "post_hoc_review");
    }
}
