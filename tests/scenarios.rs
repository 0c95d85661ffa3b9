//! End-to-end seed scenarios exercising the public API the way the
//! runtime itself wires these subsystems together.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Duration;

use orchestrator_core::domain::model::RiskLevel;
use orchestrator_core::services::clarity_kernel::{ClarityConfig, ClarityKernel};
use orchestrator_core::services::governance::{Governance, Proposal};
use orchestrator_core::services::immutable_log::ImmutableLog;
use orchestrator_core::services::message_bus::MessageBus;
use orchestrator_core::watchdogs::trigger_storm::{TriggerStormConfig, TriggerStormSafeguard};

static SEQ: AtomicU64 = AtomicU64::new(0);

fn harness_log() -> Arc<ImmutableLog> {
    let n = SEQ.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("orchestrator-scenario-{n}.jsonl"));
    Arc::new(ImmutableLog::open(&path, None).unwrap())
}

fn proposal(id: &str, confidence: f64, risk_level: RiskLevel) -> Proposal {
    Proposal {
        proposal_id: id.to_string(),
        proposal_type: "self_improve".to_string(),
        description: "scenario proposal".to_string(),
        evidence: serde_json::json!({ "observed": true }),
        confidence,
        risk_level,
        requires_human_approval: false,
        alternatives_considered: vec![],
        rationale_5w1h: None,
        actor: "scenario-actor".to_string(),
    }
}

fn harness_bus() -> Arc<MessageBus> {
    let bus = Arc::new(MessageBus::new(Default::default()));
    bus.start().unwrap();
    bus
}

/// S1: a high-confidence, low-risk proposal is approved and recorded,
/// both in the Immutable Log and as a distinct bus message.
#[tokio::test]
async fn s1_high_confidence_low_risk_proposal_is_approved_and_logged() {
    let log = harness_log();
    let bus = harness_bus();
    let mut decisions = bus.subscribe("test-observer", "event.governance_decision").await.unwrap();
    let governance = Governance::new(log.clone(), bus);

    let record = governance
        .evaluate(&proposal("p1", 0.97, RiskLevel::Low))
        .await
        .unwrap();

    assert!(record.approved);
    assert_eq!(record.resource, "p1");

    let entries = log.search("p1").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].action, "event.governance_decision");
    assert_eq!(entries[0].resource, "p1");

    let published = decisions.recv().await.expect("decision published on the bus");
    assert_eq!(published.topic(), "event.governance_decision");
    assert_eq!(published.payload["resource"], "p1");
}

/// S2: a low-confidence, low-risk proposal is rejected, with a
/// rationale a human reviewer can scan for the word "Low".
#[tokio::test]
async fn s2_low_confidence_low_risk_proposal_is_rejected() {
    let log = harness_log();
    let governance = Governance::new(log, harness_bus());

    let record = governance
        .evaluate(&proposal("p2", 0.60, RiskLevel::Low))
        .await
        .unwrap();

    assert!(!record.approved);
    assert!(record.rationale.contains("Low confidence"));
}

/// S3: a high-confidence but high-risk proposal always needs review,
/// regardless of confidence.
#[tokio::test]
async fn s3_high_confidence_high_risk_proposal_needs_review() {
    let log = harness_log();
    let governance = Governance::new(log, harness_bus());

    let record = governance
        .evaluate(&proposal("p3", 0.99, RiskLevel::High))
        .await
        .unwrap();

    assert!(!record.approved);
    assert!(record.rationale.contains("risk overrides confidence"));
}

/// S4: a registered component that stops heartbeating is quarantined
/// once three consecutive sweeps find it stale. Uses the same
/// force-stale trick as the unit tests (a negative timeout) so the
/// scenario doesn't depend on wall-clock sleeps.
#[tokio::test]
async fn s4_silent_component_is_quarantined_after_repeated_missed_heartbeats() {
    let bus = Arc::new(MessageBus::new(Default::default()));
    bus.start().unwrap();
    let log = harness_log();

    let mut config = ClarityConfig::default();
    config.heartbeat_timeout = Duration::seconds(-1);
    let kernel = ClarityKernel::new(config, bus, log.clone());

    kernel
        .register("c1", "Component One", "worker", vec![], Default::default())
        .await
        .unwrap();
    kernel.heartbeat("c1").await.unwrap();

    for _ in 0..3 {
        kernel.sweep_heartbeats().await;
    }

    let manifest = kernel.manifest("c1").await.unwrap();
    assert!(manifest.heartbeat_misses >= 3);
    assert!(manifest.trust_score < 30);
    assert!(kernel.is_quarantined("c1").await);

    let quarantine_entries = log.search("c1").await.unwrap();
    assert!(quarantine_entries
        .iter()
        .any(|entry| entry.action == "event.quarantine"));
}

/// S5: a burst of same-topic traffic well above the configured
/// per-second threshold trips the storm detector and publishes a
/// `trigger_storm_mitigation` incident naming the offending topic.
#[tokio::test]
async fn s5_message_storm_on_a_single_topic_raises_an_incident() {
    let bus = Arc::new(MessageBus::new(Default::default()));
    bus.start().unwrap();

    let incidents = bus.subscribe("test-observer", "event.incident").await.unwrap();

    let mut config = TriggerStormConfig::default();
    config.storm_threshold_events_per_second = 50;
    let safeguard = Arc::new(TriggerStormSafeguard::new(config, bus.clone()));

    for _ in 0..200 {
        safeguard.observe("event.metric").await.ok();
    }

    let message = incidents.recv().await.expect("an incident should have been published");
    assert_eq!(message.topic(), "event.incident");
    assert_eq!(message.payload["playbook"], "trigger_storm_mitigation");
    assert_eq!(message.payload["event_type"], "event.metric");

    let second = tokio::time::timeout(std::time::Duration::from_millis(50), incidents.recv()).await;
    assert!(second.is_err(), "a single storm episode should raise exactly one incident");
}

/// S6: ten entries chain cleanly; flipping a byte in the middle of the
/// backing file is caught by `verify_integrity` at the tampered index.
#[tokio::test]
async fn s6_tampering_with_an_entry_breaks_the_hash_chain_at_that_entry() {
    let n = SEQ.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!("orchestrator-scenario-s6-{n}.jsonl"));
    let log = ImmutableLog::open(&path, None).unwrap();

    for i in 0..10 {
        log.append("actor", format!("action-{i}"), "resource", None, None)
            .await
            .unwrap();
    }
    assert_eq!(log.verify_integrity().await.unwrap(), None);
    drop(log);

    let content = std::fs::read_to_string(&path).unwrap();
    let tampered: String = content
        .lines()
        .map(|line| {
            if line.contains("\"action-5\"") {
                line.replace("action-5", "action-tampered")
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + "\n";
    std::fs::write(&path, tampered).unwrap();

    let reopened = ImmutableLog::open(&path, None).unwrap();
    let broken_at = reopened.verify_integrity().await.unwrap();
    assert_eq!(broken_at, Some(5));

    std::fs::remove_file(&path).ok();
}
