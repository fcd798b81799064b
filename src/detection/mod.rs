//! # Detection Engine Orchestrator
//!
//! `ShieldEngine` runs the full pipeline for one login attempt:
//!
//! ```text
//! gate -> extract -> anomaly score -> compose -> track -> decide -> respond
//! ```
//!
//! The gate rejects attempts from addresses already on the block list before
//! any scoring happens. Everything after the gate is synchronous and
//! self-contained per event, so any number of threads may call `evaluate`
//! on one shared engine. Collaborators are injected as trait objects.
//!
//! Errors abort only the event being evaluated. Tracker updates and block
//! inserts that already happened are kept; both are safe to repeat.

pub mod features;
pub mod scorer;
pub mod tracker;

use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{AnomalyScorer, ModelHandle};
use crate::response::alerter::{AlertDispatcher, AlertFanout};
use crate::response::blocklist::{BlockStore, FileBlockStore};
use crate::response::{Decision, DecisionPolicy, ResponseOrchestrator, ResponseOutcome};
use crate::{
    BlockRecord, GateFailureMode, LoginEvent, PolicyConfig, RawLoginEvent, RiskScore, RiskTier,
    ShieldConfig, ShieldError, ShieldResult,
};
use features::FeatureVector;
use tracker::{AttemptTracker, InMemoryAttemptTracker};

/// Everything computed for an event that passed the gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Assessment {
    pub event: LoginEvent,
    pub features: FeatureVector,
    pub anomaly_score: f64,
    pub risk_score: RiskScore,
    pub tier: RiskTier,

    /// Failure count after this attempt was recorded.
    pub failure_count: u32,
}

/// Why an event was rejected without scoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    AlreadyBlocked,
}

/// Result of one evaluation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Scored; no action taken.
    Accepted { assessment: Assessment },

    /// Source was already blocked; the attempt was not scored.
    Rejected { source_ip: IpAddr, reason: RejectReason },

    /// Scored and crossed the policy; source blocked and alert sent.
    Blocked {
        assessment: Assessment,
        response: ResponseOutcome,
    },
}

impl Verdict {
    pub fn assessment(&self) -> Option<&Assessment> {
        match self {
            Verdict::Accepted { assessment } | Verdict::Blocked { assessment, .. } => {
                Some(assessment)
            }
            Verdict::Rejected { .. } => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Verdict::Rejected { .. })
    }

    /// Short label for log and table output.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Accepted { .. } => "accepted",
            Verdict::Rejected { .. } => "rejected",
            Verdict::Blocked { .. } => "blocked",
        }
    }
}

/// The login risk engine. Cheap to share behind an `Arc`.
pub struct ShieldEngine {
    scorer: Arc<dyn AnomalyScorer>,
    tracker: Arc<dyn AttemptTracker>,
    blocks: Arc<dyn BlockStore>,
    responder: ResponseOrchestrator,
    policy: DecisionPolicy,
    gate_failure_mode: GateFailureMode,
}

impl ShieldEngine {
    pub fn new(
        policy: &PolicyConfig,
        scorer: Arc<dyn AnomalyScorer>,
        tracker: Arc<dyn AttemptTracker>,
        blocks: Arc<dyn BlockStore>,
        alerts: Arc<dyn AlertDispatcher>,
    ) -> Self {
        let responder =
            ResponseOrchestrator::new(Arc::clone(&blocks), alerts, policy.block_reason.clone());
        Self {
            scorer,
            tracker,
            blocks,
            responder,
            policy: DecisionPolicy::from(policy),
            gate_failure_mode: policy.gate_failure_mode,
        }
    }

    /// Wire up the file-backed collaborators named in the configuration.
    ///
    /// Returns the model handle alongside the engine so callers can report
    /// on or reload the model.
    pub fn from_config(config: &ShieldConfig) -> ShieldResult<(Self, Arc<ModelHandle>)> {
        config.validate()?;
        let model = Arc::new(ModelHandle::from_config(&config.model)?);
        let blocks = Arc::new(FileBlockStore::open(&config.storage.block_list_path)?);
        let alerts = Arc::new(AlertFanout::from_config(&config.alerts)?);
        let engine = Self::new(
            &config.policy,
            model.clone(),
            Arc::new(InMemoryAttemptTracker::new()),
            blocks,
            alerts,
        );
        Ok((engine, model))
    }

    /// Gate check. Honors the configured failure mode when the store is
    /// unavailable.
    pub fn is_blocked(&self, source_ip: &IpAddr) -> ShieldResult<bool> {
        match self.blocks.contains(source_ip) {
            Ok(blocked) => Ok(blocked),
            Err(e) => match self.gate_failure_mode {
                GateFailureMode::FailClosed => Err(e),
                GateFailureMode::FailOpen => {
                    log::warn!(
                        "[GATE] Block list unavailable, failing open for {}: {}",
                        source_ip,
                        e
                    );
                    Ok(false)
                }
            },
        }
    }

    /// Evaluate one validated event.
    pub fn evaluate(&self, event: &LoginEvent) -> ShieldResult<Verdict> {
        if self.is_blocked(&event.source_ip)? {
            log::info!(
                "[GATE] Rejected attempt from blocked {} (user={})",
                event.source_ip,
                event.user_id
            );
            return Ok(Verdict::Rejected {
                source_ip: event.source_ip,
                reason: RejectReason::AlreadyBlocked,
            });
        }

        let features = features::extract(event);
        let anomaly_score = self.scorer.score(&features)?;
        if !anomaly_score.is_finite() {
            return Err(ShieldError::ModelUnavailable(format!(
                "model returned non-finite score {} for {}",
                anomaly_score, event.source_ip
            )));
        }
        let (risk_score, tier) = scorer::compose_with_tier(&features, anomaly_score);

        // Counted before deciding: the current attempt contributes to its
        // own escalation check.
        let failure_count = self.tracker.record_outcome(event.source_ip, event.outcome);

        log::debug!(
            "[ENGINE] {} user={} failures={} {}",
            event.source_ip,
            event.user_id,
            failure_count,
            scorer::format_score(&features, anomaly_score, risk_score)
        );

        let assessment = Assessment {
            event: event.clone(),
            features,
            anomaly_score,
            risk_score,
            tier,
            failure_count,
        };

        match self.policy.decide(risk_score, failure_count) {
            Decision::NoAction => Ok(Verdict::Accepted { assessment }),
            Decision::BlockAndAlert => {
                let response = self.responder.respond(event, risk_score)?;
                Ok(Verdict::Blocked {
                    assessment,
                    response,
                })
            }
        }
    }

    /// Validate a raw record, then evaluate it.
    pub fn evaluate_raw(&self, raw: RawLoginEvent) -> ShieldResult<Verdict> {
        let event = LoginEvent::try_from(raw)?;
        self.evaluate(&event)
    }

    pub fn block_records(&self) -> ShieldResult<Vec<BlockRecord>> {
        self.blocks.records()
    }

    pub fn failure_count(&self, source_ip: IpAddr) -> u32 {
        self.tracker.failure_count(source_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_event_timestamp;
    use crate::response::alerter::Alert;
    use crate::response::blocklist::MemoryBlockStore;
    use crate::LoginOutcome;
    use parking_lot::Mutex;

    /// Returns a fixed anomaly score.
    struct FixedScorer(f64);

    impl AnomalyScorer for FixedScorer {
        fn score(&self, _features: &FeatureVector) -> ShieldResult<f64> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Alert>>,
    }

    impl AlertDispatcher for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn dispatch(&self, alert: &Alert) -> ShieldResult<()> {
            self.seen.lock().push(alert.clone());
            Ok(())
        }
    }

    struct Harness {
        engine: ShieldEngine,
        blocks: Arc<MemoryBlockStore>,
        alerts: Arc<Recorder>,
    }

    fn harness(anomaly: f64) -> Harness {
        let blocks = Arc::new(MemoryBlockStore::new());
        let alerts = Arc::new(Recorder::default());
        let engine = ShieldEngine::new(
            &PolicyConfig::default(),
            Arc::new(FixedScorer(anomaly)),
            Arc::new(InMemoryAttemptTracker::new()),
            blocks.clone(),
            alerts.clone(),
        );
        Harness {
            engine,
            blocks,
            alerts,
        }
    }

    fn event(ts: &str, ip: &str, outcome: LoginOutcome) -> LoginEvent {
        LoginEvent::new(
            parse_event_timestamp(ts).unwrap(),
            "alice",
            ip.parse().unwrap(),
            outcome,
        )
        .with_device("web")
    }

    #[test]
    fn test_night_anomalous_failure_blocks() {
        let h = harness(-0.1);
        let e = event("2024-05-02 02:00:00", "203.0.113.9", LoginOutcome::Failure);

        let verdict = h.engine.evaluate(&e).unwrap();
        let assessment = verdict.assessment().unwrap();
        assert_eq!(assessment.risk_score, RiskScore::new(90));
        assert_eq!(assessment.tier, RiskTier::High);
        assert!(verdict.is_blocked());
        assert!(h.engine.is_blocked(&e.source_ip).unwrap());
        assert_eq!(h.alerts.seen.lock().len(), 1);
    }

    #[test]
    fn test_day_success_is_accepted() {
        let h = harness(0.2);
        let e = event("2024-05-02 14:00:00", "203.0.113.10", LoginOutcome::Success);

        let verdict = h.engine.evaluate(&e).unwrap();
        assert_eq!(verdict.label(), "accepted");
        assert_eq!(verdict.assessment().unwrap().risk_score, RiskScore::new(0));
        assert!(h.blocks.is_empty());
        assert!(h.alerts.seen.lock().is_empty());
    }

    #[test]
    fn test_score_of_seventy_is_not_escalated() {
        // Day failure + anomalous = 70, not above 70.
        let h = harness(-0.3);
        let e = event("2024-05-02 14:00:00", "203.0.113.11", LoginOutcome::Failure);
        let verdict = h.engine.evaluate(&e).unwrap();
        assert!(!verdict.is_blocked());

        // Night success + anomalous = 60; accepted and resets the counter.
        let e = event("2024-05-02 23:30:00", "203.0.113.11", LoginOutcome::Success);
        let verdict = h.engine.evaluate(&e).unwrap();
        assert!(!verdict.is_blocked());
        assert_eq!(h.engine.failure_count(e.source_ip), 0);
    }

    #[test]
    fn test_night_failure_with_normal_model_is_medium() {
        // 30 + 20 = 50 with a normal model score; never blocks.
        let h = harness(0.1);
        let e = event("2024-05-02 03:00:00", "203.0.113.12", LoginOutcome::Failure);
        let verdict = h.engine.evaluate(&e).unwrap();
        assert_eq!(verdict.assessment().unwrap().risk_score, RiskScore::new(50));
        assert_eq!(verdict.assessment().unwrap().tier, RiskTier::Medium);
        assert!(!verdict.is_blocked());
    }

    #[test]
    fn test_blocked_source_is_rejected_before_scoring() {
        let h = harness(-0.1);
        let e = event("2024-05-02 02:00:00", "203.0.113.13", LoginOutcome::Failure);
        h.engine.evaluate(&e).unwrap();
        let failures = h.engine.failure_count(e.source_ip);

        let verdict = h.engine.evaluate(&e).unwrap();
        assert!(verdict.is_rejected());
        assert!(verdict.assessment().is_none());
        // Rejected attempts do not touch the tracker or alert again.
        assert_eq!(h.engine.failure_count(e.source_ip), failures);
        assert_eq!(h.alerts.seen.lock().len(), 1);
    }

    #[test]
    fn test_non_finite_score_is_model_error() {
        let h = harness(f64::NAN);
        let e = event("2024-05-02 02:00:00", "203.0.113.14", LoginOutcome::Failure);
        assert!(matches!(
            h.engine.evaluate(&e),
            Err(ShieldError::ModelUnavailable(_))
        ));
        assert_eq!(h.engine.failure_count(e.source_ip), 0);
    }

    #[test]
    fn test_unloaded_model_fails_evaluation() {
        let blocks = Arc::new(MemoryBlockStore::new());
        let engine = ShieldEngine::new(
            &PolicyConfig::default(),
            Arc::new(ModelHandle::unloaded()),
            Arc::new(InMemoryAttemptTracker::new()),
            blocks.clone(),
            Arc::new(Recorder::default()),
        );
        let e = event("2024-05-02 02:00:00", "203.0.113.15", LoginOutcome::Failure);
        assert!(matches!(
            engine.evaluate(&e),
            Err(ShieldError::ModelUnavailable(_))
        ));
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_evaluate_raw_rejects_invalid() {
        let h = harness(0.1);
        let raw = RawLoginEvent {
            timestamp: Some("not a time".to_string()),
            user_id: Some("alice".to_string()),
            ip_address: Some("203.0.113.16".to_string()),
            login_status: Some("failure".to_string()),
            ..RawLoginEvent::default()
        };
        assert!(matches!(
            h.engine.evaluate_raw(raw),
            Err(ShieldError::InvalidEvent(_))
        ));
    }

    #[test]
    fn test_verdict_serializes_with_tag() {
        let h = harness(0.1);
        let e = event("2024-05-02 14:00:00", "203.0.113.17", LoginOutcome::Success);
        let verdict = h.engine.evaluate(&e).unwrap();
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["verdict"], "accepted");
        assert_eq!(json["assessment"]["risk_score"], 0);
    }
}
