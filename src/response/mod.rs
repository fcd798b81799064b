//! # Response Action Orchestrator
//!
//! Turns a risk score and the source's failure count into a decision, and
//! carries out `BlockAndAlert` decisions:
//! - idempotent insert into the block list
//! - exactly one alert dispatch per qualifying event
//!
//! Both happen even when the address is already on the list. Re-blocking is a
//! no-op; re-alerting is intentional. A failed alert never undoes a block.

pub mod alerter;
pub mod blocklist;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{BlockRecord, LoginEvent, PolicyConfig, RiskScore, ShieldResult};
use alerter::{Alert, AlertDispatcher};
use blocklist::BlockStore;

/// Outcome of the blocking policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    NoAction,
    BlockAndAlert,
}

/// Threshold policy, evaluated in order:
/// 1. score above `block_threshold` blocks, whatever the failure count;
/// 2. score above `escalation_threshold` blocks once the source has at
///    least `escalation_min_failures` failures;
/// 3. anything else is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionPolicy {
    pub block_threshold: u8,
    pub escalation_threshold: u8,
    pub escalation_min_failures: u32,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self::from(&PolicyConfig::default())
    }
}

impl From<&PolicyConfig> for DecisionPolicy {
    fn from(config: &PolicyConfig) -> Self {
        Self {
            block_threshold: config.block_threshold,
            escalation_threshold: config.escalation_threshold,
            escalation_min_failures: config.escalation_min_failures,
        }
    }
}

impl DecisionPolicy {
    /// Pure function of its inputs.
    pub fn decide(&self, risk_score: RiskScore, failure_count: u32) -> Decision {
        let score = risk_score.value();
        if score > self.block_threshold {
            Decision::BlockAndAlert
        } else if score > self.escalation_threshold
            && failure_count >= self.escalation_min_failures
        {
            Decision::BlockAndAlert
        } else {
            Decision::NoAction
        }
    }
}

/// What the orchestrator did for one `BlockAndAlert` decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseOutcome {
    /// False when the address was already on the block list.
    pub newly_blocked: bool,

    /// False when any alert channel failed.
    pub alert_delivered: bool,
}

/// Executes block-and-alert responses against the injected stores.
pub struct ResponseOrchestrator {
    blocks: Arc<dyn BlockStore>,
    alerts: Arc<dyn AlertDispatcher>,
    block_reason: String,
}

impl ResponseOrchestrator {
    pub fn new(
        blocks: Arc<dyn BlockStore>,
        alerts: Arc<dyn AlertDispatcher>,
        block_reason: impl Into<String>,
    ) -> Self {
        Self {
            blocks,
            alerts,
            block_reason: block_reason.into(),
        }
    }

    /// Block the event's source and alert on it.
    ///
    /// A block-list write failure is returned as an error, but only after the
    /// alert has been attempted. Alert failures are logged and reported via
    /// `alert_delivered`, never as an error.
    pub fn respond(&self, event: &LoginEvent, risk_score: RiskScore) -> ShieldResult<ResponseOutcome> {
        let record = BlockRecord::new(event.source_ip, self.block_reason.clone());
        let block_result = self.blocks.insert_if_absent(record);

        match &block_result {
            Ok(true) => log::warn!(
                "[BLOCK] Blocked {} (user={}, score={})",
                event.source_ip,
                event.user_id,
                risk_score
            ),
            Ok(false) => log::info!(
                "[BLOCK] {} already blocked, skipping duplicate",
                event.source_ip
            ),
            Err(e) => log::error!(
                "[RESPONSE] Failed to block IP {}: {}",
                event.source_ip,
                e
            ),
        }

        let alert = Alert::new(event, risk_score);
        let alert_delivered = match self.alerts.dispatch(&alert) {
            Ok(()) => true,
            Err(e) => {
                log::error!(
                    "[RESPONSE] Failed to deliver alert for {}: {}",
                    event.source_ip,
                    e
                );
                false
            }
        };

        let newly_blocked = block_result?;
        Ok(ResponseOutcome {
            newly_blocked,
            alert_delivered,
        })
    }
}
