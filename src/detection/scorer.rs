//! # Risk Composer
//!
//! Combines the categorical signals of a login with the anomaly model's
//! output into one bounded integer score.
//!
//! ## Scoring Model
//!
//! ```text
//! score = 30 * failed + 20 * night + 40 * (anomaly < 0)
//! ```
//!
//! clamped to [0, 100]. Each signal contributes a fixed weight regardless of
//! the others. The three weights sum to 90, so the clamp never bites with the
//! current weights; it keeps the bound if the weights change.
//!
//! Tiers use fixed cut points: <=40 Normal, 41-70 Medium, >70 High.

use crate::detection::features::FeatureVector;
use crate::{RiskScore, RiskTier};

/// Weight of a failed credential check.
pub const FAILURE_WEIGHT: u32 = 30;

/// Weight of an attempt at night.
pub const NIGHT_WEIGHT: u32 = 20;

/// Weight of a negative (anomalous) model score.
pub const ANOMALY_WEIGHT: u32 = 40;

/// Compose the risk score for one feature vector and anomaly value.
pub fn compose(features: &FeatureVector, anomaly_score: f64) -> RiskScore {
    let mut score = 0u32;
    if features.login_failed {
        score += FAILURE_WEIGHT;
    }
    if features.is_night {
        score += NIGHT_WEIGHT;
    }
    if is_anomalous(anomaly_score) {
        score += ANOMALY_WEIGHT;
    }
    RiskScore::new(score)
}

/// Model convention: negative means anomalous.
pub fn is_anomalous(anomaly_score: f64) -> bool {
    anomaly_score < 0.0
}

/// Compose and bucket in one call.
pub fn compose_with_tier(features: &FeatureVector, anomaly_score: f64) -> (RiskScore, RiskTier) {
    let score = compose(features, anomaly_score);
    (score, score.tier())
}

/// Format a score as a compact string for logging.
///
/// Example: "RISK 90 [F:1 N:1 A:-0.104] High Risk"
pub fn format_score(features: &FeatureVector, anomaly_score: f64, score: RiskScore) -> String {
    format!(
        "RISK {} [F:{} N:{} A:{:.3}] {}",
        score,
        u8::from(features.login_failed),
        u8::from(features.is_night),
        anomaly_score,
        score.tier(),
    )
}
