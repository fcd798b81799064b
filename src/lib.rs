//! # Login Shield - Core Library
//!
//! Real-time risk evaluation for authentication attempts.
//!
//! Every login attempt runs through one pipeline: the block-list gate, feature
//! extraction, the anomaly model, risk composition, per-source failure
//! tracking and the blocking policy. Attempts that cross the policy thresholds
//! get their source address written to the block list and an alert sent.
//!
//! ## Design Philosophy
//! - **One event, one verdict.** Scoring never needs the historical dataset.
//! - **Fail loud on missing signals.** An unloaded model is an error, never a
//!   risk score of zero.
//! - **Side effects are idempotent.** Blocking an address twice leaves one
//!   record; alerting is best-effort and never unwinds a block.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

pub mod dashboard;
pub mod detection;
pub mod event_log;
pub mod log_sources;
pub mod model;
pub mod response;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Unified error type for Login Shield.
#[derive(Error, Debug)]
pub enum ShieldError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed timestamp, missing required field, bad address or status.
    #[error("Invalid login event: {0}")]
    InvalidEvent(String),

    /// The anomaly model is not loaded or produced an unusable score.
    #[error("Anomaly model unavailable: {0}")]
    ModelUnavailable(String),

    /// Block list persistence is unreachable or corrupt.
    #[error("Block list store unavailable: {0}")]
    StoreUnavailable(String),

    /// An alert channel failed to deliver. Never fatal to an evaluation.
    #[error("Alert dispatch failed: {0}")]
    DispatchFailure(String),

    #[error("Event log error: {0}")]
    EventLog(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

pub type ShieldResult<T> = Result<T, ShieldError>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Top-level configuration for Login Shield.
///
/// Loaded from `login-shield.toml` in the working directory or a path
/// supplied via CLI flag. Missing sections fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfig {
    /// General settings.
    pub general: GeneralConfig,

    /// Anomaly model location.
    pub model: ModelConfig,

    /// Blocking policy thresholds and gate behavior.
    pub policy: PolicyConfig,

    /// Block list and event log files.
    pub storage: StorageConfig,

    /// Alert channels.
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding the block list, event log and alert output.
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the exported isolation-forest model (JSON).
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Risk scores strictly above this block unconditionally.
    pub block_threshold: u8,

    /// Risk scores strictly above this block once the source has failed
    /// at least `escalation_min_failures` times (current attempt included).
    pub escalation_threshold: u8,

    /// Consecutive failures required for the escalation rule.
    pub escalation_min_failures: u32,

    /// What the gate does when the block list cannot be read.
    pub gate_failure_mode: GateFailureMode,

    /// Reason stored on every block record.
    pub block_reason: String,
}

/// Behavior of the block-list gate when the store is unavailable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateFailureMode {
    /// Propagate `StoreUnavailable` to the caller.
    #[default]
    FailClosed,

    /// Log a warning and treat the address as not blocked.
    FailOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persisted block list (JSON array of block records).
    pub block_list_path: PathBuf,

    /// Append-only log of evaluated attempts (JSON lines).
    pub event_log_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Path to the alert JSONL file. Always written.
    pub alert_log_path: PathBuf,

    /// Optional webhook URL for real-time alerts.
    pub webhook_url: Option<String>,

    /// Optional recipient; alerts are queued as .eml files next to the alert log.
    pub alert_email: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./shield-data"),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./shield-data/anomaly_model.json"),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            block_threshold: 85,
            escalation_threshold: 70,
            escalation_min_failures: 1,
            gate_failure_mode: GateFailureMode::FailClosed,
            block_reason: "High risk login detected".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            block_list_path: PathBuf::from("./shield-data/blocked_ips.json"),
            event_log_path: PathBuf::from("./shield-data/login_logs.jsonl"),
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            alert_log_path: PathBuf::from("./shield-data/alerts.jsonl"),
            webhook_url: None,
            alert_email: None,
        }
    }
}

impl ShieldConfig {
    /// Load configuration from a TOML file and validate it.
    pub fn from_file(path: &std::path::Path) -> ShieldResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ShieldConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default configuration to a TOML file.
    pub fn write_default(path: &std::path::Path) -> ShieldResult<()> {
        let config = Self::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| ShieldError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject threshold combinations the blocking policy cannot honor.
    pub fn validate(&self) -> ShieldResult<()> {
        let policy = &self.policy;
        if policy.block_threshold > RiskScore::MAX {
            return Err(ShieldError::Config(format!(
                "block_threshold must be at most {}, got {}",
                RiskScore::MAX,
                policy.block_threshold
            )));
        }
        if policy.escalation_threshold > policy.block_threshold {
            return Err(ShieldError::Config(format!(
                "escalation_threshold ({}) must not exceed block_threshold ({})",
                policy.escalation_threshold, policy.block_threshold
            )));
        }
        if policy.escalation_min_failures == 0 {
            return Err(ShieldError::Config(
                "escalation_min_failures must be at least 1".to_string(),
            ));
        }
        if let Some(ref url) = self.alerts.webhook_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(ShieldError::Config(format!(
                    "webhook_url must start with http:// or https://, got: {}",
                    url
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Login events
// ---------------------------------------------------------------------------

/// Outcome of a single credential check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LoginOutcome {
    Success,
    Failure,
}

impl LoginOutcome {
    /// Parse a login status label (`success` / `failure`, any ASCII case).
    pub fn parse(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("success") {
            Some(LoginOutcome::Success)
        } else if label.eq_ignore_ascii_case("failure") {
            Some(LoginOutcome::Failure)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LoginOutcome::Success => "success",
            LoginOutcome::Failure => "failure",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, LoginOutcome::Failure)
    }
}

impl fmt::Display for LoginOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A login record as handed over by the front end or read from a file.
///
/// Every field is optional here; `LoginEvent::try_from` decides what is
/// required. Field names follow the persisted log columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawLoginEvent {
    pub timestamp: Option<String>,
    pub user_id: Option<String>,
    pub ip_address: Option<String>,
    pub login_status: Option<String>,
    pub device_type: Option<String>,
    pub location: Option<String>,
}

/// A validated, immutable login attempt.
///
/// Device and location stay as free-form labels; the feature extractor maps
/// them onto fixed enumerations. Keeping the label means alerts show what the
/// caller actually sent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginEvent {
    /// When the attempt happened, in the caller's offset.
    pub timestamp: DateTime<FixedOffset>,

    /// Account being authenticated.
    pub user_id: String,

    /// Network origin; the key for tracking and blocking.
    pub source_ip: IpAddr,

    /// Device label, e.g. `web`, `mobile`.
    pub device: String,

    /// Location label, e.g. `US`, `unknown`.
    pub location: String,

    pub outcome: LoginOutcome,
}

/// Labels used when the caller does not report a device or location.
pub const UNKNOWN_LABEL: &str = "unknown";

/// Naive timestamp layouts accepted besides RFC 3339. Interpreted as UTC.
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

impl LoginEvent {
    /// Build an event with unknown device and location.
    pub fn new(
        timestamp: DateTime<FixedOffset>,
        user_id: impl Into<String>,
        source_ip: IpAddr,
        outcome: LoginOutcome,
    ) -> Self {
        Self {
            timestamp,
            user_id: user_id.into(),
            source_ip,
            device: UNKNOWN_LABEL.to_string(),
            location: UNKNOWN_LABEL.to_string(),
            outcome,
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Convert back to the persisted column layout.
    pub fn to_raw(&self) -> RawLoginEvent {
        RawLoginEvent {
            timestamp: Some(self.timestamp.to_rfc3339()),
            user_id: Some(self.user_id.clone()),
            ip_address: Some(self.source_ip.to_string()),
            login_status: Some(self.outcome.label().to_string()),
            device_type: Some(self.device.clone()),
            location: Some(self.location.clone()),
        }
    }
}

impl TryFrom<RawLoginEvent> for LoginEvent {
    type Error = ShieldError;

    fn try_from(raw: RawLoginEvent) -> ShieldResult<Self> {
        let timestamp_str = raw
            .timestamp
            .ok_or_else(|| ShieldError::InvalidEvent("missing timestamp".to_string()))?;
        let timestamp = parse_event_timestamp(&timestamp_str).ok_or_else(|| {
            ShieldError::InvalidEvent(format!("unparseable timestamp: {:?}", timestamp_str))
        })?;

        let user_id = raw
            .user_id
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| ShieldError::InvalidEvent("missing user_id".to_string()))?;

        let ip_str = raw
            .ip_address
            .ok_or_else(|| ShieldError::InvalidEvent("missing ip_address".to_string()))?;
        let source_ip: IpAddr = ip_str.trim().parse().map_err(|_| {
            ShieldError::InvalidEvent(format!("invalid ip_address: {:?}", ip_str))
        })?;

        let status = raw
            .login_status
            .ok_or_else(|| ShieldError::InvalidEvent("missing login_status".to_string()))?;
        let outcome = LoginOutcome::parse(&status).ok_or_else(|| {
            ShieldError::InvalidEvent(format!("unknown login_status: {:?}", status))
        })?;

        Ok(Self {
            timestamp,
            user_id,
            source_ip,
            device: label_or_unknown(raw.device_type),
            location: label_or_unknown(raw.location),
            outcome,
        })
    }
}

fn label_or_unknown(label: Option<String>) -> String {
    label
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| UNKNOWN_LABEL.to_string())
}

/// Parse an event timestamp: RFC 3339 first, then the naive layouts as UTC.
pub fn parse_event_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    NAIVE_TIMESTAMP_FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(raw, fmt)
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

// ---------------------------------------------------------------------------
// Risk score
// ---------------------------------------------------------------------------

/// A bounded risk score in [0, 100].
///
/// Built by `detection::scorer::compose`; see there for the weights.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RiskScore(u8);

impl RiskScore {
    pub const MAX: u8 = 100;

    /// Create a score, clamping anything above 100.
    pub fn new(value: u32) -> Self {
        Self(value.min(Self::MAX as u32) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn tier(&self) -> RiskTier {
        RiskTier::from_score(*self)
    }
}

impl fmt::Display for RiskScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse risk bucket for reporting and alerts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RiskTier {
    Normal,
    Medium,
    High,
}

impl RiskTier {
    /// Upper bound (inclusive) of the Normal tier.
    pub const NORMAL_MAX: u8 = 40;

    /// Upper bound (inclusive) of the Medium tier.
    pub const MEDIUM_MAX: u8 = 70;

    pub fn from_score(score: RiskScore) -> Self {
        match score.value() {
            s if s > Self::MEDIUM_MAX => RiskTier::High,
            s if s > Self::NORMAL_MAX => RiskTier::Medium,
            _ => RiskTier::Normal,
        }
    }

    /// Status label used in logs, alerts and reports.
    pub fn label(&self) -> &'static str {
        match self {
            RiskTier::Normal => "Normal",
            RiskTier::Medium => "Medium Risk",
            RiskTier::High => "High Risk",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Block records
// ---------------------------------------------------------------------------

/// One entry of the persisted block list.
///
/// At most one record exists per source address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    #[serde(rename = "ip_address")]
    pub source_ip: IpAddr,

    pub blocked_at: DateTime<Utc>,

    pub reason: String,
}

impl BlockRecord {
    pub fn new(source_ip: IpAddr, reason: impl Into<String>) -> Self {
        Self {
            source_ip,
            blocked_at: Utc::now(),
            reason: reason.into(),
        }
    }
}
