//! Append-only log of evaluated attempts.
//!
//! One JSON object per line, in the column layout of the login records plus
//! the computed score and status. Only scored attempts are written; attempts
//! rejected at the gate never reach the log.

use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::detection::{Assessment, Verdict};
use crate::{RiskScore, RiskTier, ShieldError, ShieldResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub user_id: String,
    pub ip_address: String,
    pub login_status: String,
    pub device_type: String,
    pub location: String,
    pub anomaly_score: f64,
    pub risk_score: RiskScore,
    pub status: RiskTier,
    pub blocked: bool,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationRecord {
    pub fn from_assessment(assessment: &Assessment, blocked: bool) -> Self {
        let event = &assessment.event;
        Self {
            timestamp: event.timestamp,
            user_id: event.user_id.clone(),
            ip_address: event.source_ip.to_string(),
            login_status: event.outcome.label().to_string(),
            device_type: event.device.clone(),
            location: event.location.clone(),
            anomaly_score: assessment.anomaly_score,
            risk_score: assessment.risk_score,
            status: assessment.tier,
            blocked,
            evaluated_at: Utc::now(),
        }
    }

    /// `None` for verdicts that were never scored.
    pub fn from_verdict(verdict: &Verdict) -> Option<Self> {
        verdict
            .assessment()
            .map(|assessment| Self::from_assessment(assessment, verdict.is_blocked()))
    }
}

pub struct JsonlEventLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlEventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &EvaluationRecord) -> ShieldResult<()> {
        let line = serde_json::to_string(record)?;

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }

    /// Append the record for a verdict, if it has one.
    pub fn record(&self, verdict: &Verdict) -> ShieldResult<bool> {
        match EvaluationRecord::from_verdict(verdict) {
            Some(record) => {
                self.append(&record)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Every record, oldest first. A missing file reads as empty.
    pub fn read_all(&self) -> ShieldResult<Vec<EvaluationRecord>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(&line).map_err(|e| {
                ShieldError::EventLog(format!(
                    "{} line {}: {}",
                    self.path.display(),
                    idx + 1,
                    e
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }
}
