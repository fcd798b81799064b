//! # Dashboard Summary
//!
//! Read-only rollup of the event log for operators:
//! - total attempts and how many were blocked
//! - counts per risk tier
//! - logins per hour of day (in each event's own offset)
//! - the newest records first
//!
//! The summary never touches the engine; it only reads evaluation records.

use std::fmt::Write;

use chrono::Timelike;
use serde::{Deserialize, Serialize};

use crate::event_log::EvaluationRecord;
use crate::RiskTier;

/// How many recent records `report` shows by default.
pub const DEFAULT_RECENT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TierCounts {
    pub normal: usize,
    pub medium: usize,
    pub high: usize,
}

impl TierCounts {
    fn bump(&mut self, tier: RiskTier) {
        match tier {
            RiskTier::Normal => self.normal += 1,
            RiskTier::Medium => self.medium += 1,
            RiskTier::High => self.high += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DashboardSummary {
    pub total: usize,
    pub blocked: usize,
    pub tiers: TierCounts,
    pub logins_per_hour: [usize; 24],

    /// Newest first.
    pub recent: Vec<EvaluationRecord>,
}

/// Roll up `records` (oldest first, as the log stores them).
pub fn summarize(records: &[EvaluationRecord], recent_limit: usize) -> DashboardSummary {
    let mut tiers = TierCounts::default();
    let mut logins_per_hour = [0usize; 24];
    let mut blocked = 0;

    for record in records {
        tiers.bump(record.status);
        logins_per_hour[record.timestamp.hour() as usize] += 1;
        if record.blocked {
            blocked += 1;
        }
    }

    DashboardSummary {
        total: records.len(),
        blocked,
        tiers,
        logins_per_hour,
        recent: records.iter().rev().take(recent_limit).cloned().collect(),
    }
}

impl DashboardSummary {
    /// Plain-text rendering for the terminal.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== Login Shield Report ===");
        let _ = writeln!(out, "Total attempts: {}", self.total);
        let _ = writeln!(out, "Blocked:        {}", self.blocked);
        let _ = writeln!(out);
        let _ = writeln!(out, "Risk distribution:");
        let _ = writeln!(out, "  {:<12} {}", RiskTier::Normal.label(), self.tiers.normal);
        let _ = writeln!(out, "  {:<12} {}", RiskTier::Medium.label(), self.tiers.medium);
        let _ = writeln!(out, "  {:<12} {}", RiskTier::High.label(), self.tiers.high);
        let _ = writeln!(out);

        let _ = writeln!(out, "Logins per hour:");
        let peak = self.logins_per_hour.iter().copied().max().unwrap_or(0).max(1);
        for (hour, count) in self.logins_per_hour.iter().enumerate() {
            if *count == 0 {
                continue;
            }
            let bar = "#".repeat((count * 40).div_ceil(peak));
            let _ = writeln!(out, "  {:02}:00 {:>6} {}", hour, count, bar);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "Most recent:");
        if self.recent.is_empty() {
            let _ = writeln!(out, "  (no evaluated attempts)");
        }
        for record in &self.recent {
            let _ = writeln!(
                out,
                "  {} {:<16} {:<40} {:<8} {:>3} {}{}",
                record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                record.user_id,
                record.ip_address,
                record.login_status,
                record.risk_score,
                record.status,
                if record.blocked { " [BLOCKED]" } else { "" },
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_event_timestamp, RiskScore};
    use chrono::Utc;

    fn record(ts: &str, score: u32, blocked: bool) -> EvaluationRecord {
        let risk_score = RiskScore::new(score);
        EvaluationRecord {
            timestamp: parse_event_timestamp(ts).unwrap(),
            user_id: "carol".to_string(),
            ip_address: "10.9.8.7".to_string(),
            login_status: "failure".to_string(),
            device_type: "web".to_string(),
            location: "CA".to_string(),
            anomaly_score: -0.05,
            risk_score,
            status: risk_score.tier(),
            blocked,
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_summary() {
        let summary = summarize(&[], DEFAULT_RECENT_LIMIT);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.tiers, TierCounts::default());
        assert!(summary.render_text().contains("no evaluated attempts"));
    }

    #[test]
    fn test_counts_tiers_hours_and_blocks() {
        let records = vec![
            record("2024-05-02 02:10:00", 90, true),
            record("2024-05-02 02:50:00", 50, false),
            record("2024-05-02 14:00:00", 30, false),
        ];
        let summary = summarize(&records, DEFAULT_RECENT_LIMIT);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.blocked, 1);
        assert_eq!(
            summary.tiers,
            TierCounts {
                normal: 1,
                medium: 1,
                high: 1
            }
        );
        assert_eq!(summary.logins_per_hour[2], 2);
        assert_eq!(summary.logins_per_hour[14], 1);
        assert_eq!(summary.logins_per_hour.iter().sum::<usize>(), 3);
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let records: Vec<_> = (0..5)
            .map(|h| record(&format!("2024-05-02 0{}:00:00", h), 0, false))
            .collect();
        let summary = summarize(&records, 2);
        assert_eq!(summary.recent.len(), 2);
        assert_eq!(summary.recent[0].timestamp.hour(), 4);
        assert_eq!(summary.recent[1].timestamp.hour(), 3);
    }

    #[test]
    fn test_render_marks_blocked() {
        let summary = summarize(&[record("2024-05-02 02:10:00", 90, true)], 5);
        let text = summary.render_text();
        assert!(text.contains("[BLOCKED]"));
        assert!(text.contains("High Risk"));
    }
}
