//! # Alert Dispatcher
//!
//! Best-effort notification when an attempt is blocked. Channels:
//! - JSONL alert log (always active, one JSON object per line)
//! - Webhook POST (optional, via ureq)
//! - E-mail queue (optional, writes .eml files for external pickup)
//!
//! Every alert carries the evaluated event: identity, source address,
//! device, location, event timestamp, risk score and tier.
//!
//! Dispatch errors come back as `DispatchFailure`; the orchestrator logs them
//! and moves on. Nothing here can undo a block.

use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{AlertConfig, LoginEvent, RiskScore, RiskTier, ShieldError, ShieldResult};

/// Full context of a blocked attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub user_id: String,
    pub source_ip: IpAddr,
    pub device: String,
    pub location: String,
    pub timestamp: DateTime<FixedOffset>,
    pub risk_score: RiskScore,
    pub tier: RiskTier,
}

impl Alert {
    pub fn new(event: &LoginEvent, risk_score: RiskScore) -> Self {
        Self {
            user_id: event.user_id.clone(),
            source_ip: event.source_ip,
            device: event.device.clone(),
            location: event.location.clone(),
            timestamp: event.timestamp,
            risk_score,
            tier: risk_score.tier(),
        }
    }

    /// Subject line shared by every channel.
    pub fn subject(&self) -> String {
        format!("{} Login Detected: {}", self.tier, self.source_ip)
    }

    /// Plain-text body shared by the webhook and e-mail channels.
    pub fn body(&self) -> String {
        format!(
            "{} Login Detected!\n\
             \n\
             User:       {}\n\
             IP:         {}\n\
             Device:     {}\n\
             Location:   {}\n\
             Time:       {}\n\
             Risk Score: {}\n\
             Status:     {}\n",
            self.tier,
            self.user_id,
            self.source_ip,
            self.device,
            self.location,
            self.timestamp.to_rfc3339(),
            self.risk_score,
            self.tier,
        )
    }
}

/// A notification channel.
pub trait AlertDispatcher: Send + Sync {
    fn name(&self) -> &str;

    fn dispatch(&self, alert: &Alert) -> ShieldResult<()>;
}

// ---------------------------------------------------------------------------
// JSONL alert log
// ---------------------------------------------------------------------------

/// Appends each alert as a JSON line. Creates the file and parent
/// directories on first use.
pub struct JsonlAlertLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn append(&self, alert: &Alert) -> ShieldResult<()> {
        let alert_obj = serde_json::json!({
            "logged_at": Utc::now().to_rfc3339(),
            "timestamp": alert.timestamp.to_rfc3339(),
            "user_id": alert.user_id,
            "ip_address": alert.source_ip.to_string(),
            "device_type": alert.device,
            "location": alert.location,
            "risk_score": alert.risk_score.value(),
            "status": alert.tier.label(),
        });
        let json_line = serde_json::to_string(&alert_obj)?;

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
        writeln!(file, "{}", json_line)?;
        file.flush()?;
        Ok(())
    }
}

impl AlertDispatcher for JsonlAlertLog {
    fn name(&self) -> &str {
        "alert-log"
    }

    fn dispatch(&self, alert: &Alert) -> ShieldResult<()> {
        self.append(alert).map_err(|e| {
            ShieldError::DispatchFailure(format!("alert log {}: {}", self.path.display(), e))
        })?;
        log::warn!(
            "[ALERT] {} | {} | user={} | score={} | {}",
            alert.timestamp.to_rfc3339(),
            alert.source_ip,
            alert.user_id,
            alert.risk_score,
            alert.tier,
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// POSTs a JSON payload to a webhook (Slack, Discord, Teams or a generic
/// endpoint). Five-second timeout.
pub struct WebhookAlerter {
    url: String,
    agent: ureq::Agent,
}

impl WebhookAlerter {
    pub fn new(url: &str) -> ShieldResult<Self> {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(ShieldError::Config(format!(
                "Webhook URL must start with http:// or https://, got: {}",
                url
            )));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(5))
            .build();
        Ok(Self {
            url: url.to_string(),
            agent,
        })
    }
}

impl AlertDispatcher for WebhookAlerter {
    fn name(&self) -> &str {
        "webhook"
    }

    fn dispatch(&self, alert: &Alert) -> ShieldResult<()> {
        let payload = serde_json::json!({
            "text": alert.subject(),
            "body": alert.body(),
            "timestamp": alert.timestamp.to_rfc3339(),
            "user_id": alert.user_id,
            "ip_address": alert.source_ip.to_string(),
            "device_type": alert.device,
            "location": alert.location,
            "risk_score": alert.risk_score.value(),
            "status": alert.tier.label(),
            "hostname": hostname_string(),
        });
        let payload_str = serde_json::to_string(&payload)?;

        let response = self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&payload_str)
            .map_err(|e| {
                ShieldError::DispatchFailure(format!("webhook POST to {} failed: {}", self.url, e))
            })?;

        log::info!(
            "[WEBHOOK] POST to {} succeeded (status {}): {}",
            self.url,
            response.status(),
            alert.source_ip,
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// E-mail queue
// ---------------------------------------------------------------------------

/// Writes each alert as an .eml file under `queue_dir`. A separate process
/// (cron, systemd timer, sendmail pickup) delivers them.
pub struct EmailQueueAlerter {
    recipient: String,
    queue_dir: PathBuf,
    sequence: AtomicU64,
}

impl EmailQueueAlerter {
    pub fn new(recipient: impl Into<String>, queue_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipient: recipient.into(),
            queue_dir: queue_dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn queue_dir(&self) -> &Path {
        &self.queue_dir
    }

    fn write_eml(&self, alert: &Alert) -> ShieldResult<PathBuf> {
        let now = Utc::now();
        let hostname = hostname_string();

        let eml_content = format!(
            "From: Login Shield <shield@{}>\r\n\
             To: {}\r\n\
             Subject: {}\r\n\
             Date: {}\r\n\
             MIME-Version: 1.0\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             X-Shield-Risk-Score: {}\r\n\
             X-Shield-Source-IP: {}\r\n\
             \r\n\
             {}",
            hostname,
            self.recipient,
            alert.subject(),
            now.format("%a, %d %b %Y %H:%M:%S +0000"),
            alert.risk_score,
            alert.source_ip,
            alert.body().replace('\n', "\r\n"),
        );

        if !self.queue_dir.exists() {
            std::fs::create_dir_all(&self.queue_dir)?;
        }

        // The sequence keeps two alerts for one address within a second apart.
        let filename = format!(
            "shield_{}_{}_{}.eml",
            now.format("%Y%m%d_%H%M%S"),
            alert.source_ip.to_string().replace(':', "-"),
            self.sequence.fetch_add(1, Ordering::Relaxed),
        );
        let eml_path = self.queue_dir.join(filename);

        let mut file = std::fs::File::create(&eml_path)?;
        file.write_all(eml_content.as_bytes())?;
        file.flush()?;
        Ok(eml_path)
    }
}

impl AlertDispatcher for EmailQueueAlerter {
    fn name(&self) -> &str {
        "email-queue"
    }

    fn dispatch(&self, alert: &Alert) -> ShieldResult<()> {
        let eml_path = self.write_eml(alert).map_err(|e| {
            ShieldError::DispatchFailure(format!(
                "email queue {}: {}",
                self.queue_dir.display(),
                e
            ))
        })?;
        log::info!(
            "[EMAIL] Queued alert email to {} at {:?}: {}",
            self.recipient,
            eml_path,
            alert.source_ip,
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Delivers to every channel; one failing channel does not skip the rest.
#[derive(Default)]
pub struct AlertFanout {
    channels: Vec<Box<dyn AlertDispatcher>>,
}

impl AlertFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the channels named in the configuration.
    pub fn from_config(config: &AlertConfig) -> ShieldResult<Self> {
        let mut fanout = Self::new();
        fanout.add(Box::new(JsonlAlertLog::new(config.alert_log_path.clone())));

        if let Some(ref url) = config.webhook_url {
            fanout.add(Box::new(WebhookAlerter::new(url)?));
        }

        if let Some(ref email) = config.alert_email {
            let alert_dir = config
                .alert_log_path
                .parent()
                .unwrap_or_else(|| Path::new("."));
            fanout.add(Box::new(EmailQueueAlerter::new(
                email.clone(),
                alert_dir.join("email_queue"),
            )));
        }

        Ok(fanout)
    }

    pub fn add(&mut self, channel: Box<dyn AlertDispatcher>) {
        log::info!("[ALERT] Registered alert channel: {}", channel.name());
        self.channels.push(channel);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl AlertDispatcher for AlertFanout {
    fn name(&self) -> &str {
        "fanout"
    }

    fn dispatch(&self, alert: &Alert) -> ShieldResult<()> {
        let failures: Vec<String> = self
            .channels
            .iter()
            .filter_map(|channel| {
                channel
                    .dispatch(alert)
                    .err()
                    .map(|e| format!("{}: {}", channel.name(), e))
            })
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ShieldError::DispatchFailure(failures.join("; ")))
        }
    }
}

/// Get the system hostname, falling back to "unknown" on error.
fn hostname_string() -> String {
    if cfg!(target_os = "windows") {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "unknown".to_string())
    } else {
        std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parse_event_timestamp, LoginOutcome};

    fn test_alert() -> Alert {
        let event = LoginEvent::new(
            parse_event_timestamp("2024-05-02 02:10:00").unwrap(),
            "admin",
            "203.0.113.50".parse().unwrap(),
            LoginOutcome::Failure,
        )
        .with_device("web")
        .with_location("US");
        Alert::new(&event, RiskScore::new(90))
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("login_shield_test_alerts").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    struct Broken;

    impl AlertDispatcher for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn dispatch(&self, _alert: &Alert) -> ShieldResult<()> {
            Err(ShieldError::DispatchFailure("transport down".to_string()))
        }
    }

    #[test]
    fn test_alert_carries_event_context() {
        let alert = test_alert();
        assert_eq!(alert.tier, RiskTier::High);
        let body = alert.body();
        assert!(body.contains("admin"));
        assert!(body.contains("203.0.113.50"));
        assert!(body.contains("web"));
        assert!(body.contains("US"));
        assert!(body.contains("90"));
        assert!(alert.subject().contains("High Risk"));
    }

    #[test]
    fn test_alert_log_appends_json_lines() {
        let dir = test_dir("jsonl");
        let path = dir.join("alerts.jsonl");
        let log = JsonlAlertLog::new(&path);

        log.dispatch(&test_alert()).unwrap();
        log.dispatch(&test_alert()).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["ip_address"], "203.0.113.50");
        assert_eq!(parsed["user_id"], "admin");
        assert_eq!(parsed["risk_score"], 90);
        assert_eq!(parsed["status"], "High Risk");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_email_queue_creates_distinct_files() {
        let dir = test_dir("email");
        let queue = EmailQueueAlerter::new("admin@example.com", dir.join("email_queue"));

        queue.dispatch(&test_alert()).unwrap();
        queue.dispatch(&test_alert()).unwrap();

        let entries: Vec<_> = std::fs::read_dir(queue.queue_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 2);

        let eml = std::fs::read_to_string(entries[0].path()).unwrap();
        assert!(eml.contains("To: admin@example.com"));
        assert!(eml.contains("203.0.113.50"));
        assert!(eml.contains("High Risk Login Detected"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_webhook_rejects_bad_url() {
        assert!(WebhookAlerter::new("ftp://bad.example.com").is_err());
        assert!(WebhookAlerter::new("not-a-url").is_err());
        assert!(WebhookAlerter::new("https://hooks.example.com/x").is_ok());
    }

    #[test]
    fn test_fanout_reports_failures_but_runs_all_channels() {
        let dir = test_dir("fanout");
        let path = dir.join("alerts.jsonl");

        let mut fanout = AlertFanout::new();
        fanout.add(Box::new(Broken));
        fanout.add(Box::new(JsonlAlertLog::new(&path)));

        let result = fanout.dispatch(&test_alert());
        match result {
            Err(ShieldError::DispatchFailure(msg)) => assert!(msg.contains("broken")),
            other => panic!("expected dispatch failure, got {:?}", other),
        }
        // The healthy channel still delivered.
        assert!(path.exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_fanout_from_config() {
        let dir = test_dir("config");
        let config = AlertConfig {
            alert_log_path: dir.join("alerts.jsonl"),
            webhook_url: None,
            alert_email: Some("soc@example.com".to_string()),
        };
        let fanout = AlertFanout::from_config(&config).unwrap();
        assert_eq!(fanout.channel_count(), 2);

        fanout.dispatch(&test_alert()).unwrap();
        assert!(dir.join("email_queue").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_hostname_returns_something() {
        assert!(!hostname_string().is_empty());
    }
}
