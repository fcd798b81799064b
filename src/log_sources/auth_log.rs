//! sshd credential checks from `/var/log/auth.log` or `/var/log/secure`.
//!
//! Recognized messages:
//! - `Failed password for [invalid user] <user> from <ip>` -> failure
//! - `Invalid user <user> from <ip>` -> failure
//! - `Accepted password|publickey for <user> from <ip>` -> success
//!
//! auth.log carries no device or location, so both stay `unknown`. Syslog
//! headers have no year or zone; the configured year is used and the time is
//! read as UTC.
//!
//! Lines without `sshd` are dropped before any regex runs.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use std::net::IpAddr;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDateTime, Utc};
use regex::Regex;

use crate::log_sources::LogSource;
use crate::{LoginEvent, LoginOutcome, ShieldError, ShieldResult};

/// `<Mon> <day> <HH:MM:SS> <host> sshd[<pid>]: <message>`
static SSHD_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<month>[A-Z][a-z]{2})\s+(?P<day>\d{1,2})\s+(?P<time>\d{2}:\d{2}:\d{2})\s+\S+\s+sshd(?:\[\d+\])?:\s+(?P<msg>.*)$",
    )
    .expect("regex")
});

/// The three credential messages, one alternation per outcome.
static CREDENTIAL_CHECK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"(?P<failed>Failed password for (?:invalid user )?)",
        r"|(?P<invalid>Invalid user )",
        r"|(?P<accepted>Accepted (?:password|publickey) for )",
        r")(?P<user>\S+) from (?P<ip>[0-9A-Fa-f:.]+)",
    ))
    .expect("regex")
});

pub struct AuthLogSource {
    year: i32,
}

impl AuthLogSource {
    /// Stamp events with the current year.
    pub fn new() -> Self {
        Self::with_year(Utc::now().year())
    }

    pub fn with_year(year: i32) -> Self {
        Self { year }
    }
}

impl Default for AuthLogSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSource for AuthLogSource {
    fn name(&self) -> &str {
        "auth.log"
    }

    fn parse_line(&self, line: &str) -> ShieldResult<Option<LoginEvent>> {
        if !line.contains("sshd") {
            return Ok(None);
        }
        let Some(header) = SSHD_LINE.captures(line) else {
            return Ok(None);
        };
        let Some(check) = CREDENTIAL_CHECK.captures(&header["msg"]) else {
            return Ok(None);
        };

        let outcome = if check.name("accepted").is_some() {
            LoginOutcome::Success
        } else {
            LoginOutcome::Failure
        };

        let ip = &check["ip"];
        let source_ip: IpAddr = ip.parse().map_err(|_| {
            ShieldError::InvalidEvent(format!("invalid source address in auth.log: {:?}", ip))
        })?;

        let timestamp = syslog_time(self.year, &header["month"], &header["day"], &header["time"])
            .ok_or_else(|| {
                ShieldError::InvalidEvent(format!("unparseable syslog timestamp in {:?}", line))
            })?;

        Ok(Some(LoginEvent::new(timestamp, &check["user"], source_ip, outcome)))
    }
}

/// Syslog time in `year`, read as UTC. `None` for impossible dates.
fn syslog_time(year: i32, month: &str, day: &str, time: &str) -> Option<DateTime<FixedOffset>> {
    let stamp = format!("{} {} {} {}", year, month, day, time);
    let naive = NaiveDateTime::parse_from_str(&stamp, "%Y %b %d %H:%M:%S").ok()?;
    Some(naive.and_utc().fixed_offset())
}
