//! Event sources for batch evaluation.
//!
//! A `LogSource` turns one line of input into at most one `LoginEvent`.
//! Lines that are not login attempts yield `Ok(None)`; lines that look like
//! attempts but cannot be validated yield `InvalidEvent`.
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

pub mod auth_log;

use std::io::{BufRead, BufReader};
use std::path::Path;

use clap::ValueEnum;

use crate::{LoginEvent, RawLoginEvent, ShieldError, ShieldResult};

pub trait LogSource: Send + Sync {
    fn name(&self) -> &str;
    fn parse_line(&self, line: &str) -> ShieldResult<Option<LoginEvent>>;
}

/// Supported input layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceFormat {
    /// One `RawLoginEvent` JSON object per line.
    JsonLines,
    /// Linux sshd `auth.log` / `secure`.
    AuthLog,
}

impl SourceFormat {
    /// Guess from the file name: `.json`/`.jsonl` are JSON lines, anything
    /// else is treated as an auth log.
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("jsonl") || ext.eq_ignore_ascii_case("json") => {
                SourceFormat::JsonLines
            }
            _ => SourceFormat::AuthLog,
        }
    }

    pub fn source(&self) -> Box<dyn LogSource> {
        match self {
            SourceFormat::JsonLines => Box::new(JsonLinesSource),
            SourceFormat::AuthLog => Box::new(auth_log::AuthLogSource::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// JSON lines
// ---------------------------------------------------------------------------

/// Reads `RawLoginEvent` records, one per line. Blank lines are skipped.
pub struct JsonLinesSource;

impl LogSource for JsonLinesSource {
    fn name(&self) -> &str {
        "json-lines"
    }

    fn parse_line(&self, line: &str) -> ShieldResult<Option<LoginEvent>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let raw: RawLoginEvent = serde_json::from_str(line)
            .map_err(|e| ShieldError::InvalidEvent(format!("malformed JSON record: {}", e)))?;
        LoginEvent::try_from(raw).map(Some)
    }
}

// ---------------------------------------------------------------------------
// File reading
// ---------------------------------------------------------------------------

/// Events read from one file, plus a count of lines that failed validation.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub events: Vec<LoginEvent>,
    pub invalid_lines: usize,
}

/// Read every line of `path` through `source`.
///
/// Invalid lines are logged and counted; they do not stop the read. An
/// unreadable file is an error.
pub fn read_events(source: &dyn LogSource, path: &Path) -> ShieldResult<ParsedLog> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut parsed = ParsedLog::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        match source.parse_line(&line) {
            Ok(Some(event)) => parsed.events.push(event),
            Ok(None) => {}
            Err(e) => {
                log::warn!(
                    "Skipping {} line {} of {}: {}",
                    source.name(),
                    idx + 1,
                    path.display(),
                    e
                );
                parsed.invalid_lines += 1;
            }
        }
    }

    log::info!(
        "Read {} events from {} via {} ({} invalid lines)",
        parsed.events.len(),
        path.display(),
        source.name(),
        parsed.invalid_lines
    );
    Ok(parsed)
}
