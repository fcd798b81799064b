//! # Login Shield - CLI Entry Point
//!
//! Command-line interface for the login risk engine.
//!
//! Commands:
//! - `init-config` - Generate a default configuration file
//! - `evaluate`    - Evaluate a single login attempt
//! - `replay`      - Evaluate a file of attempts (JSON lines or auth.log)
//! - `blocked`     - List blocked source addresses
//! - `report`      - Summarize the event log
//! - `model-info`  - Show the loaded anomaly model

use clap::{Parser, Subcommand};
use log::{error, info};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use login_shield::dashboard::{self, DEFAULT_RECENT_LIMIT};
use login_shield::detection::{ShieldEngine, Verdict};
use login_shield::event_log::JsonlEventLog;
use login_shield::log_sources::{read_events, SourceFormat};
use login_shield::model::ModelHandle;
use login_shield::response::blocklist::{BlockStore, FileBlockStore};
use login_shield::{LoginEvent, RawLoginEvent, ShieldConfig, ShieldError, ShieldResult};

/// Login Shield - real-time risk scoring for authentication attempts.
///
/// Scores each login against an anomaly model and simple risk signals,
/// blocks high-risk source addresses and raises alerts.
#[derive(Parser, Debug)]
#[command(name = "login-shield")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "login-shield.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    InitConfig,

    /// Evaluate one login attempt and print the verdict.
    Evaluate {
        /// Account being authenticated.
        #[arg(short, long)]
        user: String,

        /// Source address of the attempt.
        #[arg(short, long)]
        ip: String,

        /// `success` or `failure`.
        #[arg(short, long)]
        status: String,

        /// Event time (RFC 3339 or `YYYY-MM-DD HH:MM:SS`, UTC). Defaults to now.
        #[arg(short, long)]
        timestamp: Option<String>,

        /// Device label (web, mobile, tablet).
        #[arg(short, long)]
        device: Option<String>,

        /// Location label (US, UK, CA).
        #[arg(short, long)]
        location: Option<String>,

        /// Print the verdict as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Evaluate every attempt in a file.
    Replay {
        /// Input file.
        path: PathBuf,

        /// Input layout; guessed from the extension when omitted.
        #[arg(short, long, value_enum)]
        format: Option<SourceFormat>,

        /// Source addresses evaluated in parallel.
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
    },

    /// List blocked source addresses.
    Blocked {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Summarize evaluated attempts from the event log.
    Report {
        /// Number of recent records to show.
        #[arg(short, long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show the anomaly model's shape.
    ModelInfo,
}

#[tokio::main]
async fn main() -> ShieldResult<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig => cmd_init_config(&cli.config),
        Commands::Evaluate {
            user,
            ip,
            status,
            timestamp,
            device,
            location,
            json,
        } => {
            let raw = RawLoginEvent {
                timestamp: Some(timestamp.unwrap_or_else(|| chrono::Utc::now().to_rfc3339())),
                user_id: Some(user),
                ip_address: Some(ip),
                login_status: Some(status),
                device_type: device,
                location,
            };
            cmd_evaluate(&cli.config, raw, json)
        }
        Commands::Replay {
            path,
            format,
            concurrency,
        } => cmd_replay(&cli.config, &path, format, concurrency).await,
        Commands::Blocked { json } => cmd_blocked(&cli.config, json),
        Commands::Report { limit, json } => cmd_report(&cli.config, limit, json),
        Commands::ModelInfo => cmd_model_info(&cli.config),
    }
}

/// Load the configuration file, or the defaults when it does not exist.
fn load_config(config_path: &Path) -> ShieldResult<ShieldConfig> {
    if config_path.exists() {
        info!("Loading configuration from: {}", config_path.display());
        ShieldConfig::from_file(config_path)
    } else {
        info!("No config file found, using defaults. Run 'init-config' to generate one.");
        Ok(ShieldConfig::default())
    }
}

/// Generate a default configuration file.
fn cmd_init_config(config_path: &Path) -> ShieldResult<()> {
    if config_path.exists() {
        return Err(ShieldError::Config(format!(
            "Configuration file already exists: {}. Remove it first or use a different path.",
            config_path.display()
        )));
    }

    ShieldConfig::write_default(config_path)?;
    println!("Default configuration written to: {}", config_path.display());
    println!();
    println!("Key settings to configure:");
    println!("  [model]   - Path to the exported anomaly model");
    println!("  [policy]  - block_threshold (85), escalation_threshold (70), gate_failure_mode");
    println!("  [storage] - Block list and event log locations");
    println!("  [alerts]  - Optional webhook_url and alert_email");

    Ok(())
}

/// Evaluate a single attempt, log it and print the verdict.
fn cmd_evaluate(config_path: &Path, raw: RawLoginEvent, json: bool) -> ShieldResult<()> {
    let config = load_config(config_path)?;
    std::fs::create_dir_all(&config.general.data_dir)?;
    let (engine, _model) = ShieldEngine::from_config(&config)?;
    let event_log = JsonlEventLog::new(config.storage.event_log_path.clone());

    let verdict = engine.evaluate_raw(raw)?;
    event_log.record(&verdict)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }
    Ok(())
}

fn print_verdict(verdict: &Verdict) {
    match verdict {
        Verdict::Rejected { source_ip, .. } => {
            println!("REJECTED  {} is on the block list", source_ip);
        }
        Verdict::Accepted { assessment } | Verdict::Blocked { assessment, .. } => {
            let event = &assessment.event;
            println!(
                "{:<9} {} user={} outcome={} score={} ({}) anomaly={:.4} failures={}",
                verdict.label().to_uppercase(),
                event.source_ip,
                event.user_id,
                event.outcome,
                assessment.risk_score,
                assessment.tier,
                assessment.anomaly_score,
                assessment.failure_count,
            );
            if let Verdict::Blocked { response, .. } = verdict {
                if !response.newly_blocked {
                    println!("          (address was already blocked)");
                }
                if !response.alert_delivered {
                    println!("          (one or more alert channels failed; see log)");
                }
            }
        }
    }
}

/// Per-worker tally for `replay`.
#[derive(Debug, Default)]
struct ReplayTally {
    accepted: usize,
    blocked: usize,
    rejected: usize,
    errors: usize,
}

impl ReplayTally {
    fn merge(&mut self, other: ReplayTally) {
        self.accepted += other.accepted;
        self.blocked += other.blocked;
        self.rejected += other.rejected;
        self.errors += other.errors;
    }
}

/// Evaluate one source's attempts in file order.
fn replay_source(engine: &ShieldEngine, event_log: &JsonlEventLog, events: &[LoginEvent]) -> ReplayTally {
    let mut tally = ReplayTally::default();
    for event in events {
        match engine.evaluate(event) {
            Ok(verdict) => {
                match verdict {
                    Verdict::Accepted { .. } => tally.accepted += 1,
                    Verdict::Blocked { .. } => tally.blocked += 1,
                    Verdict::Rejected { .. } => tally.rejected += 1,
                }
                if let Err(e) = event_log.record(&verdict) {
                    error!("Failed to append event log for {}: {}", event.source_ip, e);
                }
            }
            Err(e) => {
                error!("Evaluation failed for {} ({}): {}", event.source_ip, event.user_id, e);
                tally.errors += 1;
            }
        }
    }
    tally
}

/// Evaluate a file of attempts.
///
/// Attempts are grouped by source address; each group runs on a blocking
/// worker so one source's attempts keep their file order while different
/// sources proceed in parallel.
async fn cmd_replay(
    config_path: &Path,
    path: &Path,
    format: Option<SourceFormat>,
    concurrency: usize,
) -> ShieldResult<()> {
    let config = load_config(config_path)?;
    let format = format.unwrap_or_else(|| SourceFormat::detect(path));
    let source = format.source();
    let parsed = read_events(source.as_ref(), path)?;

    std::fs::create_dir_all(&config.general.data_dir)?;
    let (engine, _model) = ShieldEngine::from_config(&config)?;
    let engine = Arc::new(engine);
    let event_log = Arc::new(JsonlEventLog::new(config.storage.event_log_path.clone()));

    let mut order: Vec<IpAddr> = Vec::new();
    let mut by_source: HashMap<IpAddr, Vec<LoginEvent>> = HashMap::new();
    for event in parsed.events {
        let ip = event.source_ip;
        by_source
            .entry(ip)
            .or_insert_with(|| {
                order.push(ip);
                Vec::new()
            })
            .push(event);
    }
    info!(
        "Replaying {} attempts from {} sources ({} workers)",
        by_source.values().map(Vec::len).sum::<usize>(),
        order.len(),
        concurrency.max(1)
    );

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut workers = JoinSet::new();
    for ip in order {
        let Some(events) = by_source.remove(&ip) else {
            continue;
        };
        let permit = semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| ShieldError::Config(format!("replay worker pool closed: {}", e)))?;
        let engine = Arc::clone(&engine);
        let event_log = Arc::clone(&event_log);
        workers.spawn_blocking(move || {
            let _permit = permit;
            replay_source(&engine, &event_log, &events)
        });
    }

    let mut totals = ReplayTally::default();
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(tally) => totals.merge(tally),
            Err(e) => error!("Replay worker failed: {}", e),
        }
    }

    println!("Replay of {} ({:?})", path.display(), format);
    println!("  Accepted:      {}", totals.accepted);
    println!("  Blocked:       {}", totals.blocked);
    println!("  Rejected:      {}", totals.rejected);
    println!("  Errors:        {}", totals.errors);
    println!("  Invalid lines: {}", parsed.invalid_lines);
    println!("Event log: {}", event_log.path().display());

    Ok(())
}

/// List blocked addresses.
fn cmd_blocked(config_path: &Path, json: bool) -> ShieldResult<()> {
    let config = load_config(config_path)?;
    let store = FileBlockStore::open(&config.storage.block_list_path)?;
    let records = store.records()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No blocked addresses ({}).", store.path().display());
        return Ok(());
    }
    println!("{:<40} {:<26} Reason", "Address", "Blocked at");
    for record in &records {
        println!(
            "{:<40} {:<26} {}",
            record.source_ip.to_string(),
            record.blocked_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            record.reason
        );
    }
    println!("{} blocked", records.len());
    Ok(())
}

/// Summarize the event log.
fn cmd_report(config_path: &Path, limit: usize, json: bool) -> ShieldResult<()> {
    let config = load_config(config_path)?;
    let event_log = JsonlEventLog::new(config.storage.event_log_path.clone());
    let records = event_log.read_all()?;
    let summary = dashboard::summarize(&records, limit);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary.render_text());
    }
    Ok(())
}

/// Load the configured model and print its shape.
fn cmd_model_info(config_path: &Path) -> ShieldResult<()> {
    let config = load_config(config_path)?;
    let handle = ModelHandle::from_config(&config.model)?;

    match handle.info() {
        Some(info) => {
            println!("Model: {}", config.model.path.display());
            println!("  Trees:       {}", info.trees);
            println!("  Nodes:       {}", info.nodes);
            println!("  Max samples: {}", info.max_samples);
            println!("  Offset:      {:.6}", info.offset);
        }
        None => {
            println!(
                "No model loaded: {} does not exist. Evaluations will fail until it does.",
                config.model.path.display()
            );
        }
    }
    Ok(())
}
