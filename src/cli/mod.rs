//! CLI command implementations for PULSE.
//!
//! Provides subcommand handlers for:
//! - model generation: `upload`, `suggest`, `train`, `automl`, `predict`
//!   (see [`generator`])
//! - model exploration: `models`, `summary`, `export`, `delete`, `download`,
//!   `history`, `default-model`, `stats`, `ask` (see [`explorer`])
//! - `pulse jobs` — job ledger report
//! - `pulse health` — backend, config and ledger checks
//! - `pulse config show|init|set|reset` — configuration management

pub mod explorer;
pub mod generator;

use anyhow::Result;
use colored::Colorize;

use crate::analytics::logger::{self, JobLogEntry};
use crate::analytics::reporter::{self, JobStats};
use crate::api::ApiClient;
use crate::config::{self, PulseConfig};
use crate::job::JobStatus;
use crate::job::tracker::{CandidateResult, JobTracker};
use crate::session::SessionState;
use crate::stream::StopSignal;

/// Output format for report commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl OutputFormat {
    pub fn from_str_opt(s: Option<&str>) -> Self {
        match s {
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            _ => Self::Table,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared command context
// ---------------------------------------------------------------------------

/// Resolved config, API client and session for one invocation.
pub struct Context {
    pub config: PulseConfig,
    pub client: ApiClient,
    /// Fired by Ctrl-C; stops the running job or answer.
    pub stop: StopSignal,
    model_flag: Option<String>,
}

impl Context {
    pub fn new(model_flag: Option<String>) -> Self {
        let config = config::load();
        let client = ApiClient::from_config(&config);
        Self {
            config,
            client,
            stop: install_stop_handler(),
            model_flag,
        }
    }

    /// Session with the active model: `--model`, else the backend default.
    pub fn session(&self) -> SessionState {
        SessionState::resolve(self.model_flag.as_deref(), &self.client)
    }

    /// Active model, or `explicit` when a command takes one positionally.
    pub fn model(&self, explicit: Option<String>) -> Result<String> {
        if let Some(model) = explicit {
            return Ok(model);
        }
        Ok(self.session().require_model()?.to_string())
    }
}

/// Route Ctrl-C to a [`StopSignal`]. With nothing armed, the process exits
/// as it would without a handler.
fn install_stop_handler() -> StopSignal {
    let signal = StopSignal::new();
    let handler = signal.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        if !handler.stop() {
            std::process::exit(130);
        }
    }) {
        log::warn!("Ctrl-C handler not installed: {e}");
    }
    signal
}

// ---------------------------------------------------------------------------
// Progress rendering
// ---------------------------------------------------------------------------

/// Prints job progress as it changes: status text, new candidates, the
/// final state. Used as the `on_update` callback of job flows.
#[derive(Debug, Default)]
pub struct ProgressPrinter {
    last_status: Option<String>,
    candidates_shown: usize,
    final_shown: bool,
}

impl ProgressPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, tracker: &JobTracker) {
        if let Some(text) = tracker.status_text()
            && self.last_status.as_deref() != Some(text)
        {
            eprintln!("  {} {}", "›".dimmed(), text);
            self.last_status = Some(text.to_string());
        }

        let candidates = tracker.candidates().as_slice();
        for (idx, c) in candidates.iter().enumerate().skip(self.candidates_shown) {
            eprintln!(
                "  {} candidate #{} {}",
                "+".green(),
                idx + 1,
                describe_candidate(c).dimmed()
            );
        }
        self.candidates_shown = candidates.len();

        if tracker.is_terminal() && !self.final_shown {
            self.final_shown = true;
            match tracker.status() {
                JobStatus::Completed => eprintln!("  {} job completed", "✓".green().bold()),
                JobStatus::Failed => eprintln!(
                    "  {} {}",
                    "✗".red().bold(),
                    tracker.error().unwrap_or("job failed").red()
                ),
                JobStatus::Cancelled => eprintln!("  {} job cancelled", "·".yellow()),
                JobStatus::Pending | JobStatus::Running => {}
            }
        }
    }
}

fn describe_candidate(c: &CandidateResult) -> String {
    format!(
        "epochs {} · test {}% · loss {:.4} · MAE {:.4} · R² {:.4}",
        c.epochs, c.test_size, c.metrics.loss, c.metrics.mae, c.metrics.r2
    )
}

// ---------------------------------------------------------------------------
// pulse jobs
// ---------------------------------------------------------------------------

/// Show the job ledger report.
pub fn run_jobs(format: OutputFormat, days: Option<u32>) -> Result<()> {
    let stats = reporter::compute_stats(days);

    if stats.total_jobs == 0 {
        println!(
            "{}",
            "No jobs recorded yet. Run `pulse train` or `pulse automl` to see stats.".yellow()
        );
        return Ok(());
    }

    match format {
        OutputFormat::Json => print_jobs_json(&stats)?,
        OutputFormat::Csv => print_jobs_csv(&stats),
        OutputFormat::Table => print_jobs_table(&stats),
    }

    Ok(())
}

fn print_jobs_table(stats: &JobStats) {
    println!("{}", "PULSE Job Report".bold().cyan());
    println!("{}", "=".repeat(60));
    println!();

    println!("  {} {}", "Total jobs:  ".bold(), stats.total_jobs);
    println!(
        "  {} {} training, {} AutoML",
        "Kinds:       ".bold(),
        stats.training_jobs,
        stats.automl_jobs
    );
    println!(
        "  {} {}",
        "Avg duration:".bold(),
        format_duration(stats.avg_duration_ms)
    );
    println!();

    let counts = &stats.status_counts;
    println!("{}", "Outcomes".bold().cyan());
    println!(
        "  Completed: {} ({:.0}%)  Failed: {} ({:.0}%)  Cancelled: {} ({:.0}%)",
        counts.completed,
        counts.pct(counts.completed),
        counts.failed,
        counts.pct(counts.failed),
        counts.cancelled,
        counts.pct(counts.cancelled),
    );
    println!();

    if !stats.model_stats.is_empty() {
        println!("{}", "Models by Best R²".bold().cyan());
        println!("  {:<28} {:>5} {:>8}  Last", "Model", "Runs", "Best R²");
        println!("  {}", "-".repeat(56));
        for (i, m) in stats.model_stats.iter().take(15).enumerate() {
            let line = format!(
                "  {:<28} {:>5} {:>8}  {}",
                truncate(&m.model_name, 28),
                m.runs,
                m.best_r2.map(|r| format!("{r:.4}")).unwrap_or_else(|| "-".into()),
                m.last_status,
            );
            if i % 2 == 0 {
                println!("{line}");
            } else {
                println!("{}", line.dimmed());
            }
        }
        println!();
    }

    println!("{}", "Recent Jobs".bold().cyan());
    for entry in &stats.recent {
        println!(
            "  {} {:<10} {:<7} {:<24} {}",
            entry.timestamp.get(..19).unwrap_or(entry.timestamp.as_str()).dimmed(),
            colorize_status(entry.status),
            entry.kind,
            truncate(&entry.model_name, 24),
            entry.error.as_deref().unwrap_or_default().red(),
        );
    }
}

fn print_jobs_json(stats: &JobStats) -> Result<()> {
    let value = serde_json::json!({
        "total_jobs": stats.total_jobs,
        "training_jobs": stats.training_jobs,
        "automl_jobs": stats.automl_jobs,
        "avg_duration_ms": stats.avg_duration_ms,
        "outcomes": {
            "completed": stats.status_counts.completed,
            "failed": stats.status_counts.failed,
            "cancelled": stats.status_counts.cancelled,
        },
        "models": stats.model_stats.iter().map(|m| serde_json::json!({
            "model_name": m.model_name,
            "runs": m.runs,
            "best_r2": m.best_r2,
            "last_status": m.last_status,
        })).collect::<Vec<_>>(),
        "recent": stats.recent,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_jobs_csv(stats: &JobStats) {
    println!("timestamp,job_id,kind,model_name,status,candidates,best_r2,duration_ms,error");
    for e in &stats.recent {
        println!("{}", csv_row(e));
    }
}

fn csv_row(e: &JobLogEntry) -> String {
    format!(
        "{},{},{},{},{},{},{},{},{}",
        e.timestamp,
        e.job_id,
        e.kind,
        e.model_name,
        e.status,
        e.candidates,
        e.best_r2.map(|r| format!("{r:.4}")).unwrap_or_default(),
        e.duration_ms,
        csv_escape(e.error.as_deref().unwrap_or_default()),
    )
}

// ---------------------------------------------------------------------------
// pulse health
// ---------------------------------------------------------------------------

/// Check backend reachability, config files and the job ledger.
pub fn run_health(ctx: &Context) -> Result<()> {
    println!("{}", "PULSE Health Check".bold().cyan());
    println!("{}", "=".repeat(40));

    let (global_exists, project_exists) = config_files_present();
    print_health_item(
        "Global config",
        global_exists,
        if global_exists {
            "~/.pulse/config.toml found"
        } else {
            "not found (run `pulse config init` to create)"
        },
    );
    print_health_item(
        "Project config",
        project_exists,
        if project_exists {
            ".pulse.toml found"
        } else {
            "none (optional)"
        },
    );

    let backend_ok = ctx.client.is_healthy();
    print_health_item(
        "Backend",
        backend_ok,
        &if backend_ok {
            format!("reachable at {}", ctx.client.url(""))
        } else {
            format!("not reachable at {} (is the API running?)", ctx.client.url(""))
        },
    );

    if backend_ok {
        let default_model = ctx.client.default_model().ok().flatten();
        print_health_item(
            "Default model",
            default_model.is_some(),
            default_model.as_deref().unwrap_or("not set"),
        );
    }

    print_health_item(
        "Progress transport",
        true,
        &format!(
            "{} (poll every {}ms)",
            ctx.config.stream.transport, ctx.config.stream.poll_interval_ms
        ),
    );
    print_health_item("LLM engine", true, ctx.config.llm.engine.as_str());

    let log_exists = logger::job_log_path().is_some_and(|p| p.exists());
    let detail = if !ctx.config.logging.job_log {
        "disabled".to_string()
    } else if log_exists {
        format!("{} entries", logger::read_all_entries().len())
    } else {
        "no jobs recorded yet".to_string()
    };
    print_health_item("Job ledger", ctx.config.logging.job_log, &detail);

    Ok(())
}

/// Whether the global and project config files exist.
fn config_files_present() -> (bool, bool) {
    (
        config::global_config_file().is_some_and(|p| p.exists()),
        config::project_config_file().is_some_and(|p| p.exists()),
    )
}

fn print_health_item(name: &str, ok: bool, detail: &str) {
    let status = if ok {
        "✓".green().bold()
    } else {
        "✗".red().bold()
    };
    println!("  {} {:<20} {}", status, name, detail.dimmed());
}

// ---------------------------------------------------------------------------
// pulse config show | init | set | reset
// ---------------------------------------------------------------------------

/// Show the effective (merged) configuration as TOML.
pub fn run_config_show() -> Result<()> {
    let toml_str = config::show_effective_config()?;
    println!("{}", "Effective PULSE Configuration".bold().cyan());
    println!("{}", "=".repeat(50));
    println!();
    println!("{toml_str}");

    let (global_exists, project_exists) = config_files_present();
    println!("{}", "Sources (highest priority last):".dimmed());
    println!("  {} built-in defaults", "·".dimmed());
    print_source("~/.pulse/config.toml", global_exists);
    print_source(".pulse.toml", project_exists);
    println!("  {} {}", "·".dimmed(), "PULSE_* environment variables".dimmed());

    Ok(())
}

fn print_source(name: &str, exists: bool) {
    if exists {
        println!("  {} {}", "✓".green(), name.dimmed());
    } else {
        println!("  {} {}", "·".dimmed(), format!("{name} (not found)").dimmed());
    }
}

/// Initialize a default config file at `~/.pulse/config.toml`.
pub fn run_config_init(force: bool) -> Result<()> {
    let path = config::init_config(force)?;
    println!("{} Config written to {}", "✓".green().bold(), path.display());
    println!("  {}", "Set api.base_url to point at your backend.".dimmed());
    Ok(())
}

/// Set a single configuration value in the global config file.
pub fn run_config_set(key: &str, value: &str) -> Result<()> {
    config::set_config_value(key, value)?;
    println!("{} Set {} = {}", "✓".green().bold(), key.bold(), value);
    Ok(())
}

/// Reset configuration to defaults.
pub fn run_config_reset() -> Result<()> {
    let path = config::reset_config()?;
    println!(
        "{} Config reset to defaults at {}",
        "✓".green().bold(),
        path.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

/// `850ms`, `12.3s`, `4m 05s`.
fn format_duration(ms: u64) -> String {
    match ms {
        0..=999 => format!("{ms}ms"),
        1_000..=59_999 => format!("{:.1}s", ms as f64 / 1000.0),
        _ => format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1000),
    }
}

/// Truncate a string to `max_len` characters, appending "…" if truncated.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(1)).collect();
        format!("{kept}…")
    }
}

fn csv_escape(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn colorize_status(status: JobStatus) -> colored::ColoredString {
    let s = status.to_string();
    match status {
        JobStatus::Completed => s.green(),
        JobStatus::Failed => s.red(),
        JobStatus::Cancelled => s.yellow(),
        JobStatus::Pending | JobStatus::Running => s.normal(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(850), "850ms");
        assert_eq!(format_duration(12_345), "12.3s");
        assert_eq!(format_duration(245_000), "4m 05s");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-model-name", 8), "a-very-…");
        assert_eq!(truncate("ñandú-dc", 5), "ñand…");
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("error: a, b"), "\"error: a, b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::from_str_opt(Some("json")), OutputFormat::Json);
        assert_eq!(OutputFormat::from_str_opt(Some("csv")), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_str_opt(None), OutputFormat::Table);
    }
}
