//! Model exploration commands: listing, summaries, history, settings and the
//! LLM assistant.
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use colored::Colorize;

use super::{Context, OutputFormat, csv_escape, truncate};
use crate::api::JobBackend;
use crate::api::types::{DashboardStats, History, HistoryKind, ModelSummary};
use crate::config::LlmEngine;
use crate::llm::{self, AnswerStatus, CANCELLED_MARKER};
use crate::session::SessionState;
use crate::stream::CancelToken;
use crate::summary;

// ---------------------------------------------------------------------------
// pulse models
// ---------------------------------------------------------------------------

pub fn run_models(ctx: &Context) -> Result<()> {
    let models = ctx.client.list_models()?;
    if models.is_empty() {
        println!(
            "{}",
            "No trained models yet. Run `pulse train` or `pulse automl`.".yellow()
        );
        return Ok(());
    }

    let default_model = ctx.client.default_model().ok().flatten();
    println!("{}", "Models".bold().cyan());
    for name in &models {
        if default_model.as_deref() == Some(name.as_str()) {
            println!("  {} {} {}", "★".yellow(), name.bold(), "(default)".dimmed());
        } else {
            println!("  {} {}", "·".dimmed(), name);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse summary / export
// ---------------------------------------------------------------------------

pub fn run_summary(ctx: &Context, model: Option<String>, format: OutputFormat) -> Result<()> {
    let model = ctx.model(model)?;
    let summary = ctx.client.model_summary(&model)?;

    match format {
        OutputFormat::Json => {
            let exported = summary::ExportedSummary::from(&summary);
            println!("{}", serde_json::to_string_pretty(&exported)?);
        }
        OutputFormat::Csv => {
            println!("{SUMMARY_CSV_HEADER}");
            println!("{}", summary_csv_row(&summary));
        }
        OutputFormat::Table => print_summary(&summary),
    }
    Ok(())
}

const SUMMARY_CSV_HEADER: &str = "model_name,features,epochs,test_size,loss,mae,r2";

/// One CSV row; features are joined with `;`.
fn summary_csv_row(s: &ModelSummary) -> String {
    format!(
        "{},{},{},{},{},{},{}",
        csv_escape(&s.model_name),
        csv_escape(&s.features.join(";")),
        s.epochs,
        s.test_size,
        s.metrics.loss,
        s.metrics.mae,
        s.metrics.r2
    )
}

fn print_summary(s: &ModelSummary) {
    println!("{}", format!("Model {}", s.model_name).bold().cyan());
    println!("{}", "=".repeat(50));
    println!("  {:<12} {}", "Features".bold(), s.features.join(", "));
    println!("  {:<12} {}", "Epochs".bold(), s.epochs);
    println!("  {:<12} {}%", "Test size".bold(), s.test_size);
    println!();
    println!("{}", "Metrics".bold().cyan());
    println!("  {:<6} {:.6}", "Loss", s.metrics.loss);
    println!("  {:<6} {:.6}", "MAE", s.metrics.mae);
    println!("  {:<6} {:.6}", "R²", s.metrics.r2);
    println!();
    println!(
        "  {}",
        format!(
            "{} simulations, {} assistant questions",
            s.simulations.len(),
            s.llm_history.len()
        )
        .dimmed()
    );
}

/// Write `{model}_summary.json` into `dir`.
pub fn run_export(ctx: &Context, model: Option<String>, dir: &Path) -> Result<()> {
    let model = ctx.model(model)?;
    let summary = ctx.client.model_summary(&model)?;
    let path = summary::export_summary(&summary, dir)?;
    println!("{} Summary written to {}", "✓".green().bold(), path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse delete / download
// ---------------------------------------------------------------------------

pub fn run_delete(ctx: &Context, model: &str, yes: bool) -> Result<()> {
    if !yes {
        bail!("deleting `{model}` removes its files and history; pass --yes to confirm");
    }
    let reply = ctx.client.delete_model(model)?;
    println!("{} {}", "✓".green().bold(), reply.message);
    Ok(())
}

pub fn run_download(ctx: &Context, model: Option<String>, out: Option<PathBuf>) -> Result<()> {
    let model = ctx.model(model)?;
    let dest = out.unwrap_or_else(|| PathBuf::from(format!("{model}.zip")));
    let bytes = ctx.client.download_model(&model, &dest)?;
    println!(
        "{} Downloaded {} ({} bytes) to {}",
        "✓".green().bold(),
        model.bold(),
        bytes,
        dest.display()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse history
// ---------------------------------------------------------------------------

pub fn run_history_show(ctx: &Context, format: OutputFormat) -> Result<()> {
    let model = ctx.model(None)?;
    let history = ctx.client.history(&model)?;

    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "simulations": history.simulations,
            "llm_questions": history.llm_questions,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }
    print_history(&model, &history);
    Ok(())
}

fn print_history(model: &str, history: &History) {
    println!("{}", format!("History for {model}").bold().cyan());
    println!("{}", "=".repeat(50));

    println!("{}", "Simulations".bold());
    if history.simulations.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for sim in &history.simulations {
        let inputs = sim
            .inputs
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "  {} PUE {:.4}  {}",
            sim.timestamp.dimmed(),
            sim.pue,
            truncate(&inputs, 60).dimmed()
        );
    }

    println!();
    println!("{}", "Assistant questions".bold());
    if history.llm_questions.is_empty() {
        println!("  {}", "none".dimmed());
    }
    for q in &history.llm_questions {
        println!(
            "  {} [{}] {}",
            q.timestamp.dimmed(),
            q.ollama_model,
            truncate(&q.query, 60)
        );
    }
}

pub fn run_history_clear(ctx: &Context, kind: HistoryKind) -> Result<()> {
    let model = ctx.model(None)?;
    let reply = match kind {
        HistoryKind::Simulation => ctx.client.clear_simulations(&model)?,
        HistoryKind::Llm => ctx.client.clear_llm_history(&model)?,
    };
    println!("{} {}", "✓".green().bold(), reply.message);
    Ok(())
}

pub fn run_history_delete(ctx: &Context, kind: HistoryKind, timestamp: &str) -> Result<()> {
    let model = ctx.model(None)?;
    let reply = ctx.client.delete_history_item(&model, kind, timestamp)?;
    println!("{} {}", "✓".green().bold(), reply.message);
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse default-model
// ---------------------------------------------------------------------------

pub fn run_default_model_get(ctx: &Context) -> Result<()> {
    match ctx.client.default_model()? {
        Some(name) => println!("{name}"),
        None => println!("{}", "No default model set.".yellow()),
    }
    Ok(())
}

pub fn run_default_model_set(ctx: &Context, model: &str) -> Result<()> {
    let reply = ctx.client.set_default_model(model)?;
    println!("{} {}", "✓".green().bold(), reply.message);
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse stats
// ---------------------------------------------------------------------------

pub fn run_stats(ctx: &Context, format: OutputFormat) -> Result<()> {
    let stats = ctx.client.dashboard_stats()?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Csv => {
            println!("model,r2");
            for m in &stats.accuracy_by_model {
                println!("{},{}", csv_escape(&m.model), m.r2);
            }
        }
        OutputFormat::Table => print_stats(&stats),
    }
    Ok(())
}

fn print_stats(stats: &DashboardStats) {
    println!("{}", "PULSE Dashboard".bold().cyan());
    println!("{}", "=".repeat(50));
    println!("  {} {}", "Models:       ".bold(), stats.models_count);
    println!("  {} {:.4}", "Avg R²:       ".bold(), stats.avg_accuracy);
    println!("  {} {}", "Predictions:  ".bold(), stats.total_predictions);
    println!("  {} {}", "LLM questions:".bold(), stats.llm_questions);

    if !stats.accuracy_by_model.is_empty() {
        println!();
        println!("{}", "Accuracy by model".bold().cyan());
        for m in &stats.accuracy_by_model {
            println!("  {:<32} {}", truncate(&m.model, 32), r2_bar(m.r2));
        }
    }

    if !stats.predictions_by_month.is_empty() {
        println!();
        println!("{}", "Predictions per month".bold().cyan());
        for (month, count) in &stats.predictions_by_month {
            println!("  {month}  {count:>6}");
        }
    }
}

/// `0.9512 ████████████████████` style bar, 20 cells for R² = 1.
fn r2_bar(r2: f64) -> String {
    let cells = (r2.clamp(0.0, 1.0) * 20.0).round() as usize;
    format!("{r2:.4} {}", "█".repeat(cells))
}

// ---------------------------------------------------------------------------
// pulse ask
// ---------------------------------------------------------------------------

/// Ask the assistant about the active model, streaming the answer to stdout.
pub fn run_ask(ctx: &Context, engine: Option<LlmEngine>, query: &str) -> Result<()> {
    let session: SessionState = ctx.session();
    let engine = engine.unwrap_or(ctx.config.llm.engine);
    let cancel = CancelToken::new();
    ctx.stop.arm(&cancel);

    let mut stdout = std::io::stdout().lock();
    let outcome = llm::ask(&ctx.client, &session, engine, query, &cancel, |fragment| {
        let _ = stdout.write_all(fragment.as_bytes());
        let _ = stdout.flush();
    });
    ctx.stop.disarm();
    drop(stdout);
    let outcome = outcome?;

    if outcome.answer.status() == &AnswerStatus::Cancelled {
        print!("{}", CANCELLED_MARKER.yellow());
    }
    println!();

    match outcome.answer.status() {
        AnswerStatus::Interrupted(reason) => {
            eprintln!("{} answer interrupted: {reason}", "✗".red().bold());
        }
        _ => eprintln!(
            "{}",
            format!(
                "{} · {} · {}ms",
                outcome.engine, outcome.model_name, outcome.latency_ms
            )
            .dimmed()
        ),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::tracker::Metrics;

    #[test]
    fn summary_csv_row_matches_header() {
        let summary = ModelSummary {
            model_name: "dc1, hall B".into(),
            features: vec!["it_load".into(), "outdoor_temp".into()],
            epochs: 200,
            test_size: 30.0,
            metrics: Metrics {
                loss: 0.0131,
                mae: 0.0672,
                r2: 0.9512,
            },
            simulations: Vec::new(),
            llm_history: Vec::new(),
        };
        let row = summary_csv_row(&summary);
        assert_eq!(row, "\"dc1, hall B\",it_load;outdoor_temp,200,30,0.0131,0.0672,0.9512");
        assert_eq!(SUMMARY_CSV_HEADER.split(',').count(), 7);
    }

    #[test]
    fn r2_bar_is_clamped() {
        assert_eq!(r2_bar(0.5), format!("0.5000 {}", "█".repeat(10)));
        assert_eq!(r2_bar(-0.2), "-0.2000 ");
        assert_eq!(r2_bar(1.3), format!("1.3000 {}", "█".repeat(20)));
    }
}
