//! Model generation commands: upload, suggest, train, automl, predict.
use std::path::Path;

use anyhow::{Context as _, Result, bail};
use chrono::Local;
use colored::Colorize;
use serde_json::{Map, Value};

use super::{Context, ProgressPrinter};
use crate::api::JobBackend;
use crate::job::JobStatus;
use crate::job::launcher::{self, AutoMlRequest, TrainRequest};
use crate::job::promotion::Promotion;
use crate::job::runner::JobRunner;
use crate::job::tracker::JobTracker;

// ---------------------------------------------------------------------------
// pulse upload
// ---------------------------------------------------------------------------

/// Upload a dataset, or copy the backend's sample dataset with `csv = None`.
pub fn run_upload(ctx: &Context, model_name: &str, csv: Option<&Path>) -> Result<()> {
    launcher::validate_model_name(model_name)?;

    let reply = match csv {
        Some(path) => ctx.client.upload_data(model_name, path)?,
        None => ctx.client.load_sample(model_name)?,
    };

    println!("{} {}", "✓".green().bold(), reply.message);
    if !reply.columns.is_empty() {
        println!("{}", "Columns".bold().cyan());
        for column in &reply.columns {
            println!("  {} {}", "·".dimmed(), column);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse suggest
// ---------------------------------------------------------------------------

/// Show the backend's feature suggestions for the active model's dataset.
pub fn run_suggest(ctx: &Context) -> Result<()> {
    let model = ctx.model(None)?;
    let suggestion = ctx.client.suggest_features(&model)?;

    println!("{}", format!("Suggested features for {model}").bold().cyan());
    println!("{}", "=".repeat(50));
    for feature in &suggestion.suggested_features {
        let corr = suggestion
            .correlations
            .get(feature)
            .map(|c| format!("{c:+.3}"))
            .unwrap_or_default();
        println!("  {} {:<32} {}", "✓".green(), feature, corr.dimmed());
    }

    let others: Vec<_> = suggestion
        .correlations
        .iter()
        .filter(|(name, _)| !suggestion.suggested_features.contains(name))
        .collect();
    if !others.is_empty() {
        println!();
        println!("{}", "Other columns".bold());
        for (name, corr) in others {
            println!("  {} {:<32} {}", "·".dimmed(), name, format!("{corr:+.3}").dimmed());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse train
// ---------------------------------------------------------------------------

/// Train a single model and follow it to the end.
pub fn run_train(
    ctx: &Context,
    model_name: &str,
    features: Vec<String>,
    epochs: u32,
    test_size: f64,
) -> Result<()> {
    let req = TrainRequest {
        model_name: model_name.to_string(),
        features,
        epochs,
        test_size,
    };
    req.validate()?;

    println!(
        "{} {} ({} epochs, {}% test)",
        "Training".bold().cyan(),
        req.model_name.bold(),
        epochs,
        test_size
    );

    let mut printer = ProgressPrinter::new();
    let mut runner = JobRunner::new(&ctx.client, &ctx.config).with_stop_signal(ctx.stop.clone());
    let tracker = runner.train(&req, |t| printer.update(t))?;

    report_outcome(&tracker)?;
    if let Some(m) = tracker.metrics() {
        println!();
        println!("{}", "Metrics".bold().cyan());
        println!("  {:<6} {:.6}", "Loss", m.loss);
        println!("  {:<6} {:.6}", "MAE", m.mae);
        println!("  {:<6} {:.6}", "R²", m.r2);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pulse automl
// ---------------------------------------------------------------------------

/// Options for `pulse automl` beyond the search grid.
#[derive(Debug, Default)]
pub struct AutoMlOptions {
    /// Use the NDJSON streaming endpoint instead of a progress socket.
    pub ndjson: bool,
    /// 1-based candidate to promote instead of the best one.
    pub pick: Option<usize>,
    /// Base name to save the chosen candidate under.
    pub save_as: Option<String>,
}

/// Run an AutoML search, show the candidates, optionally promote one.
pub fn run_automl(
    ctx: &Context,
    model_name: &str,
    features: Vec<String>,
    epochs_options: Option<Vec<u32>>,
    test_size_options: Option<Vec<f64>>,
    opts: &AutoMlOptions,
) -> Result<()> {
    let req = AutoMlRequest {
        model_name: model_name.to_string(),
        features,
        epochs_options: epochs_options
            .unwrap_or_else(|| ctx.config.automl.epochs_options.clone()),
        test_size_options: test_size_options.unwrap_or_else(|| {
            ctx.config
                .automl
                .test_size_options
                .iter()
                .map(|&t| f64::from(t))
                .collect()
        }),
    };
    req.validate()?;
    if let Some(base) = &opts.save_as {
        launcher::validate_model_name(base)?;
    }

    println!(
        "{} {} ({} combinations)",
        "AutoML".bold().cyan(),
        req.model_name.bold(),
        req.combinations()
    );

    let mut printer = ProgressPrinter::new();
    let mut runner = JobRunner::new(&ctx.client, &ctx.config).with_stop_signal(ctx.stop.clone());
    let tracker = if opts.ndjson {
        runner.automl_streamed(&req, |t| printer.update(t))?
    } else {
        runner.automl(&req, |t| printer.update(t))?
    };

    report_outcome(&tracker)?;
    if tracker.candidates().is_empty() {
        bail!("AutoML finished without candidates");
    }

    let mut promotion = Promotion::new(tracker)?;
    if let Some(pick) = opts.pick {
        if pick == 0 {
            bail!("candidates are numbered from 1");
        }
        promotion.select(pick - 1)?;
    }
    print_candidates(promotion.tracker());

    let Some(base) = &opts.save_as else {
        println!();
        println!(
            "{}",
            "Re-run with --save NAME to keep the selected candidate.".dimmed()
        );
        return Ok(());
    };

    let saved = promotion.save(&ctx.client, base, &Local::now())?;
    println!();
    println!("{} {}", "✓".green().bold(), saved.message);
    let s = &saved.summary;
    println!("  {:<10} {}", "Model".bold(), s.model_name);
    println!("  {:<10} {}", "Features".bold(), s.features.join(", "));
    println!("  {:<10} {}", "Epochs".bold(), s.epochs);
    println!("  {:<10} {}%", "Test size".bold(), s.test_size);
    println!(
        "  {:<10} loss {:.4} · MAE {:.4} · R² {:.4}",
        "Metrics".bold(),
        s.metrics.loss,
        s.metrics.mae,
        s.metrics.r2
    );
    Ok(())
}

fn print_candidates(tracker: &JobTracker) {
    let best = tracker.candidates().best_index();
    let selected = tracker.selected();

    println!();
    println!("{}", "Candidates".bold().cyan());
    println!(
        "     {:>3} {:>7} {:>6} {:>10} {:>10} {:>8}",
        "#", "Epochs", "Test%", "Loss", "MAE", "R²"
    );
    println!("  {}", "-".repeat(52));
    for (idx, c) in tracker.candidates().as_slice().iter().enumerate() {
        let marker = if selected == Some(idx) {
            "▶".green().bold()
        } else {
            " ".normal()
        };
        let line = format!(
            "{:>3} {:>7} {:>6} {:>10.4} {:>10.4} {:>8.4}",
            idx + 1,
            c.epochs,
            c.test_size,
            c.metrics.loss,
            c.metrics.mae,
            c.metrics.r2
        );
        let tag = if best == Some(idx) { " best" } else { "" };
        println!("  {marker}  {line}{}", tag.green());
    }
}

/// Print the terminal state and turn failed or cancelled jobs into errors.
fn report_outcome(tracker: &JobTracker) -> Result<()> {
    match tracker.status() {
        JobStatus::Completed => Ok(()),
        JobStatus::Cancelled => bail!("job {} was cancelled", tracker.job().job_id),
        status => bail!(
            "job {} ended as {status}: {}",
            tracker.job().job_id,
            tracker.error().unwrap_or("no details")
        ),
    }
}

// ---------------------------------------------------------------------------
// pulse predict
// ---------------------------------------------------------------------------

/// Predict PUE from `key=value` inputs, or from a random dataset row.
pub fn run_predict(ctx: &Context, inputs: &[String], example: bool, save: bool) -> Result<()> {
    let model = ctx.model(None)?;

    let values = if example {
        let summary = ctx.client.model_summary(&model)?;
        ctx.client.example_input(&model, &summary.features)?
    } else {
        parse_inputs(inputs)?
    };
    if values.is_empty() {
        bail!("no inputs given (use --set name=value or --example)");
    }

    let pue = ctx.client.predict(&model, &values, save)?;

    println!("{}", format!("Prediction for {model}").bold().cyan());
    for (name, value) in &values {
        println!("  {:<28} {}", name, value.to_string().dimmed());
    }
    println!();
    println!("  {} {}", "PUE".bold(), format!("{pue:.4}").green().bold());
    if save {
        println!("  {}", "saved to simulation history".dimmed());
    }
    Ok(())
}

/// Parse `name=value` pairs. Numeric values are sent as numbers.
fn parse_inputs(inputs: &[String]) -> Result<Map<String, Value>> {
    let mut values = Map::new();
    for pair in inputs {
        let (name, raw) = pair
            .split_once('=')
            .with_context(|| format!("expected name=value, got `{pair}`"))?;
        let name = name.trim();
        if name.is_empty() {
            bail!("empty input name in `{pair}`");
        }
        let raw = raw.trim();
        let value = raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string()));
        values.insert(name.to_string(), value);
    }
    Ok(values)
}
