use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};

use pulse::api::types::HistoryKind;
use pulse::cli::{self, Context, OutputFormat, explorer, generator};
use pulse::config::LlmEngine;

#[derive(Debug, Parser)]
#[command(name = "pulse")]
#[command(about = "Train, explore and query PUE prediction models")]
struct App {
    /// Model to act on (defaults to the backend's default model)
    #[arg(long, global = true)]
    model: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Upload a `;`-separated CSV dataset for a new model
    Upload {
        /// Name of the model the dataset belongs to
        name: String,
        /// CSV file to upload
        #[arg(required_unless_present = "sample")]
        csv: Option<PathBuf>,
        /// Use the backend's bundled sample dataset instead of a file
        #[arg(long, conflicts_with = "csv")]
        sample: bool,
    },
    /// Suggest input features for the active model's dataset
    Suggest,
    /// Train a single model and follow its progress
    Train {
        /// Name of the model (its dataset must be uploaded)
        name: String,
        /// Comma-separated input features
        #[arg(long, value_delimiter = ',', required = true)]
        features: Vec<String>,
        #[arg(long, default_value = "100")]
        epochs: u32,
        /// Test split in percent
        #[arg(long, default_value = "20")]
        test_size: f64,
    },
    /// Train every epochs/test-size combination and pick the best
    Automl {
        name: String,
        #[arg(long, value_delimiter = ',', required = true)]
        features: Vec<String>,
        /// Comma-separated epoch counts (default from config)
        #[arg(long, value_delimiter = ',')]
        epochs: Option<Vec<u32>>,
        /// Comma-separated test splits in percent (default from config)
        #[arg(long, value_delimiter = ',')]
        test_sizes: Option<Vec<f64>>,
        /// Stream candidates over the response body instead of a socket
        #[arg(long)]
        ndjson: bool,
        /// Candidate number to keep instead of the best one
        #[arg(long)]
        pick: Option<usize>,
        /// Save the chosen candidate as NAME-<timestamp>
        #[arg(long, value_name = "NAME")]
        save: Option<String>,
    },
    /// Predict PUE with the active model
    Predict {
        /// Input value as name=value (repeatable)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        inputs: Vec<String>,
        /// Use a random row of the model's dataset as input
        #[arg(long, conflicts_with = "inputs")]
        example: bool,
        /// Record the prediction in the simulation history
        #[arg(long)]
        save: bool,
    },
    /// Ask the LLM assistant about the active model
    Ask {
        /// The question
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
        /// Engine: phi, tinyllama, llama2, mistral, gemma
        #[arg(long)]
        engine: Option<String>,
    },
    /// List trained models
    Models,
    /// Show a model's summary
    Summary {
        name: Option<String>,
        /// Output format: table (default), json
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Export a model's summary as `{model}_summary.json`
    Export {
        name: Option<String>,
        /// Directory to write into
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Delete a model with its files and history
    Delete {
        name: String,
        #[arg(long)]
        yes: bool,
    },
    /// Download a model bundle as a zip
    Download {
        name: Option<String>,
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// Show or edit the active model's history
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,
    },
    /// Show or set the backend's default model
    DefaultModel {
        #[command(subcommand)]
        action: Option<DefaultModelAction>,
    },
    /// Show backend usage and accuracy statistics
    Stats {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Show the job ledger report
    Jobs {
        /// Output format: table (default), json, csv
        #[arg(long, default_value = "table")]
        format: String,
        /// Only include the last N days of data
        #[arg(long)]
        days: Option<u32>,
    },
    /// Check system health: backend, config, job ledger
    Health,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Debug, Subcommand)]
enum HistoryAction {
    /// Show simulations and assistant questions (default)
    Show {
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Delete every assistant question
    ClearLlm,
    /// Delete every saved simulation
    ClearSimulations,
    /// Delete one entry by timestamp
    DeleteItem {
        /// simulation or llm
        #[arg(long)]
        kind: String,
        #[arg(long)]
        timestamp: String,
    },
}

#[derive(Debug, Subcommand)]
enum DefaultModelAction {
    /// Print the default model (default)
    Get,
    Set { name: String },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Show effective configuration (default)
    Show,
    /// Write a default config file to ~/.pulse/config.toml
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Set a config value by dotted key (e.g. stream.transport poll)
    Set { key: String, value: String },
    /// Reset configuration to defaults
    Reset,
}

fn parse_history_kind(val: &str) -> Result<HistoryKind> {
    match val.to_ascii_lowercase().as_str() {
        "simulation" | "simulations" | "sim" => Ok(HistoryKind::Simulation),
        "llm" | "question" | "questions" => Ok(HistoryKind::Llm),
        other => Err(anyhow!("unknown history kind `{other}` (use simulation or llm)")),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let app = App::parse();
    let ctx = Context::new(app.model);

    match app.command {
        Commands::Upload { name, csv, sample } => {
            let csv = if sample { None } else { csv };
            generator::run_upload(&ctx, &name, csv.as_deref())
        }
        Commands::Suggest => generator::run_suggest(&ctx),
        Commands::Train {
            name,
            features,
            epochs,
            test_size,
        } => generator::run_train(&ctx, &name, features, epochs, test_size),
        Commands::Automl {
            name,
            features,
            epochs,
            test_sizes,
            ndjson,
            pick,
            save,
        } => {
            let opts = generator::AutoMlOptions {
                ndjson,
                pick,
                save_as: save,
            };
            generator::run_automl(&ctx, &name, features, epochs, test_sizes, &opts)
        }
        Commands::Predict {
            inputs,
            example,
            save,
        } => generator::run_predict(&ctx, &inputs, example, save),
        Commands::Ask { query, engine } => {
            let engine = match engine {
                Some(val) => Some(
                    LlmEngine::parse(&val).ok_or_else(|| anyhow!("unknown LLM engine `{val}`"))?,
                ),
                None => None,
            };
            explorer::run_ask(&ctx, engine, &query.join(" "))
        }
        Commands::Models => explorer::run_models(&ctx),
        Commands::Summary { name, format } => {
            explorer::run_summary(&ctx, name, OutputFormat::from_str_opt(Some(&format)))
        }
        Commands::Export { name, dir } => explorer::run_export(&ctx, name, &dir),
        Commands::Delete { name, yes } => explorer::run_delete(&ctx, &name, yes),
        Commands::Download { name, out } => explorer::run_download(&ctx, name, out),
        Commands::History { action } => match action {
            None => explorer::run_history_show(&ctx, OutputFormat::Table),
            Some(HistoryAction::Show { format }) => {
                explorer::run_history_show(&ctx, OutputFormat::from_str_opt(Some(&format)))
            }
            Some(HistoryAction::ClearLlm) => explorer::run_history_clear(&ctx, HistoryKind::Llm),
            Some(HistoryAction::ClearSimulations) => {
                explorer::run_history_clear(&ctx, HistoryKind::Simulation)
            }
            Some(HistoryAction::DeleteItem { kind, timestamp }) => {
                explorer::run_history_delete(&ctx, parse_history_kind(&kind)?, &timestamp)
            }
        },
        Commands::DefaultModel { action } => match action {
            None | Some(DefaultModelAction::Get) => explorer::run_default_model_get(&ctx),
            Some(DefaultModelAction::Set { name }) => explorer::run_default_model_set(&ctx, &name),
        },
        Commands::Stats { format } => {
            explorer::run_stats(&ctx, OutputFormat::from_str_opt(Some(&format)))
        }
        Commands::Jobs { format, days } => {
            cli::run_jobs(OutputFormat::from_str_opt(Some(&format)), days)
        }
        Commands::Health => cli::run_health(&ctx),
        Commands::Config { action } => match action {
            None | Some(ConfigAction::Show) => cli::run_config_show(),
            Some(ConfigAction::Init { force }) => cli::run_config_init(force),
            Some(ConfigAction::Set { key, value }) => cli::run_config_set(&key, &value),
            Some(ConfigAction::Reset) => cli::run_config_reset(),
        },
    }
}
