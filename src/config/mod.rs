/// Configuration system for the PULSE client.
///
/// Provides a layered configuration hierarchy:
///
/// 1. **Built-in defaults**: [`schema::PulseConfig::default()`]
/// 2. **User global config**: `~/.pulse/config.toml`
/// 3. **Project local config**: `.pulse.toml` in the current working directory
/// 4. **Environment variables**: `PULSE_*` overrides (highest precedence)
///
/// The backend origin is the only value most users ever set:
///
/// ```rust,ignore
/// use pulse::config;
///
/// let cfg = config::load();
/// let client = pulse::api::ApiClient::from_config(&cfg);
/// ```
pub mod schema;

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub use schema::{LlmEngine, PulseConfig, Transport};

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the fully resolved configuration.
///
/// Merges all layers in order: defaults → global TOML → project TOML → env
/// vars.
pub fn load() -> PulseConfig {
    let mut config = PulseConfig::default();

    if let Some(global) = load_toml_file(global_config_path()) {
        merge_config(&mut config, &global);
    }

    if let Some(project) = load_toml_file(project_config_path()) {
        merge_config(&mut config, &project);
    }

    apply_env_overrides(&mut config);

    config
}

/// Load a TOML config file from the given path (if it exists).
///
/// Malformed files are ignored with a warning; the client keeps working on
/// the previous layer.
fn load_toml_file(path: Option<PathBuf>) -> Option<PulseConfig> {
    let path = path?;
    let content = fs::read_to_string(&path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("ignoring malformed config {}: {err}", path.display());
            None
        }
    }
}

/// Merge a loaded config layer into the base config.
///
/// Each file is deserialized with `serde(default)`, so unset keys already
/// hold the built-in defaults and the overlay can replace the base wholesale.
fn merge_config(base: &mut PulseConfig, overlay: &PulseConfig) {
    *base = overlay.clone();
}

// ---------------------------------------------------------------------------
// File paths
// ---------------------------------------------------------------------------

/// Path to the user global config: `~/.pulse/config.toml`.
fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pulse").join("config.toml"))
}

/// Path to the project local config: `.pulse.toml` in the current directory.
fn project_config_path() -> Option<PathBuf> {
    std::env::current_dir()
        .ok()
        .map(|cwd| cwd.join(".pulse.toml"))
}

/// Return the path to the global config file for display/init purposes.
pub fn global_config_file() -> Option<PathBuf> {
    global_config_path()
}

/// Return the path to the project config file for display purposes.
pub fn project_config_file() -> Option<PathBuf> {
    project_config_path()
}

// ---------------------------------------------------------------------------
// Environment variable overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides (highest precedence layer).
///
/// Supported variables:
/// - `PULSE_API_URL`: backend origin
/// - `PULSE_API_PREFIX`: REST path prefix
/// - `PULSE_TIMEOUT_MS`: REST timeout
/// - `PULSE_TRANSPORT`: `socket` or `poll`
/// - `PULSE_POLL_INTERVAL_MS`: polling interval
/// - `PULSE_LLM_ENGINE`: default LLM engine
/// - `PULSE_JOB_LOG`: job ledger on/off
fn apply_env_overrides(config: &mut PulseConfig) {
    if let Ok(val) = std::env::var("PULSE_API_URL")
        && !val.is_empty()
    {
        config.api.base_url = val;
    }
    if let Ok(val) = std::env::var("PULSE_API_PREFIX") {
        config.api.prefix = val;
    }
    if let Ok(val) = std::env::var("PULSE_TIMEOUT_MS")
        && let Ok(ms) = val.parse::<u64>()
    {
        config.api.timeout_ms = ms;
    }

    if let Ok(val) = std::env::var("PULSE_TRANSPORT")
        && let Some(transport) = parse_transport(&val)
    {
        config.stream.transport = transport;
    }
    if let Ok(val) = std::env::var("PULSE_POLL_INTERVAL_MS")
        && let Ok(ms) = val.parse::<u64>()
    {
        config.stream.poll_interval_ms = ms;
    }

    if let Ok(val) = std::env::var("PULSE_LLM_ENGINE")
        && let Some(engine) = LlmEngine::parse(&val)
    {
        config.llm.engine = engine;
    }

    if let Ok(val) = std::env::var("PULSE_JOB_LOG") {
        config.logging.job_log = is_truthy(&val);
    }
}

/// Check if a string value represents a truthy boolean.
fn is_truthy(val: &str) -> bool {
    matches!(
        val.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Parse a transport string.
pub fn parse_transport(val: &str) -> Option<Transport> {
    match val.to_ascii_lowercase().as_str() {
        "socket" | "ws" | "websocket" => Some(Transport::Socket),
        "poll" | "polling" => Some(Transport::Poll),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Config init / set / reset
// ---------------------------------------------------------------------------

/// Write the default annotated config to `~/.pulse/config.toml`.
///
/// Returns an error if the file already exists (use `force = true` to
/// overwrite).
pub fn init_config(force: bool) -> Result<PathBuf> {
    let path = global_config_path().context("could not determine home directory")?;

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create ~/.pulse/ directory")?;
    }

    fs::write(&path, PulseConfig::default_toml()).context("failed to write config file")?;

    Ok(path)
}

/// Set a single config key to a value in the global config file.
///
/// Supports dotted keys like `api.base_url` or `stream.transport`.
pub fn set_config_value(key: &str, value: &str) -> Result<()> {
    let path = global_config_path().context("could not determine home directory")?;

    let content = if path.exists() {
        fs::read_to_string(&path).context("failed to read config file")?
    } else {
        toml::to_string_pretty(&PulseConfig::default())
            .context("failed to serialize default config")?
    };

    let mut root: toml::Value =
        toml::from_str(&content).context("failed to parse config as TOML value")?;
    set_toml_value(&mut root, key, value)?;

    // Reject values that would no longer deserialize (e.g. an unknown transport).
    let updated = toml::to_string_pretty(&root).context("failed to serialize config")?;
    toml::from_str::<PulseConfig>(&updated)
        .with_context(|| format!("invalid value '{value}' for '{key}'"))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("failed to create config directory")?;
    }
    fs::write(&path, updated).context("failed to write config file")?;

    Ok(())
}

/// Set a value in a TOML value tree using a dotted key path.
fn set_toml_value(root: &mut toml::Value, key: &str, raw_value: &str) -> Result<()> {
    let parts: Vec<&str> = key.split('.').collect();
    if parts.iter().any(|p| p.is_empty()) {
        anyhow::bail!("invalid config key: '{key}'");
    }

    let mut current = root;
    for &part in &parts[..parts.len() - 1] {
        current = current
            .get_mut(part)
            .with_context(|| format!("config key not found: section '{part}' in '{key}'"))?;
    }

    let leaf = parts[parts.len() - 1];
    let table = current.as_table_mut().with_context(|| {
        format!(
            "expected table at '{}'",
            key.rsplit_once('.').map(|(s, _)| s).unwrap_or("")
        )
    })?;

    let new_value = match table.get(leaf) {
        Some(toml::Value::Boolean(_)) => toml::Value::Boolean(is_truthy(raw_value)),
        Some(toml::Value::Integer(_)) => {
            let n: i64 = raw_value
                .parse()
                .with_context(|| format!("expected integer for '{key}', got '{raw_value}'"))?;
            toml::Value::Integer(n)
        }
        Some(toml::Value::Array(_)) => {
            // Comma-separated integers, e.g. "50,100,200"
            let items = raw_value
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<i64>()
                        .map(toml::Value::Integer)
                        .with_context(|| format!("expected integer list for '{key}'"))
                })
                .collect::<Result<Vec<_>>>()?;
            toml::Value::Array(items)
        }
        Some(_) => toml::Value::String(raw_value.to_string()),
        None => anyhow::bail!("unknown config key: '{key}'"),
    };

    table.insert(leaf.to_string(), new_value);
    Ok(())
}

/// Reset the global config to defaults (overwrite the file).
pub fn reset_config() -> Result<PathBuf> {
    init_config(true)
}

/// Show the effective (fully resolved) config as TOML.
pub fn show_effective_config() -> Result<String> {
    let config = load();
    toml::to_string_pretty(&config).context("failed to serialize effective config")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
