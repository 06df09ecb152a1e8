use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{env, fs, path::PathBuf};

use crate::llm::{DEFAULT_LOCAL_BASE, DEFAULT_REMOTE_BASE};
use crate::rank::SortKey;
use crate::validate::ValidatorConfig;

pub const APP_DIR_NAME: &str = "aifixer";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const REMOTE_BASE_ENV: &str = "AIFIXER_REMOTE_BASE";
pub const LOCAL_BASE_ENV: &str = "AIFIXER_LOCAL_BASE";

pub const DEFAULT_MODEL: &str = "anthropic/claude-3-sonnet-20240229";
pub const DEFAULT_PROMPT: &str = "Fix the TODOs in the file below and output the full file: ";
pub const DEFAULT_MAX_FALLBACKS: usize = 2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

/// Optional settings file. Every key may be omitted.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub model: Option<String>,
    pub local_model: Option<String>,
    pub prompt: Option<String>,
    pub max_fallbacks: Option<usize>,
    #[serde(default)]
    pub fallbacks: Vec<String>,
    pub sort_by: Option<SortKey>,
    pub timeout_secs: Option<u64>,
    pub backoff_ms: Option<u64>,
    pub budget_secs: Option<u64>,
    pub temperature: Option<f64>,
    pub remote_base: Option<String>,
    pub local_base: Option<String>,
    #[serde(default)]
    pub validator: ValidatorConfig,
}

pub fn default_config_path() -> Result<PathBuf> {
    let base = config_dir().context("unable to resolve OS config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

pub fn load_config_if_exists(path: &PathBuf) -> Result<Option<AppConfig>> {
    if path.exists() {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config file: {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&text).context("parsing config TOML")?;
        Ok(Some(cfg))
    } else {
        Ok(None)
    }
}

/// Values supplied on the command line; `None` means "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub model: Option<String>,
    pub local_model: Option<String>,
    pub prompt: Option<String>,
    pub max_fallbacks: Option<usize>,
    pub fallbacks: Vec<String>,
    pub sort_by: Option<SortKey>,
    pub timeout_secs: Option<u64>,
    pub backoff_ms: Option<u64>,
    pub budget_secs: Option<u64>,
}

/// Request-scoped settings for one invocation, fixed before the first attempt.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub model: String,
    pub local_model: Option<String>,
    pub prompt: String,
    pub max_fallbacks: usize,
    pub fallbacks: Vec<String>,
    pub sort_by: SortKey,
    pub attempt_timeout: Duration,
    pub backoff: Duration,
    pub budget: Option<Duration>,
    pub temperature: f64,
    pub remote_base: String,
    pub local_base: String,
    pub validator: ValidatorConfig,
    pub show_progress: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        merge(AppConfig::default(), CliOverrides::default(), None, None)
    }
}

/// Read the config file (if any) and layer environment and CLI values on top.
pub fn resolve_effective_settings(cli: CliOverrides) -> Result<RunSettings> {
    let path = default_config_path()?;
    let cfg = load_config_if_exists(&path)?.unwrap_or_default();
    Ok(merge(
        cfg,
        cli,
        env::var(REMOTE_BASE_ENV).ok().filter(|s| !s.trim().is_empty()),
        env::var(LOCAL_BASE_ENV).ok().filter(|s| !s.trim().is_empty()),
    ))
}

/// CLI > environment > config file > built-in default.
fn merge(cfg: AppConfig, cli: CliOverrides, env_remote: Option<String>, env_local: Option<String>) -> RunSettings {
    let fallbacks = if cli.fallbacks.is_empty() { cfg.fallbacks } else { cli.fallbacks };
    RunSettings {
        model: cli.model.or(cfg.model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        local_model: cli.local_model.or(cfg.local_model),
        prompt: cli.prompt.or(cfg.prompt).unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
        max_fallbacks: cli.max_fallbacks.or(cfg.max_fallbacks).unwrap_or(DEFAULT_MAX_FALLBACKS),
        fallbacks,
        sort_by: cli.sort_by.or(cfg.sort_by).unwrap_or_default(),
        attempt_timeout: Duration::from_secs(cli.timeout_secs.or(cfg.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS)),
        backoff: Duration::from_millis(cli.backoff_ms.or(cfg.backoff_ms).unwrap_or(DEFAULT_BACKOFF_MS)),
        budget: cli.budget_secs.or(cfg.budget_secs).map(Duration::from_secs),
        temperature: cfg.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        remote_base: env_remote.or(cfg.remote_base).unwrap_or_else(|| DEFAULT_REMOTE_BASE.to_string()),
        local_base: env_local.or(cfg.local_base).unwrap_or_else(|| DEFAULT_LOCAL_BASE.to_string()),
        validator: cfg.validator,
        show_progress: false,
    }
}
