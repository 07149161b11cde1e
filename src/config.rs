//! Configuration loader and validator for the catalog sync service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::model::{Account, DestinationScope, ScopeId};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub index: Index,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(default)]
    pub inventory: Inventory,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_sweep_limit")]
    pub sweep_limit: i64,
    #[serde(default = "default_purge_after_days")]
    pub purge_after_days: i64,
}

/// Remote index endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Index {
    pub base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

/// One destination store and its remote account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub id: ScopeId,
    pub code: String,
    #[serde(default = "default_true")]
    pub sync_enabled: bool,
    #[serde(default)]
    pub account: Option<Account>,
}

/// Order-driven stock refresh.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Inventory {
    #[serde(default)]
    pub sync_on_order: bool,
}

/// Upper bound keeping the purge cutoff representable as a date.
const MAX_PURGE_AFTER_DAYS: i64 = 36_500;

fn default_batch_size() -> usize {
    4
}

fn default_sweep_limit() -> i64 {
    10_000
}

fn default_purge_after_days() -> i64 {
    30
}

fn default_request_timeout() -> u64 {
    120
}

fn default_true() -> bool {
    true
}

impl App {
    /// `data_dir` with a leading `~/` expanded to `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        match self.data_dir.strip_prefix("~/") {
            Some(rest) => match std::env::var("HOME") {
                Ok(home) => format!("{}/{}", home.trim_end_matches('/'), rest),
                Err(_) => self.data_dir.clone(),
            },
            None => self.data_dir.clone(),
        }
    }
}

impl Scope {
    pub fn destination(&self) -> DestinationScope {
        DestinationScope {
            id: self.id,
            code: self.code.clone(),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// SQLite URL, honouring `DATABASE_URL` when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}/catalog_sync.db", self.app.resolved_data_dir())
        })
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }
    if cfg.app.batch_size == 0 {
        return Err(ConfigError::Invalid("app.batch_size must be > 0"));
    }
    if cfg.app.sweep_limit <= 0 {
        return Err(ConfigError::Invalid("app.sweep_limit must be > 0"));
    }
    if !(1..=MAX_PURGE_AFTER_DAYS).contains(&cfg.app.purge_after_days) {
        return Err(ConfigError::Invalid(
            "app.purge_after_days must be between 1 and 36500",
        ));
    }

    if reqwest::Url::parse(&cfg.index.base_url).is_err() {
        return Err(ConfigError::Invalid("index.base_url must be a valid URL"));
    }
    if cfg.index.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "index.request_timeout_seconds must be > 0",
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for scope in &cfg.scopes {
        if !seen.insert(scope.id) {
            return Err(ConfigError::Invalid("scopes[].id must be unique"));
        }
        if scope.code.trim().is_empty() {
            return Err(ConfigError::Invalid("scopes[].code must be non-empty"));
        }
        // A scope without an account is allowed; it is skipped at run time.
        if let Some(account) = &scope.account {
            if account.api_token.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "scopes[].account.api_token must be non-empty",
                ));
            }
        }
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 60000
  batch_size: 4
  sweep_limit: 10000
  purge_after_days: 30

index:
  base_url: "https://api.search-index.example/"
  request_timeout_seconds: 120

scopes:
  - id: 1
    code: "default"
    sync_enabled: true
    account:
      name: "main-store"
      api_token: "YOUR_INDEX_API_TOKEN"
  - id: 2
    code: "outlet"
    sync_enabled: false
    account:
      name: "outlet-store"
      api_token: "YOUR_OUTLET_API_TOKEN"
  - id: 3
    code: "staging"

inventory:
  sync_on_order: true
"#
}
