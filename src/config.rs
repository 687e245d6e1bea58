//! Runtime configuration.
//!
//! Defaults, overridden by an optional TOML file, overridden by environment
//! variables. API credentials normally arrive through the environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};
use crate::reasoning::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub reasoning: ReasoningConfig,
    pub logging: LoggingConfig,
    pub planning: PlanningConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String, // ":memory:" for an ephemeral store
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "stride.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAI,
}

impl Provider {
    pub fn from_str(s: &str) -> Option<Provider> {
        match s.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "openai" | "gpt" => Some(Provider::OpenAI),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub provider: Provider,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Anthropic,
            api_key: None,
            model: None,
            timeout_secs: 45,
            max_attempts: 2,
            initial_backoff_ms: 500,
            max_backoff_ms: 4000,
        }
    }
}

impl ReasoningConfig {
    /// A blank key counts as no key.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
    pub level: String,
    pub retention_days: i64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: "info".to_string(),
            retention_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Extra days past today that Initialize plans for.
    pub schedule_days_ahead: u32,
    pub default_task_minutes: u32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            schedule_days_ahead: 0,
            default_task_minutes: 30,
        }
    }
}

impl Config {
    /// Load defaults, then the TOML file at `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> PipelineResult<Config> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    PipelineError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_toml(&raw)?
            }
            None => Config::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> PipelineResult<Config> {
        toml::from_str(raw).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Apply overrides from a variable lookup (the process environment in production).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(provider) = lookup("STRIDE_PROVIDER").and_then(|p| Provider::from_str(&p)) {
            self.reasoning.provider = provider;
        }

        let provider_key = match self.reasoning.provider {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        };
        if let Some(key) = lookup("STRIDE_API_KEY").or_else(|| lookup(provider_key)) {
            self.reasoning.api_key = Some(key);
        }

        if let Some(model) = lookup("STRIDE_MODEL") {
            self.reasoning.model = Some(model);
        }
        if let Some(path) = lookup("STRIDE_DB_PATH") {
            self.database.path = path;
        }
    }
}
