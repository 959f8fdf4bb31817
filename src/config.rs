//! Configuration loader and validator for the leadbook service.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub llm: Llm,
    pub email: Email,
    pub payment: Payment,
    pub generation: Generation,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub bind_addr: String,
}

/// Language-model API settings (OpenAI-compatible endpoint).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Llm {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub image_model: String,
}

/// Transactional email API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Email {
    pub api_key: String,
    pub base_url: String,
    pub from: String,
}

/// Payment session retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Payment {
    pub api_key: String,
    pub base_url: String,
}

/// Generation pacing and scraping limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Generation {
    pub scrape_char_budget: usize,
    pub chapter_pause_every: usize,
    pub chapter_pause_ms: u64,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
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
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("app.bind_addr must be non-empty"));
    }

    if cfg.llm.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.api_key must be non-empty"));
    }
    if cfg.llm.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.base_url must be non-empty"));
    }
    if cfg.llm.model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.model must be non-empty"));
    }
    if cfg.llm.image_model.trim().is_empty() {
        return Err(ConfigError::Invalid("llm.image_model must be non-empty"));
    }

    if cfg.email.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("email.api_key must be non-empty"));
    }
    if cfg.email.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("email.base_url must be non-empty"));
    }
    if cfg.email.from.trim().is_empty() {
        return Err(ConfigError::Invalid("email.from must be non-empty"));
    }

    if cfg.payment.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("payment.api_key must be non-empty"));
    }
    if cfg.payment.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("payment.base_url must be non-empty"));
    }

    if cfg.generation.scrape_char_budget == 0 {
        return Err(ConfigError::Invalid(
            "generation.scrape_char_budget must be > 0",
        ));
    }
    if cfg.generation.chapter_pause_every == 0 {
        return Err(ConfigError::Invalid(
            "generation.chapter_pause_every must be > 0",
        ));
    }

    Ok(())
}

/// Returns a complete example YAML config, used as the baseline in tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  bind_addr: "127.0.0.1:8080"

llm:
  api_key: "YOUR_LLM_API_KEY"
  base_url: "https://api.openai.com/"
  model: "gpt-4o-mini"
  image_model: "dall-e-3"

email:
  api_key: "YOUR_EMAIL_API_KEY"
  base_url: "https://api.resend.com/"
  from: "books@example.com"

payment:
  api_key: "YOUR_PAYMENT_SECRET_KEY"
  base_url: "https://api.stripe.com/"

generation:
  scrape_char_budget: 12000
  chapter_pause_every: 5
  chapter_pause_ms: 2000
"#
}
