//! # Configuration Module
//!
//! Loads the research agent's settings from environment variables (and an
//! optional `.env` file), then validates them before anything starts.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on research epochs when nothing overrides it.
pub const DEFAULT_MAX_EPOCHS: usize = 5;

/// Per-page fetch deadline, layered under the run's cancellation token.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// CONFIGURATION STRUCT
// =============================================================================
/// Main configuration for a research run.
#[derive(Debug, Clone)]
pub struct Config {
    /// The Ollama model to use (e.g., "llama3.2", "qwen3")
    pub model: String,

    /// Ollama server URL (default: http://localhost:11434)
    pub ollama_host: String,

    /// Token ceiling for a single completion
    pub max_tokens: u64,

    /// Maximum number of formulate → search → evaluate rounds
    pub max_epochs: usize,

    /// How many new queries to request from the model per epoch
    pub queries_per_epoch: usize,

    /// Results kept per query by the DuckDuckGo backend
    pub max_search_results: usize,

    /// JSON search endpoint; DuckDuckGo is used when unset
    pub search_api_url: Option<String>,

    /// Deadline for one page fetch
    pub fetch_timeout: Duration,

    /// Maximum number of pages fetched at the same time
    pub fetch_concurrency: usize,

    /// Directory that receives run snapshots
    pub data_dir: PathBuf,

    /// Log level for the application
    pub log_level: String,
}

// =============================================================================
// DEFAULT IMPLEMENTATION
// =============================================================================
impl Default for Config {
    fn default() -> Self {
        Self {
            model: "llama3.2".to_string(),
            ollama_host: "http://localhost:11434".to_string(),
            max_tokens: 4096,
            max_epochs: DEFAULT_MAX_EPOCHS,
            queries_per_epoch: 5,
            max_search_results: 5,
            search_api_url: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            fetch_concurrency: 8,
            data_dir: PathBuf::from("eval").join("deepsearch_data"),
            log_level: "info".to_string(),
        }
    }
}

// =============================================================================
// CONFIGURATION LOADING
// =============================================================================
impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; a variable that is set but does
    /// not parse is an error rather than being silently ignored.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is fine
        let _ = dotenvy::dotenv();

        let mut config = Config::default();

        if let Ok(val) = env::var("OLLAMA_MODEL") {
            config.model = val;
        }

        if let Ok(val) = env::var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Some(val) = parse_var("MAX_TOKENS", "a positive integer")? {
            config.max_tokens = val;
        }

        if let Some(val) = parse_var("MAX_EPOCHS", "a positive integer")? {
            config.max_epochs = val;
        }

        if let Some(val) = parse_var("QUERIES_PER_EPOCH", "a positive integer")? {
            config.queries_per_epoch = val;
        }

        if let Some(val) = parse_var("MAX_SEARCH_RESULTS", "a positive integer")? {
            config.max_search_results = val;
        }

        if let Ok(val) = env::var("SEARCH_API_URL") {
            if !val.trim().is_empty() {
                config.search_api_url = Some(val);
            }
        }

        if let Some(secs) = parse_var::<u64>("FETCH_TIMEOUT_SECS", "a number of seconds")? {
            config.fetch_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = parse_var("FETCH_CONCURRENCY", "a positive integer")? {
            config.fetch_concurrency = val;
        }

        if let Ok(val) = env::var("DEEPSEARCH_DATA_DIR") {
            config.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("RUST_LOG") {
            config.log_level = val;
        }

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            anyhow::bail!("OLLAMA_MODEL cannot be empty");
        }

        if self.max_epochs == 0 {
            anyhow::bail!("MAX_EPOCHS must be at least 1");
        }

        if self.queries_per_epoch == 0 {
            anyhow::bail!("QUERIES_PER_EPOCH must be at least 1");
        }

        if self.max_search_results == 0 {
            anyhow::bail!("MAX_SEARCH_RESULTS must be at least 1");
        }

        if self.fetch_concurrency == 0 {
            anyhow::bail!("FETCH_CONCURRENCY must be at least 1");
        }

        if self.fetch_timeout.is_zero() {
            anyhow::bail!("FETCH_TIMEOUT_SECS must be greater than 0");
        }

        Ok(())
    }
}

/// Parse an optional environment variable, attaching a readable hint on failure.
fn parse_var<T>(name: &str, expected: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} must be {}, got {:?}", name, expected, val)),
        Err(_) => Ok(None),
    }
}
