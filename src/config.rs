//! Process configuration loaded from `config.toml`.
//!
//! The file is optional: a missing or empty file yields `Config::default()`.
//! Unknown keys are accepted and logged as warnings so typos are visible.
//! Runtime-tunable values (interval, fetch cap, vocabulary) live in the
//! database-backed settings store instead, see [`crate::settings`].
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides `llm_api_key` from the file
pub const API_KEY_ENV: &str = "NEWSDESK_LLM_API_KEY";

/// Environment variable naming the config file when `--config` is absent
pub const CONFIG_PATH_ENV: &str = "NEWSDESK_CONFIG";

const MAX_COLLECT_CONCURRENCY: usize = 16;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Top-level process configuration.
///
/// Every key is optional; missing keys take the values from `Default`.
/// `Debug` masks `llm_api_key`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP API listens on.
    pub bind: String,

    /// Holds `news.db` and the `exports/` directory.
    pub data_dir: PathBuf,

    /// Base of an OpenAI-compatible API (`{base}/chat/completions`).
    pub llm_base_url: String,

    /// API key for the LLM endpoint. The env var takes precedence.
    pub llm_api_key: Option<String>,

    /// Sources fetched in parallel during a collection pass.
    pub collect_concurrency: usize,

    pub fetch_timeout_secs: u64,
    pub ai_timeout_secs: u64,
    pub ai_max_retries: u32,

    /// Seed the built-in source list when the registry is empty.
    pub seed_default_sources: bool,

    /// Start the collection scheduler with the server.
    pub start_scheduler: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8001".to_string(),
            data_dir: PathBuf::from("./data"),
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: None,
            collect_concurrency: 4,
            fetch_timeout_secs: 30,
            ai_timeout_secs: 60,
            ai_max_retries: 2,
            seed_default_sources: true,
            start_scheduler: true,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("llm_base_url", &self.llm_base_url)
            .field(
                "llm_api_key",
                &self.llm_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("collect_concurrency", &self.collect_concurrency)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("ai_timeout_secs", &self.ai_timeout_secs)
            .field("ai_max_retries", &self.ai_max_retries)
            .field("seed_default_sources", &self.seed_default_sources)
            .field("start_scheduler", &self.start_scheduler)
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MiB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "bind",
        "data_dir",
        "llm_base_url",
        "llm_api_key",
        "collect_concurrency",
        "fetch_timeout_secs",
        "ai_timeout_secs",
        "ai_max_retries",
        "seed_default_sources",
        "start_scheduler",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing or blank file → `Ok(Config::default())`
    /// - Invalid TOML or wrong value type → `Err(ConfigError::Parse)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Size check first so a huge file is never read into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), bind = %config.bind, "Loaded configuration");
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("news.db")
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    pub fn collect_concurrency(&self) -> usize {
        self.collect_concurrency.clamp(1, MAX_COLLECT_CONCURRENCY)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs.max(1))
    }

    /// API key from the environment, else from the file; blank counts as unset.
    pub fn api_key(&self) -> Option<SecretString> {
        Self::resolve_api_key(std::env::var(API_KEY_ENV).ok(), self.llm_api_key.as_deref())
    }

    fn resolve_api_key(env: Option<String>, file: Option<&str>) -> Option<SecretString> {
        env.filter(|k| !k.trim().is_empty())
            .or_else(|| file.map(str::to_owned).filter(|k| !k.trim().is_empty()))
            .map(SecretString::from)
    }
}

// ============================================================================
// Tests
// ============================================================================
