//! Configuration infrastructure
//!
//! Configuration is a single JSON file in the platform config directory,
//! created with defaults on first run. Secrets are usually supplied through
//! environment variables, which override the file on load:
//! - `SCRAPER_API_KEY` for the rotating proxy service
//! - `GOOGLE_GEMINI_API_KEY` for attribute extraction
//! - `DATABASE_URL` for the catalog database

#![allow(clippy::uninlined_format_args)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{info, warn};

use crate::infrastructure::retry_manager::BackoffPolicy;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub discovery: DiscoveryConfig,
    pub fetch: FetchConfig,
    pub extraction: ExtractionConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Retry, deadline and admission-control knobs for discovery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Primary (proxy) attempts per pair
    pub primary_retries: u32,

    /// Fallback (browser) attempts per pair
    pub fallback_retries: u32,

    /// Base backoff delay in milliseconds; doubles per attempt
    pub backoff_base_ms: u64,

    /// Add random jitter (up to the computed delay) to backoff sleeps
    pub backoff_jitter: bool,

    /// Upper bound for one (retailer, query) pipeline
    pub per_pair_timeout_secs: u64,

    /// Default deadline for a whole batch
    pub batch_deadline_secs: u64,

    /// Maximum concurrent stealth browser sessions
    pub session_pool_size: usize,

    /// Maximum (retailer, query) pairs running at the same time
    pub max_concurrent_pairs: usize,

    /// Retry empty queries once with the last two keywords
    pub broaden_empty_queries: bool,

    /// Capacity of the best-effort event queue
    pub event_queue_capacity: usize,
}

/// Primary fetcher settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Proxy service endpoint (ScraperAPI compatible)
    pub proxy_endpoint: String,

    /// Proxy API key; when empty pages are requested directly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_api_key: Option<String>,

    /// Ask the proxy service to render JavaScript
    pub render_js: bool,

    pub request_timeout_secs: u64,

    /// Browser navigation timeout for the fallback tier
    pub browser_timeout_secs: u64,

    pub max_requests_per_second: u32,

    /// User agents rotated per request
    pub user_agents: Vec<String>,
}

/// Attribute extraction (language model) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub endpoint: String,
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub request_timeout_secs: u64,

    /// Batch size used by the out-of-band refresh pass
    pub refresh_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL; empty means `<app data dir>/database/catalog.db`
    pub url: String,
    pub max_connections: u32,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted file logs
    pub json_format: bool,

    pub console_output: bool,
    pub file_output: bool,

    /// Number of log files to keep (older files will be deleted)
    pub max_files: u32,

    /// Delete old log files on startup
    pub auto_cleanup_logs: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: HashMap<String, String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            primary_retries: defaults::PRIMARY_RETRIES,
            fallback_retries: defaults::FALLBACK_RETRIES,
            backoff_base_ms: defaults::BACKOFF_BASE_MS,
            backoff_jitter: true,
            per_pair_timeout_secs: defaults::PER_PAIR_TIMEOUT_SECS,
            batch_deadline_secs: defaults::BATCH_DEADLINE_SECS,
            session_pool_size: defaults::SESSION_POOL_SIZE,
            max_concurrent_pairs: defaults::MAX_CONCURRENT_PAIRS,
            broaden_empty_queries: true,
            event_queue_capacity: defaults::EVENT_QUEUE_CAPACITY,
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            proxy_endpoint: defaults::PROXY_ENDPOINT.to_string(),
            proxy_api_key: None,
            render_js: true,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            browser_timeout_secs: defaults::BROWSER_TIMEOUT_SECS,
            max_requests_per_second: defaults::MAX_REQUESTS_PER_SECOND,
            user_agents: defaults::USER_AGENTS.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::GEMINI_ENDPOINT.to_string(),
            model: defaults::GEMINI_MODEL.to_string(),
            api_key: None,
            request_timeout_secs: defaults::EXTRACTION_TIMEOUT_SECS,
            refresh_batch_size: defaults::REFRESH_BATCH_SIZE,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: defaults::DB_MAX_CONNECTIONS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            max_files: defaults::LOG_MAX_FILES,
            auto_cleanup_logs: true,
            module_filters: {
                let mut filters = HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("chromiumoxide".to_string(), "warn".to_string());
                filters
            },
        }
    }
}

impl DiscoveryConfig {
    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            primary_attempts: self.primary_retries.max(1),
            fallback_attempts: self.fallback_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            jitter: self.backoff_jitter,
        }
    }

    pub const fn per_pair_timeout(&self) -> Duration {
        Duration::from_secs(self.per_pair_timeout_secs)
    }

    pub const fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }
}

impl AppConfig {
    /// Rejects settings that would stall or disable the pipeline
    pub fn validate(&self) -> Result<()> {
        let d = &self.discovery;
        if d.primary_retries == 0 {
            bail!("discovery.primary_retries must be at least 1");
        }
        if d.session_pool_size == 0 {
            bail!("discovery.session_pool_size must be at least 1");
        }
        if d.max_concurrent_pairs == 0 {
            bail!("discovery.max_concurrent_pairs must be at least 1");
        }
        if d.per_pair_timeout_secs == 0 || d.batch_deadline_secs == 0 {
            bail!("discovery timeouts must be greater than zero");
        }
        if d.event_queue_capacity == 0 {
            bail!("discovery.event_queue_capacity must be at least 1");
        }
        if self.fetch.max_requests_per_second == 0 {
            bail!("fetch.max_requests_per_second must be at least 1");
        }
        if self.fetch.user_agents.is_empty() {
            bail!("fetch.user_agents must not be empty");
        }
        Ok(())
    }

    /// Applies environment overrides for secrets and the database location
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(key) = non_empty(env::SCRAPER_API_KEY) {
            self.fetch.proxy_api_key = Some(key);
        }
        if let Some(key) = non_empty(env::GEMINI_API_KEY) {
            self.extraction.api_key = Some(key);
        }
        if let Some(url) = non_empty(env::DATABASE_URL) {
            self.database.url = url;
        }
    }
}

/// Environment variable names
pub mod env {
    pub const SCRAPER_API_KEY: &str = "SCRAPER_API_KEY";
    pub const GEMINI_API_KEY: &str = "GOOGLE_GEMINI_API_KEY";
    pub const DATABASE_URL: &str = "DATABASE_URL";
}

/// Configuration manager for loading and saving settings
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Get the application configuration directory
    pub fn get_config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get user config directory")?
            .join(defaults::APP_DIR_NAME);

        Ok(config_dir)
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join(defaults::CONFIG_FILE_NAME);
        Ok(Self { config_path })
    }

    /// Manager for an explicit file, e.g. `--config <path>`
    pub const fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Get application data directory
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to get user data directory")?
            .join(defaults::APP_DIR_NAME);

        Ok(data_dir)
    }

    /// Default SQLite URL under the application data directory
    pub fn default_database_url() -> Result<String> {
        let path = Self::get_app_data_dir()?.join("database").join("catalog.db");
        Ok(format!("sqlite:{}", path.display()))
    }

    /// Load configuration from file, creating default if it doesn't exist.
    ///
    /// Environment overrides are applied and the result is validated.
    pub async fn load_config(&self) -> Result<AppConfig> {
        let mut config = self.load_file().await?;
        config.apply_env_overrides();
        if config.database.url.is_empty() {
            config.database.url = Self::default_database_url()?;
        }
        config.validate()?;
        Ok(config)
    }

    async fn load_file(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!("Configuration file not found, creating default: {:?}", self.config_path);
            let default_config = AppConfig::default();
            self.save_config(&default_config).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .context("Failed to read configuration file")?;

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                info!("Loaded configuration from: {:?}", self.config_path);
                Ok(config)
            }
            Err(parse_error) => {
                warn!("⚠️  Configuration parse error: {}", parse_error);
                warn!("⚠️  Resetting to default configuration");

                let backup_path = self.config_path.with_extension("json.corrupted");
                if let Err(e) = fs::copy(&self.config_path, &backup_path).await {
                    warn!("Failed to create backup of corrupted config: {}", e);
                } else {
                    info!("Backed up corrupted config to: {:?}", backup_path);
                }

                let default_config = AppConfig::default();
                self.save_config(&default_config)
                    .await
                    .context("Failed to save default configuration")?;
                Ok(default_config)
            }
        }
    }

    /// Save configuration to file. Secrets are never written back.
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        let mut on_disk = config.clone();
        on_disk.fetch.proxy_api_key = None;
        on_disk.extraction.api_key = None;

        let content =
            serde_json::to_string_pretty(&on_disk).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .context("Failed to write configuration file")?;

        info!("Saved configuration to: {:?}", self.config_path);
        Ok(())
    }

    pub const fn config_path(&self) -> &PathBuf {
        &self.config_path
    }
}

pub mod defaults {
    pub const APP_DIR_NAME: &str = "retail-discovery";
    pub const CONFIG_FILE_NAME: &str = "retail_discovery_config.json";

    /// Primary attempts per pair (P)
    pub const PRIMARY_RETRIES: u32 = 2;

    /// Fallback attempts per pair (F)
    pub const FALLBACK_RETRIES: u32 = 1;

    /// Backoff base delay (b) in milliseconds
    pub const BACKOFF_BASE_MS: u64 = 500;

    pub const PER_PAIR_TIMEOUT_SECS: u64 = 90;
    pub const BATCH_DEADLINE_SECS: u64 = 180;

    /// Concurrent stealth browser sessions
    pub const SESSION_POOL_SIZE: usize = 2;

    pub const MAX_CONCURRENT_PAIRS: usize = 2;
    pub const EVENT_QUEUE_CAPACITY: usize = 256;

    pub const PROXY_ENDPOINT: &str = "https://api.scraperapi.com/";
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;
    pub const BROWSER_TIMEOUT_SECS: u64 = 30;
    pub const MAX_REQUESTS_PER_SECOND: u32 = 2;

    pub const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
    pub const GEMINI_MODEL: &str = "gemini-1.5-flash";
    pub const EXTRACTION_TIMEOUT_SECS: u64 = 30;
    pub const REFRESH_BATCH_SIZE: usize = 50;

    pub const DB_MAX_CONNECTIONS: u32 = 5;

    pub const LOG_LEVEL: &str = "info";
    pub const LOG_MAX_FILES: u32 = 7;

    pub const USER_AGENTS: &[&str] = &[
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    ];
}
