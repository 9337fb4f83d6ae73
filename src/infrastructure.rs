//! Infrastructure layer for fetching, parsing, enrichment and storage
//!
//! This module provides the proxy and browser fetch tiers, retailer page
//! adapters, the retry/escalation controller, listing normalization, the
//! language-model attribute extractor and the catalog stores.

pub mod config;  // Configuration file + env overrides
pub mod logging;  // Logging infrastructure

// Fetching
pub mod fetching;
pub mod proxy_fetcher;
pub mod browser_pool;
#[cfg(feature = "stealth-browser")]
pub mod stealth_browser;
pub mod retry_manager;

// Parsing and enrichment
pub mod parsing;
pub mod site_adapters;
pub mod normalizer;
pub mod llm_client;
pub mod attribute_extractor;

// Storage
pub mod key_locks;
pub mod database_connection;
pub mod catalog_repository;
pub mod memory_catalog;

pub mod event_log;

// Re-export commonly used items
pub use config::{AppConfig, ConfigManager, DiscoveryConfig, ExtractionConfig, FetchConfig, LoggingConfig};
pub use logging::{get_log_directory, init_logging, init_logging_with_config};

pub use fetching::PageFetcher;
pub use proxy_fetcher::ProxyFetcher;
pub use browser_pool::{BrowserLauncher, BrowserSession, FallbackFetcher, SessionPool};
#[cfg(feature = "stealth-browser")]
pub use stealth_browser::ChromiumLauncher;
pub use retry_manager::{BackoffPolicy, FetchReport, RetryController};

pub use parsing::{ParseOutcome, ParsingError, ParsingResult};
pub use site_adapters::{SiteAdapter, adapter_for};
pub use normalizer::{NormalizeReport, normalize_listings};
pub use llm_client::{GeminiClient, LanguageModel};
pub use attribute_extractor::{AttributeExtractor, ExtractionError};

pub use database_connection::DatabaseConnection;
pub use catalog_repository::SqliteCatalogStore;
pub use memory_catalog::InMemoryCatalogStore;

pub use event_log::{EventDrain, EventLog, EventSink, JsonLinesSink};
