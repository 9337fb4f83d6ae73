#![allow(missing_docs)]
#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use retail_discovery_lib::application::{
    AttributeRefreshPass, DiscoveryOrchestrator, OrchestratorSettings, Page, RankingPolicy,
};
use retail_discovery_lib::domain::{CatalogSearch, CatalogStore, ProductQuery, Retailer};
use retail_discovery_lib::infrastructure::{
    AppConfig, AttributeExtractor, ConfigManager, DatabaseConnection, EventLog, EventSink,
    GeminiClient, JsonLinesSink, PageFetcher, ProxyFetcher, RetryController, SqliteCatalogStore,
    get_log_directory, init_logging_with_config,
};

/// Hybrid retail discovery: proxy-first listing fetch with a stealth
/// browser fallback, deduplicated into a local catalog.
#[derive(Parser)]
#[command(name = "retail-discovery", version, about)]
struct Cli {
    /// Configuration file (JSON). Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one discovery query and print the ranked page as JSON
    Discover {
        /// myntra, ajio or amazon
        retailer: Retailer,

        #[arg(required = true)]
        keywords: Vec<String>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value_t = ProductQuery::DEFAULT_MAX_RESULTS)]
        max_results: usize,

        #[arg(long, value_enum, default_value = "relevance")]
        rank: RankArg,

        #[arg(long, default_value_t = 0)]
        page: usize,

        #[arg(long, default_value_t = 20)]
        page_size: usize,
    },

    /// Search the stored catalog
    Search {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        brand: Option<String>,
        #[arg(long)]
        retailer: Option<Retailer>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Retry attribute extraction for entries stored without attributes
    Refresh {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RankArg {
    Recency,
    PriceAsc,
    PriceDesc,
    Relevance,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let config = manager.load_config().await?;
    init_logging_with_config(config.logging.clone())?;
    info!("🚀 retail-discovery {} starting", env!("CARGO_PKG_VERSION"));

    let db = DatabaseConnection::with_max_connections(&config.database.url, config.database.max_connections)
        .await
        .context("Failed to open catalog database")?;
    db.migrate().await?;
    let store: Arc<dyn CatalogStore> = Arc::new(SqliteCatalogStore::new(db.into_pool()));
    let extractor = build_extractor(&config)?;

    match cli.command {
        Commands::Discover {
            retailer,
            keywords,
            category,
            max_results,
            rank,
            page,
            page_size,
        } => {
            let mut query = ProductQuery::new(retailer, &keywords).with_max_results(max_results);
            if let Some(category) = category {
                query = query.with_category_hint(category);
            }
            let policy = match rank {
                RankArg::Recency => RankingPolicy::Recency,
                RankArg::PriceAsc => RankingPolicy::PriceAscending,
                RankArg::PriceDesc => RankingPolicy::PriceDescending,
                RankArg::Relevance => RankingPolicy::relevance(query.keywords()),
            };

            let (events, drain) = EventLog::spawn(config.discovery.event_queue_capacity, event_sink(&config));
            let orchestrator = DiscoveryOrchestrator::new(
                build_retry_controller(&config)?,
                extractor,
                store,
                events,
                OrchestratorSettings::from(&config.discovery),
            );

            let report = orchestrator.discover_with_default_deadline(vec![query]).await;
            for (query, error) in report.failures() {
                warn!("❌ '{}' on {}: {}", query.search_text(), query.retailer(), error);
            }
            let ranked = report.ranked(&policy, Page { number: page, size: page_size });
            println!("{}", serde_json::to_string_pretty(&ranked)?);

            drop(orchestrator);
            let drained = drain.finish().await;
            info!("📝 {} discovery events recorded", drained);
        }
        Commands::Search {
            category,
            color,
            brand,
            retailer,
            skip,
            limit,
        } => {
            let criteria = CatalogSearch {
                category,
                color,
                brand,
                retailer,
                skip,
                limit,
            };
            let entries = store.search(&criteria).await?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Refresh { limit } => {
            let pass = AttributeRefreshPass::new(store, extractor, config.extraction.refresh_batch_size);
            let summary = pass.run(limit).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}

fn build_extractor(config: &AppConfig) -> Result<AttributeExtractor> {
    Ok(match GeminiClient::from_config(&config.extraction)? {
        Some(client) => AttributeExtractor::new(Arc::new(client)),
        None => {
            warn!("🏷️ No GOOGLE_GEMINI_API_KEY configured; attributes will be stored as unknown");
            AttributeExtractor::disabled()
        }
    })
}

fn build_retry_controller(config: &AppConfig) -> Result<RetryController> {
    let primary: Arc<dyn PageFetcher> = Arc::new(ProxyFetcher::new(&config.fetch)?);
    Ok(RetryController::new(
        primary,
        fallback_fetcher(config),
        config.discovery.backoff_policy(),
    ))
}

#[cfg(feature = "stealth-browser")]
fn fallback_fetcher(config: &AppConfig) -> Option<Arc<dyn PageFetcher>> {
    use std::time::Duration;

    use retail_discovery_lib::infrastructure::{ChromiumLauncher, FallbackFetcher, SessionPool};

    let user_agent = config.fetch.user_agents.first().cloned().unwrap_or_default();
    let pool = SessionPool::new(
        Arc::new(ChromiumLauncher::new(user_agent)),
        config.discovery.session_pool_size,
    );
    Some(Arc::new(FallbackFetcher::new(
        Arc::new(pool),
        Duration::from_secs(config.fetch.browser_timeout_secs),
    )))
}

#[cfg(not(feature = "stealth-browser"))]
fn fallback_fetcher(_config: &AppConfig) -> Option<Arc<dyn PageFetcher>> {
    warn!("🕶️ Built without the stealth-browser feature; fallback tier disabled");
    None
}

fn event_sink(config: &AppConfig) -> Option<Box<dyn EventSink>> {
    if !config.logging.file_output {
        return None;
    }
    let path = get_log_directory().join("discovery-events.jsonl");
    match JsonLinesSink::open(&path) {
        Ok(sink) => Some(Box::new(sink)),
        Err(e) => {
            warn!("Event file disabled: {:#}", e);
            None
        }
    }
}
