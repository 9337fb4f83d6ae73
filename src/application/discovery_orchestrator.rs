//! Batch entry point of the discovery engine
//!
//! Every (retailer, query) pair runs fetch-with-retry, normalization,
//! attribute extraction and catalog upsert as one independent pipeline.
//! Pairs fan out concurrently up to `max_concurrent_pairs`. A pair that
//! outlives its own timeout or the batch deadline is cancelled and its
//! slot reports [`DiscoveryError::Timeout`]; nothing is silently dropped.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::report::{DiscoveryReport, PairOutcome};
use crate::domain::{
    CatalogEntry, CatalogStore, DiscoveryError, DiscoveryEvent, FetchTier, ProductQuery,
};
use crate::infrastructure::attribute_extractor::AttributeExtractor;
use crate::infrastructure::config::DiscoveryConfig;
use crate::infrastructure::event_log::EventLog;
use crate::infrastructure::normalizer::normalize_listings;
use crate::infrastructure::retry_manager::{FetchReport, RetryController};
use crate::infrastructure::site_adapters::{SiteAdapter, adapter_for};

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runtime knobs taken from [`DiscoveryConfig`]
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub per_pair_timeout: Duration,
    pub batch_deadline: Duration,
    pub max_concurrent_pairs: usize,
    pub broaden_empty_queries: bool,
}

impl From<&DiscoveryConfig> for OrchestratorSettings {
    fn from(config: &DiscoveryConfig) -> Self {
        Self {
            per_pair_timeout: config.per_pair_timeout(),
            batch_deadline: config.batch_deadline(),
            max_concurrent_pairs: config.max_concurrent_pairs.max(1),
            broaden_empty_queries: config.broaden_empty_queries,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&DiscoveryConfig::default())
    }
}

/// Successful pipeline run for one pair
struct PairSuccess {
    entries: Vec<CatalogEntry>,
    tier: FetchTier,
    broadened: bool,
}

pub struct DiscoveryOrchestrator {
    retry: RetryController,
    extractor: AttributeExtractor,
    store: Arc<dyn CatalogStore>,
    events: EventLog,
    settings: OrchestratorSettings,
    clock: Clock,
}

impl DiscoveryOrchestrator {
    pub fn new(
        retry: RetryController,
        extractor: AttributeExtractor,
        store: Arc<dyn CatalogStore>,
        events: EventLog,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            retry,
            extractor,
            store,
            events,
            settings,
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the wall clock used to stamp `scraped_at`
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub const fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Runs a batch under the configured batch deadline
    pub async fn discover_with_default_deadline(&self, batch: Vec<ProductQuery>) -> DiscoveryReport {
        let deadline = Instant::now() + self.settings.batch_deadline;
        self.discover(batch, deadline).await
    }

    /// Runs every query of `batch` and returns one outcome per query, in
    /// the same order. Never fails as a whole.
    pub async fn discover(&self, batch: Vec<ProductQuery>, deadline: Instant) -> DiscoveryReport {
        let batch_id = Uuid::new_v4();
        let started_at = (self.clock)();
        let started = Instant::now();
        let dropped_before = self.events.dropped();
        info!("🔄 Discovery batch {} started with {} queries", batch_id, batch.len());

        let semaphore = Semaphore::new(self.settings.max_concurrent_pairs.max(1));
        let outcomes = join_all(
            batch
                .into_iter()
                .map(|query| self.run_pair(query, deadline, &semaphore)),
        )
        .await;

        let report = DiscoveryReport {
            batch_id,
            started_at,
            outcomes,
            elapsed_ms: started.elapsed().as_millis() as u64,
            events_dropped: self.events.dropped().saturating_sub(dropped_before),
        };
        info!(
            "✅ Discovery batch {} finished: {}/{} pairs succeeded in {}ms",
            batch_id,
            report.succeeded(),
            report.outcomes.len(),
            report.elapsed_ms
        );
        report
    }

    async fn run_pair(&self, query: ProductQuery, deadline: Instant, semaphore: &Semaphore) -> PairOutcome {
        let retailer = query.retailer();
        let started = Instant::now();

        let bounded = async {
            // the semaphore is never closed
            let _permit = semaphore.acquire().await.ok();
            self.events.emit(DiscoveryEvent::PairStarted {
                retailer,
                query: query.search_text(),
                at: Utc::now(),
            });
            match timeout(self.settings.per_pair_timeout, self.pipeline(&query)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("⏰ {} pair exceeded its {:?} timeout", retailer, self.settings.per_pair_timeout);
                    Err(DiscoveryError::Timeout { retailer })
                }
            }
        };
        let result = timeout_at(deadline, bounded).await.unwrap_or_else(|_| {
            warn!("⏰ Batch deadline reached, cancelling {} '{}'", retailer, query.search_text());
            Err(DiscoveryError::Timeout { retailer })
        });
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(success) => {
                self.events.emit(DiscoveryEvent::PairCompleted {
                    retailer,
                    entries: success.entries.len(),
                    elapsed_ms,
                    at: Utc::now(),
                });
                PairOutcome {
                    query,
                    result: Ok(success.entries),
                    tier: Some(success.tier),
                    broadened: success.broadened,
                    elapsed_ms,
                }
            }
            Err(error) => {
                warn!("❌ {} '{}' failed: {}", retailer, query.search_text(), error);
                self.events.emit(DiscoveryEvent::PairFailed {
                    retailer,
                    taxonomy: error.taxonomy(),
                    message: error.to_string(),
                    at: Utc::now(),
                });
                PairOutcome::failed(query, error, elapsed_ms)
            }
        }
    }

    async fn pipeline(&self, query: &ProductQuery) -> Result<PairSuccess, DiscoveryError> {
        let retailer = query.retailer();
        let adapter = adapter_for(retailer);

        let mut report = self.fetch(adapter.as_ref(), query).await?;
        let mut broadened = false;
        if report.outcome.is_empty() && self.settings.broaden_empty_queries {
            if let Some(wider) = query.broadened() {
                info!(
                    "🔎 No {} results for '{}', retrying with '{}'",
                    retailer,
                    query.search_text(),
                    wider.search_text()
                );
                report = self.fetch(adapter.as_ref(), &wider).await?;
                broadened = true;
            }
        }
        let tier = report.tier;

        let normalized = normalize_listings(retailer, report.outcome.listings, (self.clock)());
        if normalized.dropped > 0 {
            self.events.emit(DiscoveryEvent::ListingsDropped {
                retailer,
                dropped: normalized.dropped,
                at: Utc::now(),
            });
        }
        let mut products = normalized.products;
        products.truncate(query.max_results());

        let (attributes, extraction_error) = self
            .extractor
            .extract_or_unknown(&products, query.category_hint())
            .await;
        if let Some(error) = extraction_error {
            warn!("🏷️ {} attribute extraction degraded to unknown: {}", retailer, error);
            self.events.emit(DiscoveryEvent::ExtractionFailed {
                retailer,
                reason: error.to_string(),
                at: Utc::now(),
            });
        }

        let mut entries = Vec::with_capacity(products.len());
        for (product, attributes) in products.into_iter().zip(attributes) {
            let entry = self
                .store
                .upsert(product, attributes)
                .await
                .map_err(|e| DiscoveryError::Store {
                    retailer,
                    message: format!("{:#}", e),
                })?;
            debug!("💾 {} entry {} seen {} times", retailer, entry.identity_key, entry.occurrence_count);
            self.events.emit(DiscoveryEvent::EntryUpserted {
                retailer,
                identity_key: entry.identity_key.to_string(),
                occurrence_count: entry.occurrence_count,
                at: Utc::now(),
            });
            entries.push(entry);
        }

        Ok(PairSuccess {
            entries,
            tier,
            broadened,
        })
    }

    async fn fetch(&self, adapter: &dyn SiteAdapter, query: &ProductQuery) -> Result<FetchReport, DiscoveryError> {
        let retailer = query.retailer();
        let request = adapter.build_request(query);
        match self.retry.fetch_listings(adapter, &request).await {
            Ok(report) => {
                if report.escalated() {
                    let reason = report
                        .attempts
                        .iter()
                        .rev()
                        .find(|a| a.tier == FetchTier::Primary)
                        .and_then(|a| a.result.as_ref().err())
                        .map_or_else(|| "primary tier exhausted".to_string(), ToString::to_string);
                    self.events.emit(DiscoveryEvent::Escalated {
                        retailer,
                        reason,
                        at: Utc::now(),
                    });
                }
                self.events.emit(DiscoveryEvent::ListingsFetched {
                    retailer,
                    tier: report.tier,
                    listings: report.outcome.len(),
                    incomplete_fields: report.outcome.incomplete_fields,
                    at: Utc::now(),
                });
                Ok(report)
            }
            Err(error) => {
                // with a fallback budget every exhausted primary escalates first
                if self.retry.policy().fallback_attempts > 0 {
                    self.events.emit(DiscoveryEvent::Escalated {
                        retailer,
                        reason: "primary tier exhausted".to_string(),
                        at: Utc::now(),
                    });
                }
                Err(error)
            }
        }
    }
}
