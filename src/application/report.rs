//! Batch results handed back to the caller

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::ranking::RankingPolicy;
use crate::domain::{CatalogEntry, DiscoveryError, FetchTier, ProductQuery};

/// Result slot for one (retailer, query) pair
#[derive(Debug, Clone, Serialize)]
pub struct PairOutcome {
    pub query: ProductQuery,
    pub result: Result<Vec<CatalogEntry>, DiscoveryError>,
    /// Tier that produced the listings, when a fetch succeeded
    pub tier: Option<FetchTier>,
    /// Whether the zero-result query was retried with fewer keywords
    pub broadened: bool,
    pub elapsed_ms: u64,
}

impl PairOutcome {
    pub(crate) fn failed(query: ProductQuery, error: DiscoveryError, elapsed_ms: u64) -> Self {
        Self {
            query,
            result: Err(error),
            tier: None,
            broadened: false,
            elapsed_ms,
        }
    }

    pub const fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Zero-based page of ranked entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    pub const fn first(size: usize) -> Self {
        Self { number: 0, size }
    }

    const fn offset(self) -> usize {
        self.number.saturating_mul(self.size)
    }
}

/// Outcome of one `discover` call: exactly one slot per requested query,
/// in request order.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<PairOutcome>,
    pub elapsed_ms: u64,
    /// Events the event log could not queue during this batch
    pub events_dropped: u64,
}

impl DiscoveryReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ProductQuery, &DiscoveryError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.query, e)))
    }

    /// Successful entries across all pairs, in slot order
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .flatten()
    }

    /// Every keyword of every query, in order of first appearance
    pub fn keywords(&self) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for keyword in self.outcomes.iter().flat_map(|o| o.query.keywords()) {
            if !keywords.contains(keyword) {
                keywords.push(keyword.clone());
            }
        }
        keywords
    }

    /// Flattens successful entries, ranks them and returns one page.
    ///
    /// An identity key reached by several pairs appears once, as the copy
    /// with the highest occurrence count (the latest upsert).
    pub fn ranked(&self, policy: &RankingPolicy, page: Page) -> Vec<CatalogEntry> {
        let mut unique: HashMap<&str, &CatalogEntry> = HashMap::new();
        for entry in self.entries() {
            unique
                .entry(entry.identity_key.as_str())
                .and_modify(|kept| {
                    if entry.occurrence_count > kept.occurrence_count {
                        *kept = entry;
                    }
                })
                .or_insert(entry);
        }

        let mut ranked: Vec<CatalogEntry> = unique.into_values().cloned().collect();
        policy.sort(&mut ranked);
        ranked.into_iter().skip(page.offset()).take(page.size).collect()
    }
}
