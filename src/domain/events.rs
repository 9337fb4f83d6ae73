use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::ErrorTaxonomy;
use super::query::Retailer;

/// Which data path produced a fetch result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchTier {
    Primary,
    Fallback,
}

/// Best-effort discovery telemetry, drained by the event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    PairStarted {
        retailer: Retailer,
        query: String,
        at: DateTime<Utc>,
    },
    Escalated {
        retailer: Retailer,
        reason: String,
        at: DateTime<Utc>,
    },
    ListingsFetched {
        retailer: Retailer,
        tier: FetchTier,
        listings: usize,
        incomplete_fields: usize,
        at: DateTime<Utc>,
    },
    ListingsDropped {
        retailer: Retailer,
        dropped: usize,
        at: DateTime<Utc>,
    },
    ExtractionFailed {
        retailer: Retailer,
        reason: String,
        at: DateTime<Utc>,
    },
    EntryUpserted {
        retailer: Retailer,
        identity_key: String,
        occurrence_count: u32,
        at: DateTime<Utc>,
    },
    PairFailed {
        retailer: Retailer,
        taxonomy: ErrorTaxonomy,
        message: String,
        at: DateTime<Utc>,
    },
    PairCompleted {
        retailer: Retailer,
        entries: usize,
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
}

impl DiscoveryEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PairStarted { .. } => "pair_started",
            Self::Escalated { .. } => "escalated",
            Self::ListingsFetched { .. } => "listings_fetched",
            Self::ListingsDropped { .. } => "listings_dropped",
            Self::ExtractionFailed { .. } => "extraction_failed",
            Self::EntryUpserted { .. } => "entry_upserted",
            Self::PairFailed { .. } => "pair_failed",
            Self::PairCompleted { .. } => "pair_completed",
        }
    }
}
