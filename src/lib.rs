//! Retail Discovery - hybrid apparel listing discovery engine
//!
//! Turns structured product queries into deduplicated, attribute-enriched
//! catalog entries. Listings are fetched through a rotating proxy service
//! first and through a stealth browser session pool when the proxy path is
//! blocked or exhausted.

// Module declarations
pub mod domain;
pub mod infrastructure;
pub mod application;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export the entry points most callers need
pub use application::{DiscoveryOrchestrator, DiscoveryReport, PairOutcome, RankingPolicy};
pub use domain::{
    AttributeSet, CatalogEntry, DiscoveryError, NormalizedProduct, ProductQuery, Retailer,
};
