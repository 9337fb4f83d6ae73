//! Catalog store contract
//!
//! The engine only depends on this trait; storage engines live in the
//! infrastructure layer.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::product::{AttributeSet, CatalogEntry, IdentityKey, NormalizedProduct};
use super::query::Retailer;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Inserts a new entry or merges into the existing one for the same
    /// identity key. Upserts on one key are serialized.
    async fn upsert(&self, product: NormalizedProduct, attributes: AttributeSet) -> Result<CatalogEntry>;

    async fn lookup(&self, key: &IdentityKey) -> Result<Option<CatalogEntry>>;

    /// Structured catalog search with paging
    async fn search(&self, criteria: &CatalogSearch) -> Result<Vec<CatalogEntry>>;

    /// Entries whose attribute extraction has not succeeded yet (confidence 0)
    async fn pending_extraction(&self, limit: usize) -> Result<Vec<CatalogEntry>>;

    /// Replaces attributes only; sighting counters are untouched
    async fn update_attributes(&self, key: &IdentityKey, attributes: AttributeSet) -> Result<Option<CatalogEntry>>;
}

/// Search and filter criteria (case-insensitive substring matches)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSearch {
    pub category: Option<String>,
    pub color: Option<String>,
    pub brand: Option<String>,
    pub retailer: Option<Retailer>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for CatalogSearch {
    fn default() -> Self {
        Self {
            category: None,
            color: None,
            brand: None,
            retailer: None,
            skip: 0,
            limit: 20,
        }
    }
}

impl CatalogSearch {
    /// In-process filter used by stores that cannot push predicates down
    pub fn matches(&self, entry: &CatalogEntry) -> bool {
        fn contains(haystack: Option<&str>, needle: Option<&String>) -> bool {
            needle.is_none_or(|n| {
                haystack.is_some_and(|h| h.to_lowercase().contains(&n.to_lowercase()))
            })
        }

        let attrs = &entry.attributes;
        self.retailer.is_none_or(|r| entry.product.retailer == r)
            && contains(attrs.category.as_deref(), self.category.as_ref())
            && contains(attrs.brand.as_deref(), self.brand.as_ref())
            && self.color.as_ref().is_none_or(|c| {
                let c = c.to_lowercase();
                attrs.colors.iter().any(|known| known.contains(&c))
            })
    }
}
