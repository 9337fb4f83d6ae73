//! Out-of-band retry of failed attribute extraction
//!
//! Discovery never waits on a second extraction attempt. Entries stored
//! with confidence 0 are picked up here later, re-extracted in batches and
//! updated in place without touching their sighting counters.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{AttributeSet, CatalogEntry, CatalogStore, NormalizedProduct};
use crate::infrastructure::attribute_extractor::AttributeExtractor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub examined: usize,
    pub updated: usize,
    pub failed_batches: usize,
}

pub struct AttributeRefreshPass {
    store: Arc<dyn CatalogStore>,
    extractor: AttributeExtractor,
    batch_size: usize,
}

impl AttributeRefreshPass {
    pub fn new(store: Arc<dyn CatalogStore>, extractor: AttributeExtractor, batch_size: usize) -> Self {
        Self {
            store,
            extractor,
            batch_size: batch_size.max(1),
        }
    }

    /// Re-extracts up to `limit` pending entries
    pub async fn run(&self, limit: usize) -> Result<RefreshSummary> {
        let mut summary = RefreshSummary::default();
        if !self.extractor.is_enabled() {
            info!("🏷️ Attribute refresh skipped: no language model configured");
            return Ok(summary);
        }

        let pending = self
            .store
            .pending_extraction(limit)
            .await
            .context("Failed to list entries pending extraction")?;
        summary.examined = pending.len();

        for chunk in pending.chunks(self.batch_size) {
            let products: Vec<NormalizedProduct> = chunk.iter().map(|e| e.product.clone()).collect();
            let sets = match self.extractor.extract_batch(&products, None).await {
                Ok(sets) => sets,
                Err(e) => {
                    warn!("🏷️ Refresh batch of {} failed: {}", chunk.len(), e);
                    summary.failed_batches += 1;
                    continue;
                }
            };

            for (entry, attributes) in chunk.iter().zip(sets) {
                // still nothing usable; keep it pending
                if attributes.confidence <= 0.0 {
                    continue;
                }
                if self.refresh_entry(entry, attributes).await? {
                    summary.updated += 1;
                }
            }
        }

        info!(
            "✅ Attribute refresh: {} examined, {} updated, {} failed batches",
            summary.examined, summary.updated, summary.failed_batches
        );
        Ok(summary)
    }

    async fn refresh_entry(&self, entry: &CatalogEntry, attributes: AttributeSet) -> Result<bool> {
        let updated = self
            .store
            .update_attributes(&entry.identity_key, attributes)
            .await
            .with_context(|| format!("Failed to update attributes of {}", entry.identity_key))?;
        Ok(updated.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::memory_catalog::InMemoryCatalogStore;
    use crate::test_utils::{StubLanguageModel, sample_product};

    async fn seeded_store() -> Arc<InMemoryCatalogStore> {
        let store = Arc::new(InMemoryCatalogStore::new());
        for url in ["https://www.myntra.com/a/1", "https://www.myntra.com/a/2"] {
            store.upsert(sample_product(url), AttributeSet::unknown()).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn refresh_fills_pending_entries() {
        let store = seeded_store().await;
        let model = StubLanguageModel::replying(
            r#"[{"category": "jacket", "colors": "blue", "confidence": 0.9},
                {"category": "jacket", "colors": "black", "confidence": 0.7}]"#,
        );
        let pass = AttributeRefreshPass::new(store.clone(), AttributeExtractor::new(model), 10);

        let summary = pass.run(10).await.unwrap();

        assert_eq!(summary.examined, 2);
        assert_eq!(summary.updated, 2);
        assert!(store.pending_extraction(10).await.unwrap().is_empty());
        assert!(store.all().await.iter().all(|e| e.occurrence_count == 1));
    }

    #[tokio::test]
    async fn failed_batch_leaves_entries_pending() {
        let store = seeded_store().await;
        let model = StubLanguageModel::failing("503");
        let pass = AttributeRefreshPass::new(store.clone(), AttributeExtractor::new(model.clone()), 1);

        let summary = pass.run(10).await.unwrap();

        assert_eq!(model.calls(), 2);
        assert_eq!(summary.failed_batches, 2);
        assert_eq!(summary.updated, 0);
        assert_eq!(store.pending_extraction(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn disabled_extractor_is_a_no_op() {
        let store = seeded_store().await;
        let pass = AttributeRefreshPass::new(store, AttributeExtractor::disabled(), 5);
        assert_eq!(pass.run(5).await.unwrap(), RefreshSummary::default());
    }
}
