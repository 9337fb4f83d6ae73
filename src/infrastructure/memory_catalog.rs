//! In-process catalog store with the same merge semantics as SQLite

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{AttributeSet, CatalogEntry, CatalogSearch, CatalogStore, IdentityKey, NormalizedProduct};

/// Every mutation happens under one write lock, which also serializes
/// upserts per identity key.
#[derive(Default)]
pub struct InMemoryCatalogStore {
    entries: RwLock<HashMap<IdentityKey, CatalogEntry>>,
}

impl InMemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn all(&self) -> Vec<CatalogEntry> {
        let mut all: Vec<_> = self.entries.read().await.values().cloned().collect();
        sort_recent_first(&mut all);
        all
    }
}

fn sort_recent_first(entries: &mut [CatalogEntry]) {
    entries.sort_by(|a, b| {
        b.last_seen_at
            .cmp(&a.last_seen_at)
            .then_with(|| a.identity_key.cmp(&b.identity_key))
    });
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    async fn upsert(&self, product: NormalizedProduct, attributes: AttributeSet) -> Result<CatalogEntry> {
        let key = product.identity_key();
        let mut entries = self.entries.write().await;
        let entry = match entries.entry(key) {
            Entry::Occupied(mut existing) => {
                existing.get_mut().record_sighting(product, attributes);
                existing.get().clone()
            }
            Entry::Vacant(slot) => slot.insert(CatalogEntry::first_sighting(product, attributes)).clone(),
        };
        Ok(entry)
    }

    async fn lookup(&self, key: &IdentityKey) -> Result<Option<CatalogEntry>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn search(&self, criteria: &CatalogSearch) -> Result<Vec<CatalogEntry>> {
        let mut found: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| criteria.matches(e))
            .cloned()
            .collect();
        sort_recent_first(&mut found);
        Ok(found.into_iter().skip(criteria.skip).take(criteria.limit).collect())
    }

    async fn pending_extraction(&self, limit: usize) -> Result<Vec<CatalogEntry>> {
        let mut pending: Vec<_> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.attributes.confidence <= 0.0)
            .cloned()
            .collect();
        sort_recent_first(&mut pending);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_attributes(&self, key: &IdentityKey, attributes: AttributeSet) -> Result<Option<CatalogEntry>> {
        let mut entries = self.entries.write().await;
        Ok(entries.get_mut(key).map(|entry| {
            entry.attributes = attributes;
            entry.clone()
        }))
    }
}
