//! SQLite implementation of the catalog store
//!
//! Upserts for one identity key are serialized with a per-key async lock
//! and run as read-merge-write inside a single transaction, so concurrent
//! sightings of the same product never lose an occurrence count. Write
//! transactions start `IMMEDIATE`: upserts of different keys on other pool
//! connections wait on the busy timeout instead of failing on a lock upgrade.

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;
use url::Url;

use crate::domain::{
    AttributeSet, CatalogEntry, CatalogSearch, CatalogStore, Currency, IdentityKey,
    NormalizedProduct, Price, Retailer,
};
use crate::infrastructure::key_locks::KeyedLocks;

const SELECT_COLUMNS: &str = r#"
    SELECT identity_key, retailer, title, price_amount, price_currency, image_url,
           source_url, scraped_at, attributes, first_seen_at, last_seen_at, occurrence_count
    FROM catalog_entries
"#;

#[derive(Clone)]
pub struct SqliteCatalogStore {
    pool: Arc<SqlitePool>,
    locks: Arc<KeyedLocks<IdentityKey>>,
}

impl SqliteCatalogStore {
    /// Expects a migrated pool (see `DatabaseConnection::migrate`)
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool: Arc::new(pool),
            locks: Arc::new(KeyedLocks::new()),
        }
    }

    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM catalog_entries")
            .fetch_one(&*self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as u64)
    }

    async fn fetch_in(tx: &mut Transaction<'_, Sqlite>, key: &IdentityKey) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query(&format!("{} WHERE identity_key = ?", SELECT_COLUMNS))
            .bind(key.as_str())
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn write_in(tx: &mut Transaction<'_, Sqlite>, entry: &CatalogEntry) -> Result<()> {
        let product = &entry.product;
        let attributes = serde_json::to_string(&entry.attributes).context("Failed to encode attributes")?;
        let colors = entry.attributes.colors.iter().cloned().collect::<Vec<_>>().join(",");

        sqlx::query(
            r#"
            INSERT INTO catalog_entries
            (identity_key, retailer, title, price_amount, price_currency, image_url, source_url,
             scraped_at, attributes, confidence, category, brand, colors,
             first_seen_at, last_seen_at, occurrence_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity_key) DO UPDATE SET
                title = excluded.title,
                price_amount = excluded.price_amount,
                price_currency = excluded.price_currency,
                image_url = excluded.image_url,
                source_url = excluded.source_url,
                scraped_at = excluded.scraped_at,
                attributes = excluded.attributes,
                confidence = excluded.confidence,
                category = excluded.category,
                brand = excluded.brand,
                colors = excluded.colors,
                last_seen_at = excluded.last_seen_at,
                occurrence_count = excluded.occurrence_count
            "#,
        )
        .bind(entry.identity_key.as_str())
        .bind(product.retailer.slug())
        .bind(product.title.as_deref())
        .bind(product.price.amount)
        .bind(product.price.currency.code())
        .bind(product.image_url.as_ref().map(Url::as_str))
        .bind(product.source_url.as_str())
        .bind(product.scraped_at)
        .bind(attributes)
        .bind(f64::from(entry.attributes.confidence))
        .bind(entry.attributes.category.as_deref())
        .bind(entry.attributes.brand.as_deref())
        .bind(colors)
        .bind(entry.first_seen_at)
        .bind(entry.last_seen_at)
        .bind(i64::from(entry.occurrence_count))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn upsert(&self, product: NormalizedProduct, attributes: AttributeSet) -> Result<CatalogEntry> {
        let key = product.identity_key();
        let _guard = self.locks.lock(&key).await;

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let entry = match Self::fetch_in(&mut tx, &key).await? {
            Some(mut existing) => {
                existing.record_sighting(product, attributes);
                existing
            }
            None => CatalogEntry::first_sighting(product, attributes),
        };
        Self::write_in(&mut tx, &entry).await?;
        tx.commit().await?;

        debug!("💾 Upserted {} (seen {}x)", entry.identity_key, entry.occurrence_count);
        Ok(entry)
    }

    async fn lookup(&self, key: &IdentityKey) -> Result<Option<CatalogEntry>> {
        let row = sqlx::query(&format!("{} WHERE identity_key = ?", SELECT_COLUMNS))
            .bind(key.as_str())
            .fetch_optional(&*self.pool)
            .await?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn search(&self, criteria: &CatalogSearch) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(&format!(
            r#"{}
            WHERE (?1 IS NULL OR retailer = ?1)
              AND (?2 IS NULL OR category LIKE ?2 ESCAPE '\')
              AND (?3 IS NULL OR brand LIKE ?3 ESCAPE '\')
              AND (?4 IS NULL OR colors LIKE ?4 ESCAPE '\')
            ORDER BY last_seen_at DESC, identity_key
            LIMIT ?5 OFFSET ?6"#,
            SELECT_COLUMNS
        ))
        .bind(criteria.retailer.map(Retailer::slug))
        .bind(criteria.category.as_deref().map(like_pattern))
        .bind(criteria.brand.as_deref().map(like_pattern))
        .bind(criteria.color.as_deref().map(like_pattern))
        .bind(i64::try_from(criteria.limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(criteria.skip).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn pending_extraction(&self, limit: usize) -> Result<Vec<CatalogEntry>> {
        let rows = sqlx::query(&format!(
            "{} WHERE confidence <= 0 ORDER BY last_seen_at DESC, identity_key LIMIT ?",
            SELECT_COLUMNS
        ))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await?;

        rows.iter().map(row_to_entry).collect()
    }

    async fn update_attributes(&self, key: &IdentityKey, attributes: AttributeSet) -> Result<Option<CatalogEntry>> {
        let _guard = self.locks.lock(key).await;

        let mut tx = self.pool.begin_with("BEGIN IMMEDIATE").await?;
        let Some(mut entry) = Self::fetch_in(&mut tx, key).await? else {
            return Ok(None);
        };
        entry.attributes = attributes;
        Self::write_in(&mut tx, &entry).await?;
        tx.commit().await?;
        Ok(Some(entry))
    }
}

/// Case-insensitive substring pattern with LIKE wildcards escaped
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn row_to_entry(row: &SqliteRow) -> Result<CatalogEntry> {
    let retailer: String = row.get("retailer");
    let retailer: Retailer = retailer.parse().map_err(|e: String| anyhow!(e))?;

    let source_url: String = row.get("source_url");
    let image_url: Option<String> = row.get("image_url");
    let attributes: String = row.get("attributes");
    let price_amount: Option<f64> = row.get("price_amount");
    let price_currency: String = row.get("price_currency");
    let occurrence_count: i64 = row.get("occurrence_count");
    let scraped_at: DateTime<Utc> = row.get("scraped_at");

    let product = NormalizedProduct {
        retailer,
        title: row.get("title"),
        price: price_amount.map_or_else(Price::unknown, |a| Price::known(a, Currency::from_code(&price_currency))),
        image_url: image_url.and_then(|u| Url::parse(&u).ok()),
        source_url: Url::parse(&source_url).with_context(|| format!("Stored source_url is invalid: {}", source_url))?,
        scraped_at,
    };

    Ok(CatalogEntry {
        identity_key: IdentityKey::from_hex(row.get::<String, _>("identity_key")),
        product,
        attributes: serde_json::from_str(&attributes).context("Stored attributes are invalid")?,
        first_seen_at: row.get("first_seen_at"),
        last_seen_at: row.get("last_seen_at"),
        occurrence_count: u32::try_from(occurrence_count).unwrap_or(u32::MAX),
    })
}
