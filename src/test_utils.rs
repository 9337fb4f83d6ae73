//! Test utilities for the discovery engine
//!
//! Scripted fetchers, a stub language model, sample products, an isolated
//! in-memory database and HTML fixtures shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use url::Url;

use crate::domain::{Currency, FetchFailure, FetchTier, NormalizedProduct, Price, Retailer, SiteRequest};
use crate::infrastructure::database_connection::DatabaseConnection;
use crate::infrastructure::fetching::PageFetcher;
use crate::infrastructure::llm_client::LanguageModel;

/// Test database configuration
pub struct TestDatabase {
    pub connection: DatabaseConnection,
}

impl TestDatabase {
    /// Create a fresh, migrated in-memory database
    pub async fn new() -> Result<Self> {
        let db = DatabaseConnection::new("sqlite::memory:").await?;
        db.migrate().await?;
        Ok(Self { connection: db })
    }

    pub fn pool(&self) -> &SqlitePool {
        self.connection.pool()
    }
}

#[macro_export]
macro_rules! test_db {
    () => {{
        $crate::test_utils::TestDatabase::new().await.expect("Failed to create test database")
    }};
}

/// A [`PageFetcher`] that replays a fixed script of results.
///
/// Calls past the end of the script fail with a transport error.
pub struct ScriptedFetcher {
    tier: FetchTier,
    script: Mutex<VecDeque<Result<String, FetchFailure>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new<I>(tier: FetchTier, script: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Result<String, FetchFailure>>,
    {
        Arc::new(Self {
            tier,
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn primary<I>(script: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Result<String, FetchFailure>>,
    {
        Self::new(FetchTier::Primary, script)
    }

    pub fn fallback<I>(script: I) -> Arc<Self>
    where
        I: IntoIterator<Item = Result<String, FetchFailure>>,
    {
        Self::new(FetchTier::Fallback, script)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    fn tier(&self) -> FetchTier {
        self.tier
    }

    async fn fetch(&self, _request: &SiteRequest) -> Result<String, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchFailure::transport("script exhausted")))
    }
}

/// Language model with a canned reply or a canned failure
pub struct StubLanguageModel {
    reply: Result<String, String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl StubLanguageModel {
    pub fn replying(json: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Ok(json.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Err(message.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts received so far, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for StubLanguageModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete_json(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}

/// A normalized product for `url`; the retailer follows the host name
pub fn sample_product(url: &str) -> NormalizedProduct {
    let source_url = Url::parse(url).unwrap();
    let host = source_url.host_str().unwrap_or_default();
    let retailer = if host.contains("ajio") {
        Retailer::Ajio
    } else if host.contains("amazon") {
        Retailer::Amazon
    } else {
        Retailer::Myntra
    };

    NormalizedProduct {
        retailer,
        title: Some("Roadster Men Blue Denim Jacket".to_string()),
        price: Price::known(1799.0, Currency::Inr),
        image_url: None,
        source_url,
        scraped_at: Utc::now(),
    }
}

/// Trimmed-down copies of real search result pages
pub mod fixtures {
    pub const MYNTRA_RESULTS: &str = r#"<!DOCTYPE html>
<html><body>
<div class="search-searchProductsContainer">
  <ul class="results-base">
    <li class="product-base">
      <a href="/jackets/roadster/roadster-men-blue-denim-jacket/1001/buy">
        <picture><img class="img-responsive" src="https://assets.myntassets.com/1001.jpg"></picture>
        <div class="product-productMetaInfo">
          <h3 class="product-brand">Roadster</h3>
          <h4 class="product-product">Men Blue   Denim Jacket</h4>
          <div class="product-price"><span class="product-discountedPrice">Rs. 1799</span></div>
        </div>
      </a>
    </li>
    <li class="product-base">
      <a href="/jackets/here-now/here-now-men-washed-denim-jacket/1002/buy">
        <picture><img class="img-responsive" src="https://assets.myntassets.com/1002.jpg"></picture>
        <div class="product-productMetaInfo">
          <h3 class="product-brand">HERE&amp;NOW</h3>
          <h4 class="product-product">Men Washed Denim Jacket</h4>
          <div class="product-price"><span>Rs. 2199</span></div>
        </div>
      </a>
    </li>
    <li class="product-base">
      <a href="/jackets/wrogn/wrogn-men-navy-denim-jacket/1003/buy">
        <picture><img class="img-responsive" src="https://assets.myntassets.com/1003.jpg"></picture>
        <div class="product-productMetaInfo">
          <h3 class="product-brand">WROGN</h3>
          <h4 class="product-product">Men Navy Denim Jacket</h4>
        </div>
      </a>
    </li>
    <li class="product-base"><div class="product-sliderContainer"></div></li>
  </ul>
</div>
</body></html>"#;

    pub const AJIO_RESULTS: &str = r#"<!DOCTYPE html>
<html><body>
<div class="list-container">
  <div class="item">
    <a class="rilrtl-products-list__item-link" href="/dnmx-slim-fit-linen-shirt/p/441">
      <img class="rilrtl-lazy-img" src="https://assets.ajio.com/441.jpg">
      <div class="brand">DNMX</div>
      <div class="nameCls">Slim Fit Linen Shirt</div>
      <span class="price">₹899</span>
    </a>
  </div>
  <div class="item">
    <a class="rilrtl-products-list__item-link" href="/netplay-linen-blend-shirt/p/442">
      <img class="rilrtl-lazy-img" data-src="https://assets.ajio.com/442.jpg">
      <div class="brand">NETPLAY</div>
      <div class="nameCls">Linen Blend Shirt</div>
      <span class="price">₹1,299</span>
    </a>
  </div>
</div>
</body></html>"#;

    pub const AMAZON_RESULTS: &str = r#"<!DOCTYPE html>
<html><body>
<div class="s-main-slot">
  <div data-component-type="s-search-result" data-asin="B0C1">
    <img class="s-image" src="https://m.media-amazon.com/images/I/B0C1.jpg">
    <h2><a class="a-link-normal" href="/Levis-Chinos/dp/B0C1/ref=sr_1_1?keywords=chinos">
      <span class="a-text-normal">Levi's Men Slim Fit Chinos</span>
    </a></h2>
    <span class="a-price"><span class="a-price-whole">1,049.</span></span>
  </div>
  <div data-component-type="s-search-result" data-asin="B0C2">
    <img class="s-image" src="https://m.media-amazon.com/images/I/B0C2.jpg">
    <h2><a class="a-link-normal" href="/Allen-Solly-Chinos/dp/B0C2">
      <span class="a-text-normal">Allen Solly Men Beige Chinos</span>
    </a></h2>
    <span class="a-price"><span class="a-offscreen">₹1,399.00</span></span>
  </div>
</div>
</body></html>"#;

    /// A well-formed page that simply has no matching products
    pub const EMPTY_RESULTS: &str = r#"<!DOCTYPE html>
<html><body>
<div class="search-searchProductsContainer">
  <ul class="results-base"></ul>
  <p class="index-infoText">We couldn't find any matches!</p>
</div>
</body></html>"#;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_creation() {
        let db = test_db!();
        assert!(!db.pool().is_closed());
    }

    #[tokio::test]
    async fn scripted_fetcher_replays_then_fails() {
        let fetcher = ScriptedFetcher::primary([Ok("page".to_string())]);
        let request = SiteRequest {
            retailer: Retailer::Ajio,
            target_url: "https://www.ajio.com/search/?text=x".into(),
            wait_selector: ".list-container".into(),
            headers: Vec::new(),
        };
        assert_eq!(fetcher.fetch(&request).await.unwrap(), "page");
        assert!(matches!(fetcher.fetch(&request).await, Err(FetchFailure::Transport { .. })));
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn sample_product_follows_host() {
        assert_eq!(sample_product("https://www.amazon.in/dp/X").retailer, Retailer::Amazon);
        assert_eq!(sample_product("https://www.ajio.com/p/1").retailer, Retailer::Ajio);
    }
}
