//! End-to-end discovery scenarios driven through stub collaborators
//!
//! Fetchers, the language model and the clock are replaced; adapters,
//! retry escalation, normalization, extraction validation and the catalog
//! stores are the real ones.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::time::Instant;

use retail_discovery_lib::application::{DiscoveryOrchestrator, OrchestratorSettings, Page, RankingPolicy};
use retail_discovery_lib::domain::{
    CatalogStore, DiscoveryError, DiscoveryEvent, FetchFailure, FetchTier, ProductQuery, Retailer,
    SiteRequest,
};
use retail_discovery_lib::infrastructure::{
    AttributeExtractor, BackoffPolicy, DatabaseConnection, EventLog, EventSink, InMemoryCatalogStore,
    LanguageModel, PageFetcher, RetryController, SqliteCatalogStore,
};

const MYNTRA_PAGE: &str = r#"<html><body><ul class="results-base">
  <li class="product-base"><a href="/jackets/roadster/roadster-men-blue-denim-jacket/1001/buy">
    <img src="https://assets.myntassets.com/1001.jpg">
    <h3 class="product-brand">Roadster</h3><h4 class="product-product">Men Blue Denim Jacket</h4>
    <div class="product-price"><span class="product-discountedPrice">Rs. 1799</span></div></a></li>
  <li class="product-base"><a href="/jackets/here-now/here-now-men-washed-denim-jacket/1002/buy">
    <img src="https://assets.myntassets.com/1002.jpg">
    <h3 class="product-brand">HERE&amp;NOW</h3><h4 class="product-product">Men Washed Denim Jacket</h4>
    <div class="product-price"><span class="product-discountedPrice">Rs. 2199</span></div></a></li>
  <li class="product-base"><a href="/jackets/wrogn/wrogn-men-navy-denim-jacket/1003/buy">
    <img src="https://assets.myntassets.com/1003.jpg">
    <h3 class="product-brand">WROGN</h3><h4 class="product-product">Men Navy Denim Jacket</h4>
    <div class="product-price"><span class="product-discountedPrice">Rs. 2499</span></div></a></li>
</ul></body></html>"#;

const EMPTY_PAGE: &str = r#"<html><body><ul class="results-base"></ul></body></html>"#;

const ATTRIBUTES_REPLY: &str = r#"{"products": [
  {"gender": "men", "category": "denim jacket", "colors": ["blue"], "material": "denim", "fit": "regular", "brand": "Roadster", "confidence": 0.9},
  {"gender": "men", "category": "denim jacket", "colors": ["light blue"], "material": "denim", "confidence": 0.8},
  {"gender": "men", "category": "denim jacket", "colors": ["navy"], "material": "denim", "confidence": 0.85}
]}"#;

enum Reply {
    Page(Result<String, FetchFailure>),
    Hang,
}

/// Replays a per-retailer script; unscripted calls fail with a transport error
struct StubFetcher {
    tier: FetchTier,
    script: Mutex<HashMap<Retailer, VecDeque<Reply>>>,
    calls: AtomicUsize,
}

impl StubFetcher {
    fn new(tier: FetchTier) -> Arc<Self> {
        Arc::new(Self {
            tier,
            script: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn then(self: &Arc<Self>, retailer: Retailer, reply: Reply) -> Arc<Self> {
        self.script.lock().unwrap().entry(retailer).or_default().push_back(reply);
        Arc::clone(self)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageFetcher for StubFetcher {
    fn tier(&self) -> FetchTier {
        self.tier
    }

    async fn fetch(&self, request: &SiteRequest) -> Result<String, FetchFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .script
            .lock()
            .unwrap()
            .get_mut(&request.retailer)
            .and_then(VecDeque::pop_front);
        match reply {
            Some(Reply::Page(result)) => result,
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(FetchFailure::transport("unscripted call")),
        }
    }
}

struct StubModel {
    reply: Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl LanguageModel for StubModel {
    fn name(&self) -> &str {
        "stub"
    }

    async fn complete_json(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.reply.clone().map_err(|e| anyhow!(e))
    }
}

fn model(reply: Result<&str, &str>) -> Arc<StubModel> {
    let reply = reply.map(ToString::to_string).map_err(ToString::to_string);
    Arc::new(StubModel {
        reply,
        prompts: Mutex::new(Vec::new()),
    })
}

fn extractor(reply: Result<&str, &str>) -> AttributeExtractor {
    AttributeExtractor::new(model(reply))
}

#[derive(Clone, Default)]
struct Recorded(Arc<Mutex<Vec<DiscoveryEvent>>>);

impl EventSink for Recorded {
    fn record(&mut self, event: &DiscoveryEvent) -> Result<()> {
        self.0.lock().unwrap().push(event.clone());
        Ok(())
    }
}

impl Recorded {
    fn names(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().iter().map(DiscoveryEvent::name).collect()
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        per_pair_timeout: Duration::from_secs(90),
        batch_deadline: Duration::from_secs(180),
        max_concurrent_pairs: 2,
        broaden_empty_queries: true,
    }
}

fn controller(primary: &Arc<StubFetcher>, fallback: &Arc<StubFetcher>, primary_attempts: u32) -> RetryController {
    let policy = BackoffPolicy {
        primary_attempts,
        ..BackoffPolicy::default()
    };
    RetryController::new(primary.clone(), Some(fallback.clone()), policy)
}

fn jacket_query() -> ProductQuery {
    ProductQuery::new(Retailer::Myntra, ["blue", "denim", "jacket"])
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(180)
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_with_backoff_then_three_entries_are_created() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Err(FetchFailure::timeout("30s"))))
        .then(Retailer::Myntra, Reply::Page(Err(FetchFailure::timeout("30s"))))
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())));
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 3),
        extractor(Ok(ATTRIBUTES_REPLY)),
        store.clone(),
        EventLog::noop(),
        settings(),
    );

    let started = Instant::now();
    let report = orchestrator.discover(vec![jacket_query()], deadline()).await;

    // 500ms + 1000ms of backoff between the three primary attempts
    assert!(started.elapsed() >= Duration::from_millis(1500));
    assert_eq!(primary.calls(), 3);
    assert_eq!(fallback.calls(), 0);

    let entries = report.outcomes[0].result.as_ref().unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries.iter().all(|e| e.occurrence_count == 1));
    assert_eq!(report.outcomes[0].tier, Some(FetchTier::Primary));
    assert_eq!(entries[0].attributes.category.as_deref(), Some("denim jacket"));
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn rerun_two_minutes_later_updates_entries_in_place() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite:{}", dir.path().join("catalog.db").display());
    let db = DatabaseConnection::new(&url).await?;
    db.migrate().await?;
    let store = Arc::new(SqliteCatalogStore::new(db.into_pool()));

    let now = Arc::new(Mutex::new(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()));
    let clock = {
        let now = Arc::clone(&now);
        Arc::new(move || *now.lock().unwrap()) as Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>
    };
    let repriced = MYNTRA_PAGE.replace("Rs. 1799", "Rs. 1599");
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())))
        .then(Retailer::Myntra, Reply::Page(Ok(repriced)));
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Ok(ATTRIBUTES_REPLY)),
        store.clone(),
        EventLog::noop(),
        settings(),
    )
    .with_clock(clock);

    let first = orchestrator.discover(vec![jacket_query()], deadline()).await;
    let first = first.outcomes[0].result.clone()?;

    *now.lock().unwrap() += chrono::Duration::minutes(2);
    let second = orchestrator.discover(vec![jacket_query()], deadline()).await;
    let second = second.outcomes[0].result.clone()?;

    assert_eq!(store.count().await?, 3);
    for (before, after) in first.iter().zip(&second) {
        assert_eq!(before.identity_key, after.identity_key);
        assert_eq!(after.occurrence_count, 2);
        assert_eq!(after.first_seen_at, before.first_seen_at);
        assert_eq!(after.last_seen_at - before.last_seen_at, chrono::Duration::minutes(2));
    }
    assert_eq!(first[0].product.price.amount, Some(1799.0));
    assert_eq!(second[0].product.price.amount, Some(1599.0));

    let stored = store.lookup(&second[0].identity_key).await?.unwrap();
    assert_eq!(stored.occurrence_count, 2);
    assert_eq!(stored.product.price.amount, Some(1599.0));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn blocked_primary_escalates_without_a_second_primary_attempt() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Err(FetchFailure::blocked("403 Forbidden"))));
    let fallback = StubFetcher::new(FetchTier::Fallback)
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())));
    let recorded = Recorded::default();
    let (events, drain) = EventLog::spawn(64, Some(Box::new(recorded.clone())));
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Ok(ATTRIBUTES_REPLY)),
        Arc::new(InMemoryCatalogStore::new()),
        events,
        settings(),
    );

    let report = orchestrator.discover(vec![jacket_query()], deadline()).await;
    drop(orchestrator);
    drain.finish().await;

    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 1);
    assert_eq!(report.outcomes[0].tier, Some(FetchTier::Fallback));
    assert_eq!(report.outcomes[0].result.as_ref().unwrap().len(), 3);

    let names = recorded.names();
    assert_eq!(names.first(), Some(&"pair_started"));
    assert!(names.contains(&"escalated"));
    assert_eq!(names.iter().filter(|n| **n == "entry_upserted").count(), 3);
    assert_eq!(names.last(), Some(&"pair_completed"));
}

#[tokio::test(start_paused = true)]
async fn empty_success_is_a_result_not_an_escalation() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Ok(EMPTY_PAGE.to_string())));
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Ok(ATTRIBUTES_REPLY)),
        Arc::new(InMemoryCatalogStore::new()),
        EventLog::noop(),
        settings(),
    );

    let query = ProductQuery::new(Retailer::Myntra, ["denim", "jacket"]);
    let report = orchestrator.discover(vec![query], deadline()).await;

    assert!(report.outcomes[0].result.as_ref().unwrap().is_empty());
    assert!(!report.outcomes[0].broadened);
    assert_eq!(primary.calls(), 1);
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn empty_long_query_is_broadened_once() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Ok(EMPTY_PAGE.to_string())))
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())));
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Ok(ATTRIBUTES_REPLY)),
        Arc::new(InMemoryCatalogStore::new()),
        EventLog::noop(),
        settings(),
    );

    let report = orchestrator.discover(vec![jacket_query()], deadline()).await;

    assert!(report.outcomes[0].broadened);
    assert_eq!(report.outcomes[0].result.as_ref().unwrap().len(), 3);
    assert_eq!(primary.calls(), 2);
    assert_eq!(fallback.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn extraction_failure_still_stores_unknown_attributes() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())));
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let store = Arc::new(InMemoryCatalogStore::new());
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Err("503 model overloaded")),
        store.clone(),
        EventLog::noop(),
        settings(),
    );

    let report = orchestrator.discover(vec![jacket_query()], deadline()).await;

    let entries = report.outcomes[0].result.as_ref().unwrap();
    assert_eq!(entries.len(), 3);
    for entry in entries {
        assert_eq!(entry.attributes.confidence, 0.0);
        assert!(entry.attributes.is_all_unknown());
    }
    assert_eq!(store.pending_extraction(10).await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_pairs_share_a_file_backed_catalog() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let url = format!("sqlite:{}", dir.path().join("catalog.db").display());
    let db = DatabaseConnection::new(&url).await?;
    db.migrate().await?;
    let store = Arc::new(SqliteCatalogStore::new(db.into_pool()));

    let primary = StubFetcher::new(FetchTier::Primary);
    for page in 1..=4 {
        primary.then(
            Retailer::Myntra,
            Reply::Page(Ok(MYNTRA_PAGE.replace("/100", &format!("/{}00", page)))),
        );
    }
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Ok(ATTRIBUTES_REPLY)),
        store.clone(),
        EventLog::noop(),
        OrchestratorSettings {
            max_concurrent_pairs: 4,
            ..settings()
        },
    );

    let batch = ["blue", "navy", "washed", "black"]
        .into_iter()
        .map(|color| ProductQuery::new(Retailer::Myntra, [color, "denim", "jacket"]))
        .collect();
    let report = orchestrator.discover(batch, deadline()).await;

    for outcome in &report.outcomes {
        assert_eq!(outcome.result.as_ref().map(Vec::len), Ok(3));
    }
    assert_eq!(store.count().await?, 12);
    assert_eq!(fallback.calls(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn category_hint_is_passed_to_attribute_extraction() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())));
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let model = model(Ok(ATTRIBUTES_REPLY));
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        AttributeExtractor::new(model.clone()),
        Arc::new(InMemoryCatalogStore::new()),
        EventLog::noop(),
        settings(),
    );

    let query = jacket_query().with_category_hint("Outerwear");
    let report = orchestrator.discover(vec![query], deadline()).await;

    assert!(report.outcomes[0].is_ok());
    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("\"outerwear\" category"));
}

#[tokio::test(start_paused = true)]
async fn deadline_times_out_one_slot_while_others_succeed() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())))
        .then(Retailer::Ajio, Reply::Hang);
    let fallback = StubFetcher::new(FetchTier::Fallback);
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Ok(ATTRIBUTES_REPLY)),
        Arc::new(InMemoryCatalogStore::new()),
        EventLog::noop(),
        settings(),
    );

    let batch = vec![
        jacket_query(),
        ProductQuery::new(Retailer::Ajio, ["linen", "shirt"]),
    ];
    let report = orchestrator
        .discover(batch, Instant::now() + Duration::from_secs(5))
        .await;

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].query.retailer(), Retailer::Myntra);
    assert_eq!(report.outcomes[0].result.as_ref().unwrap().len(), 3);
    assert_eq!(
        report.outcomes[1].result.as_ref().unwrap_err(),
        &DiscoveryError::Timeout { retailer: Retailer::Ajio }
    );
    assert_eq!(report.ranked(&RankingPolicy::PriceAscending, Page::first(2)).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_tiers_report_unavailable_without_failing_the_batch() {
    let primary = StubFetcher::new(FetchTier::Primary)
        .then(Retailer::Amazon, Reply::Page(Err(FetchFailure::RateLimited { retry_after: None })))
        .then(Retailer::Amazon, Reply::Page(Err(FetchFailure::RateLimited { retry_after: None })))
        .then(Retailer::Myntra, Reply::Page(Ok(MYNTRA_PAGE.to_string())));
    let fallback = StubFetcher::new(FetchTier::Fallback)
        .then(Retailer::Amazon, Reply::Page(Err(FetchFailure::blocked("captcha"))));
    let orchestrator = DiscoveryOrchestrator::new(
        controller(&primary, &fallback, 2),
        extractor(Ok(ATTRIBUTES_REPLY)),
        Arc::new(InMemoryCatalogStore::new()),
        EventLog::noop(),
        settings(),
    );

    let batch = vec![
        ProductQuery::new(Retailer::Amazon, ["chinos"]),
        jacket_query(),
    ];
    let report = orchestrator.discover(batch, deadline()).await;

    assert_eq!(report.succeeded(), 1);
    match report.outcomes[0].result.as_ref().unwrap_err() {
        DiscoveryError::Unavailable { retailer, attempts, last_failure } => {
            assert_eq!(*retailer, Retailer::Amazon);
            assert_eq!(*attempts, 3);
            assert!(matches!(last_failure, FetchFailure::Blocked { .. }));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
