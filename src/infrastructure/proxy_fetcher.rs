//! Primary tier: rotating-proxy HTTP fetcher
//!
//! Requests go through a ScraperAPI-compatible endpoint when an API key is
//! configured, otherwise straight to the retailer. A `governor` limiter
//! caps the request rate and the user agent rotates per request.

#![allow(clippy::uninlined_format_args)]

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use reqwest::{Client, ClientBuilder, header};
use tracing::{debug, warn};
use url::Url;

use crate::domain::{FetchFailure, FetchTier, SiteRequest};
use crate::infrastructure::config::FetchConfig;
use crate::infrastructure::fetching::{PageFetcher, classify_response, classify_transport_error};

pub struct ProxyFetcher {
    client: Client,
    endpoint: Url,
    api_key: Option<String>,
    render_js: bool,
    user_agents: Vec<String>,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl ProxyFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .gzip(true)
            .brotli(true)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = Url::parse(&config.proxy_endpoint)
            .with_context(|| format!("Invalid proxy endpoint: {}", config.proxy_endpoint))?;

        let rps = NonZeroU32::new(config.max_requests_per_second)
            .context("max_requests_per_second must be greater than zero")?;

        if config.proxy_api_key.is_none() {
            warn!("⚠️ No proxy API key configured; primary tier will fetch pages directly");
        }

        Ok(Self {
            client,
            endpoint,
            api_key: config.proxy_api_key.clone(),
            render_js: config.render_js,
            user_agents: config.user_agents.clone(),
            rate_limiter: RateLimiter::direct(Quota::per_second(rps)),
        })
    }

    pub const fn is_proxied(&self) -> bool {
        self.api_key.is_some()
    }

    /// URL actually requested for `request`
    pub fn request_url(&self, request: &SiteRequest) -> Result<Url, FetchFailure> {
        let target = Url::parse(&request.target_url)
            .map_err(|e| FetchFailure::transport(format!("invalid target url: {}", e)))?;

        let Some(api_key) = &self.api_key else {
            return Ok(target);
        };

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("api_key", api_key)
            .append_pair("url", target.as_str())
            .append_pair("render", if self.render_js { "true" } else { "false" })
            .append_pair("keep_headers", "true");
        Ok(url)
    }

    fn pick_user_agent(&self) -> Option<&str> {
        if self.user_agents.is_empty() {
            return None;
        }
        let index = fastrand::usize(..self.user_agents.len());
        Some(self.user_agents[index].as_str())
    }
}

#[async_trait]
impl PageFetcher for ProxyFetcher {
    fn tier(&self) -> FetchTier {
        FetchTier::Primary
    }

    async fn fetch(&self, request: &SiteRequest) -> Result<String, FetchFailure> {
        let url = self.request_url(request)?;
        self.rate_limiter.until_ready().await;

        let mut builder = self.client.get(url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(agent) = self.pick_user_agent() {
            builder = builder.header(header::USER_AGENT, agent);
        }

        debug!("🌐 Primary fetch {} ({})", request.target_url, request.retailer);
        let response = builder
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| classify_transport_error(&e))?;

        debug!("📥 {} responded {} ({} bytes)", request.retailer, status, body.len());
        classify_response(status, retry_after.as_deref(), body)
    }
}
