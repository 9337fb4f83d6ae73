//! Shared fetch contract and response classification
//!
//! Both tiers implement [`PageFetcher`] and run every response through
//! [`classify_response`], so a 403 from the proxy and a captcha page
//! rendered by the browser surface as the same `Blocked` failure.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::domain::{FetchFailure, FetchTier, SiteRequest};

/// Retrieves the raw listing page for a site request
#[async_trait]
pub trait PageFetcher: Send + Sync {
    fn tier(&self) -> FetchTier;

    async fn fetch(&self, request: &SiteRequest) -> Result<String, FetchFailure>;
}

/// Lowercase phrases found on bot-wall pages of the supported retailers
const BOT_WALL_MARKERS: &[&str] = &[
    "validatecaptcha",
    "enter the characters you see below",
    "robot check",
    "unusual traffic from your computer",
    "are you a human",
    "pardon our interruption",
    "<title>access denied</title>",
    "request blocked",
];

/// Only the head of a page is scanned; bot walls are short
const BOT_WALL_SCAN_BYTES: usize = 64 * 1024;

/// Returns the bot-wall marker found in `body`, if any
pub fn detect_bot_wall(body: &str) -> Option<&'static str> {
    let mut end = body.len().min(BOT_WALL_SCAN_BYTES);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    let head = body[..end].to_lowercase();
    BOT_WALL_MARKERS.iter().copied().find(|marker| head.contains(marker))
}

/// Parses a `Retry-After` header given in seconds
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps an HTTP response onto the fetch outcome contract
pub fn classify_response(
    status: StatusCode,
    retry_after: Option<&str>,
    body: String,
) -> Result<String, FetchFailure> {
    match status.as_u16() {
        200..=299 => match detect_bot_wall(&body) {
            Some(marker) => Err(FetchFailure::blocked(format!("bot wall: {marker}"))),
            None => Ok(body),
        },
        401 | 403 => Err(FetchFailure::blocked(format!("HTTP {status}"))),
        429 => Err(FetchFailure::RateLimited {
            retry_after: parse_retry_after(retry_after),
        }),
        408 | 504 => Err(FetchFailure::timeout(format!("HTTP {status}"))),
        _ => Err(FetchFailure::transport(format!("HTTP {status}"))),
    }
}

/// Maps a client-side `reqwest` error
pub fn classify_transport_error(error: &reqwest::Error) -> FetchFailure {
    if error.is_timeout() {
        FetchFailure::timeout(error.to_string())
    } else {
        FetchFailure::transport(error.to_string())
    }
}
