//! Raw listing to canonical product mapping
//!
//! Pure and synchronous. Listings without a resolvable source URL are
//! dropped and counted; every other degraded field becomes unknown.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::domain::{Currency, NormalizedProduct, Price, RawListing, Retailer};
use crate::infrastructure::parsing::collapse_whitespace;

static NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("number pattern compiles"));

/// Placeholder prices some pages render instead of a value
const NO_PRICE_MARKERS: &[&str] = &["n/a", "na", "-", "--", "sold out", "out of stock", "currently unavailable"];

/// Result of normalizing one page of listings
#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizeReport {
    pub products: Vec<NormalizedProduct>,
    /// Listings that could not be normalized (no usable source URL)
    pub dropped: usize,
}

/// Normalizes a batch of listings scraped at `scraped_at`
pub fn normalize_listings(
    retailer: Retailer,
    listings: Vec<RawListing>,
    scraped_at: DateTime<Utc>,
) -> NormalizeReport {
    let mut report = NormalizeReport::default();
    for listing in listings {
        match normalize_listing(retailer, listing, scraped_at) {
            Some(product) => report.products.push(product),
            None => report.dropped += 1,
        }
    }
    if report.dropped > 0 {
        debug!("{} dropped {} listings during normalization", retailer, report.dropped);
    }
    report
}

/// `None` when the listing has no well-formed absolute http(s) URL
pub fn normalize_listing(
    retailer: Retailer,
    listing: RawListing,
    scraped_at: DateTime<Utc>,
) -> Option<NormalizedProduct> {
    let source_url = listing.product_url.as_deref().and_then(parse_http_url)?;

    Some(NormalizedProduct {
        retailer,
        title: listing.title.as_deref().and_then(normalize_title),
        price: listing.price_text.as_deref().map_or_else(Price::unknown, parse_price),
        image_url: listing.image_url.as_deref().and_then(parse_http_url),
        source_url,
        scraped_at,
    })
}

/// Collapsed whitespace; `None` when nothing is left
pub fn normalize_title(raw: &str) -> Option<String> {
    let title = collapse_whitespace(raw);
    (!title.is_empty()).then_some(title)
}

fn parse_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw.trim()).ok()?;
    (matches!(url.scheme(), "http" | "https") && url.host().is_some()).then_some(url)
}

/// Parses a display price such as `Rs. 1,299`, `₹1,299 - ₹1,599` or
/// `$24.99`. Ranges take their first value. Anything unparseable, or a
/// negative amount, yields the unknown price.
pub fn parse_price(raw: &str) -> Price {
    let text = collapse_whitespace(raw);
    let lower = text.to_lowercase();
    if lower.is_empty() || NO_PRICE_MARKERS.contains(&lower.as_str()) {
        return Price::unknown();
    }

    let Some(found) = NUMBER.find(&text) else {
        return Price::unknown();
    };
    // the prefix holds no digits, so a dash there is a sign
    if text[..found.start()].contains('-') {
        return Price::unknown();
    }

    let Ok(amount) = found.as_str().replace(',', "").parse::<f64>() else {
        return Price::unknown();
    };
    Price::known(amount, detect_currency(&lower))
}

fn detect_currency(lower: &str) -> Currency {
    if lower.contains('₹') || lower.contains("rs.") || lower.contains("rs ") || lower.contains("inr") {
        Currency::Inr
    } else if lower.contains('$') || lower.contains("usd") {
        Currency::Usd
    } else if lower.contains('€') || lower.contains("eur") {
        Currency::Eur
    } else if lower.contains('£') || lower.contains("gbp") {
        Currency::Gbp
    } else {
        Currency::Unknown
    }
}
