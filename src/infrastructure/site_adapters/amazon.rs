use crate::domain::{ProductQuery, Retailer, SiteRequest};
use crate::infrastructure::parsing::{ListingLayout, ParseOutcome, ParsingResult, SelectorSet};

use super::{SiteAdapter, default_headers, encode_query};

/// amazon.in search results
pub struct AmazonAdapter {
    layout: ListingLayout,
}

impl AmazonAdapter {
    pub const RENDER_READY_SELECTOR: &'static str = "div.s-main-slot";

    pub fn new() -> ParsingResult<Self> {
        Ok(Self {
            layout: ListingLayout {
                container: SelectorSet::compile(
                    "container",
                    &["div[data-component-type='s-search-result']", "div.s-result-item[data-asin]"],
                )?,
                brand: None,
                name: SelectorSet::compile(
                    "name",
                    &["h2 a.a-link-normal span.a-text-normal", "h2 span", "h2"],
                )?,
                price: SelectorSet::compile("price", &["span.a-price-whole", "span.a-offscreen"])?,
                link: SelectorSet::compile("link", &["h2 a.a-link-normal", "a.a-link-normal[href]"])?,
                image: SelectorSet::compile("image", &["img.s-image"])?,
            },
        })
    }
}

impl SiteAdapter for AmazonAdapter {
    fn retailer(&self) -> Retailer {
        Retailer::Amazon
    }

    fn build_request(&self, query: &ProductQuery) -> SiteRequest {
        SiteRequest {
            retailer: Retailer::Amazon,
            target_url: format!("{}/s?k={}", Retailer::Amazon.base_url(), encode_query(&query.search_text())),
            wait_selector: Self::RENDER_READY_SELECTOR.to_string(),
            headers: default_headers(),
        }
    }

    fn parse(&self, body: &str) -> ParseOutcome {
        let mut outcome = self.layout.parse(body, Retailer::Amazon.base_url());
        // `a-price-whole` carries digits only
        for listing in &mut outcome.listings {
            if let Some(price) = listing.price_text.as_mut() {
                if price.starts_with(|c: char| c.is_ascii_digit()) {
                    *price = format!("₹{}", price.trim_end_matches('.'));
                }
            }
        }
        outcome
    }
}
