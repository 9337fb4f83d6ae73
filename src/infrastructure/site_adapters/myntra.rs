use crate::domain::{ProductQuery, Retailer, SiteRequest};
use crate::infrastructure::parsing::{ListingLayout, ParseOutcome, ParsingResult, SelectorSet};

use super::{SiteAdapter, default_headers};

/// Myntra search pages: `https://www.myntra.com/<words-joined-by-dashes>`
pub struct MyntraAdapter {
    layout: ListingLayout,
}

impl MyntraAdapter {
    pub const RENDER_READY_SELECTOR: &'static str = "ul.results-base";

    pub fn new() -> ParsingResult<Self> {
        Ok(Self {
            layout: ListingLayout {
                container: SelectorSet::compile("container", &["li.product-base"])?,
                brand: Some(SelectorSet::compile("brand", &["h3.product-brand"])?),
                name: SelectorSet::compile("name", &["h4.product-product", "div.product-productMetaInfo h4"])?,
                price: SelectorSet::compile(
                    "price",
                    &["span.product-discountedPrice", "div.product-price span", "div.product-price"],
                )?,
                link: SelectorSet::compile("link", &["a[href]"])?,
                image: SelectorSet::compile("image", &["img.img-responsive", "picture img", "img"])?,
            },
        })
    }
}

impl SiteAdapter for MyntraAdapter {
    fn retailer(&self) -> Retailer {
        Retailer::Myntra
    }

    fn build_request(&self, query: &ProductQuery) -> SiteRequest {
        let slug = query
            .keywords()
            .iter()
            .map(|k| k.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join("-");

        SiteRequest {
            retailer: Retailer::Myntra,
            target_url: format!("{}/{}", Retailer::Myntra.base_url(), slug),
            wait_selector: Self::RENDER_READY_SELECTOR.to_string(),
            headers: default_headers(),
        }
    }

    fn parse(&self, body: &str) -> ParseOutcome {
        self.layout.parse(body, Retailer::Myntra.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fixtures;

    #[test]
    fn builds_dashed_search_url() {
        let adapter = MyntraAdapter::new().unwrap();
        let query = ProductQuery::new(Retailer::Myntra, ["Blue", "denim", "jacket's"]);
        let request = adapter.build_request(&query);
        assert_eq!(request.target_url, "https://www.myntra.com/blue-denim-jackets");
        assert_eq!(request.wait_selector, "ul.results-base");
    }

    #[test]
    fn parses_fixture_page() {
        let adapter = MyntraAdapter::new().unwrap();
        let outcome = adapter.parse(fixtures::MYNTRA_RESULTS);
        assert_eq!(outcome.len(), 3);

        let first = &outcome.listings[0];
        assert_eq!(first.title.as_deref(), Some("Roadster Men Blue Denim Jacket"));
        assert_eq!(first.price_text.as_deref(), Some("Rs. 1799"));
        assert!(first.product_url.as_deref().unwrap().starts_with("https://www.myntra.com/jackets/"));
        // third card has no price element
        assert!(outcome.listings[2].price_text.is_none());
        assert_eq!(outcome.incomplete_fields, 1);
    }
}
