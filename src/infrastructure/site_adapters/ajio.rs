use crate::domain::{ProductQuery, Retailer, SiteRequest};
use crate::infrastructure::parsing::{ListingLayout, ParseOutcome, ParsingResult, SelectorSet};

use super::{SiteAdapter, default_headers, encode_query};

pub struct AjioAdapter {
    layout: ListingLayout,
}

impl AjioAdapter {
    pub const RENDER_READY_SELECTOR: &'static str = ".list-container";

    pub fn new() -> ParsingResult<Self> {
        Ok(Self {
            layout: ListingLayout {
                container: SelectorSet::compile("container", &["div.item", "div.rilrtl-products-list__item"])?,
                brand: Some(SelectorSet::compile("brand", &["div.brand"])?),
                name: SelectorSet::compile("name", &["div.nameCls", "div.name"])?,
                price: SelectorSet::compile("price", &["span.price", "div.price"])?,
                link: SelectorSet::compile("link", &["a.rilrtl-products-list__item-link", "a[href]"])?,
                image: SelectorSet::compile("image", &["img.rilrtl-lazy-img", "img"])?,
            },
        })
    }
}

impl SiteAdapter for AjioAdapter {
    fn retailer(&self) -> Retailer {
        Retailer::Ajio
    }

    fn build_request(&self, query: &ProductQuery) -> SiteRequest {
        SiteRequest {
            retailer: Retailer::Ajio,
            target_url: format!(
                "{}/search/?text={}",
                Retailer::Ajio.base_url(),
                encode_query(&query.search_text())
            ),
            wait_selector: Self::RENDER_READY_SELECTOR.to_string(),
            headers: default_headers(),
        }
    }

    fn parse(&self, body: &str) -> ParseOutcome {
        self.layout.parse(body, Retailer::Ajio.base_url())
    }
}
