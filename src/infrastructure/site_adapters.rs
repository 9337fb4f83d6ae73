//! Per-retailer request building and listing parsing
//!
//! Dispatch is keyed by [`Retailer`]: [`adapter_for`] returns the adapter
//! for a retailer, and every adapter owns its compiled selector layout.

pub mod ajio;
pub mod amazon;
pub mod myntra;

use std::sync::Arc;

use once_cell::sync::Lazy;
use url::form_urlencoded;

use crate::domain::{ProductQuery, Retailer, SiteRequest};
use crate::infrastructure::parsing::ParseOutcome;

pub use ajio::AjioAdapter;
pub use amazon::AmazonAdapter;
pub use myntra::MyntraAdapter;

/// Translates queries into site requests and pages into raw listings
pub trait SiteAdapter: Send + Sync {
    fn retailer(&self) -> Retailer;

    fn build_request(&self, query: &ProductQuery) -> SiteRequest;

    /// Never fails; malformed pages yield fewer listings
    fn parse(&self, body: &str) -> ParseOutcome;
}

// Built-in layouts are literals; a failure here is a programming error
static MYNTRA: Lazy<Arc<dyn SiteAdapter>> =
    Lazy::new(|| Arc::new(MyntraAdapter::new().expect("myntra selectors compile")));
static AJIO: Lazy<Arc<dyn SiteAdapter>> =
    Lazy::new(|| Arc::new(AjioAdapter::new().expect("ajio selectors compile")));
static AMAZON: Lazy<Arc<dyn SiteAdapter>> =
    Lazy::new(|| Arc::new(AmazonAdapter::new().expect("amazon selectors compile")));

/// Shared adapter for a retailer
pub fn adapter_for(retailer: Retailer) -> Arc<dyn SiteAdapter> {
    match retailer {
        Retailer::Myntra => Arc::clone(&MYNTRA),
        Retailer::Ajio => Arc::clone(&AJIO),
        Retailer::Amazon => Arc::clone(&AMAZON),
    }
}

/// `+`-encoded query text, as the retailers' own search boxes submit it
pub(crate) fn encode_query(text: &str) -> String {
    form_urlencoded::byte_serialize(text.as_bytes()).collect()
}

/// Default browser-like headers sent with every site request
pub(crate) fn default_headers() -> Vec<(String, String)> {
    vec![
        ("Accept".into(), "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into()),
        ("Accept-Language".into(), "en-IN,en;q=0.9".into()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_matches_retailer() {
        for retailer in Retailer::ALL {
            assert_eq!(adapter_for(retailer).retailer(), retailer);
        }
    }

    #[test]
    fn query_encoding_uses_plus() {
        assert_eq!(encode_query("blue denim & co"), "blue+denim+%26+co");
    }
}
