//! Defensive HTML listing extraction
//!
//! Each field is looked up through a list of fallback selectors. A listing
//! that lacks a field keeps it as `None`; the number of degraded fields is
//! reported so callers can observe `ParseIncomplete` without failing.

#![allow(clippy::uninlined_format_args)]

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::domain::RawListing;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParsingError {
    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No valid selectors compiled for {field}")]
    NoValidSelectors { field: String },

    #[error("URL resolution failed: {url} - {reason}")]
    UrlResolutionFailed { url: String, reason: String },
}

pub type ParsingResult<T> = Result<T, ParsingError>;

/// Ordered fallback selectors for one field
#[derive(Debug, Clone)]
pub struct SelectorSet {
    field: &'static str,
    selectors: Vec<Selector>,
}

impl SelectorSet {
    /// Compiles every selector that parses; fails only when none does
    pub fn compile(field: &'static str, sources: &[&str]) -> ParsingResult<Self> {
        let mut selectors = Vec::with_capacity(sources.len());
        for source in sources {
            match Selector::parse(source) {
                Ok(selector) => selectors.push(selector),
                Err(e) => {
                    let err = ParsingError::InvalidSelector {
                        selector: (*source).to_string(),
                        reason: e.to_string(),
                    };
                    warn!("{}", err);
                }
            }
        }

        if selectors.is_empty() {
            return Err(ParsingError::NoValidSelectors {
                field: field.to_string(),
            });
        }
        Ok(Self { field, selectors })
    }

    pub const fn field(&self) -> &'static str {
        self.field
    }

    /// First element matched by any selector, in fallback order
    pub fn first<'a>(&self, scope: ElementRef<'a>) -> Option<ElementRef<'a>> {
        self.selectors
            .iter()
            .find_map(|selector| scope.select(selector).next())
    }

    /// Trimmed, whitespace-collapsed text of the first non-empty match
    pub fn text(&self, scope: ElementRef<'_>) -> Option<String> {
        self.selectors.iter().find_map(|selector| {
            scope
                .select(selector)
                .map(|el| collapse_whitespace(&el.text().collect::<String>()))
                .find(|text| !text.is_empty())
        })
    }

    /// First non-empty attribute among `attrs` on the first match
    pub fn attr(&self, scope: ElementRef<'_>, attrs: &[&str]) -> Option<String> {
        let element = self.first(scope)?;
        attrs
            .iter()
            .filter_map(|name| element.value().attr(name))
            .map(str::trim)
            .find(|value| !value.is_empty() && !value.starts_with("data:"))
            .map(ToString::to_string)
    }

    /// Every element matched by the first selector that matches anything
    pub fn select_all<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        for selector in &self.selectors {
            let found: Vec<_> = document.select(selector).collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }
}

/// Listing-page layout of one retailer
#[derive(Debug, Clone)]
pub struct ListingLayout {
    pub container: SelectorSet,
    /// Optional leading brand text, joined with `name` into the title
    pub brand: Option<SelectorSet>,
    pub name: SelectorSet,
    pub price: SelectorSet,
    pub link: SelectorSet,
    pub image: SelectorSet,
}

/// Result of parsing one listing page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ParseOutcome {
    pub listings: Vec<RawListing>,
    /// Number of (listing, field) slots that degraded to unknown
    pub incomplete_fields: usize,
}

impl ParseOutcome {
    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }
}

const IMAGE_ATTRS: &[&str] = &["src", "data-src", "srcset"];

impl ListingLayout {
    /// Extracts every container on the page. Never fails: a malformed page
    /// just yields fewer listings.
    pub fn parse(&self, body: &str, base_url: &str) -> ParseOutcome {
        let document = Html::parse_document(body);
        let mut outcome = ParseOutcome::default();

        for item in self.container.select_all(&document) {
            let listing = self.extract(item, base_url);
            let missing = [
                listing.title.is_none(),
                listing.price_text.is_none(),
                listing.product_url.is_none(),
                listing.image_url.is_none(),
            ]
            .iter()
            .filter(|m| **m)
            .count();

            // a container with nothing usable is page chrome, not a listing
            if listing.title.is_none() && listing.product_url.is_none() {
                debug!("Skipping empty listing container");
                continue;
            }
            outcome.incomplete_fields += missing;
            outcome.listings.push(listing);
        }

        outcome
    }

    fn extract(&self, item: ElementRef<'_>, base_url: &str) -> RawListing {
        let name = self.name.text(item);
        let brand = self.brand.as_ref().and_then(|b| b.text(item));
        let title = match (brand, name) {
            (Some(brand), Some(name)) => Some(format!("{} {}", brand, name)),
            (brand, name) => name.or(brand),
        };

        let product_url = self
            .link
            .attr(item, &["href"])
            .and_then(|href| resolve_url(&href, base_url).ok());
        let image_url = self
            .image
            .attr(item, IMAGE_ATTRS)
            .map(|src| first_srcset_candidate(&src))
            .and_then(|src| resolve_url(&src, base_url).ok());

        RawListing {
            title,
            price_text: self.price.text(item),
            product_url,
            image_url,
        }
    }
}

/// Resolves `href` against `base_url`, accepting only http(s) results
pub fn resolve_url(href: &str, base_url: &str) -> ParsingResult<String> {
    let fail = |reason: String| ParsingError::UrlResolutionFailed {
        url: href.to_string(),
        reason,
    };

    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return Err(fail("not a navigable link".into()));
    }

    let base = Url::parse(base_url).map_err(|e| fail(format!("bad base url: {}", e)))?;
    let resolved = base.join(href).map_err(|e| fail(e.to_string()))?;
    match resolved.scheme() {
        "http" | "https" => Ok(resolved.into()),
        other => Err(fail(format!("unsupported scheme {}", other))),
    }
}

/// Collapses runs of whitespace into single spaces and trims the ends
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn first_srcset_candidate(src: &str) -> String {
    src.split(',')
        .next()
        .and_then(|candidate| candidate.split_whitespace().next())
        .unwrap_or(src)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> ListingLayout {
        ListingLayout {
            container: SelectorSet::compile("container", &["li.product"]).unwrap(),
            brand: Some(SelectorSet::compile("brand", &["h3.brand"]).unwrap()),
            name: SelectorSet::compile("name", &["h4.name", "h4"]).unwrap(),
            price: SelectorSet::compile("price", &["span.discounted", "div.price"]).unwrap(),
            link: SelectorSet::compile("link", &["a"]).unwrap(),
            image: SelectorSet::compile("image", &["img"]).unwrap(),
        }
    }

    #[test]
    fn invalid_selectors_are_skipped() {
        let set = SelectorSet::compile("price", &["span[", "span.price"]).unwrap();
        assert_eq!(set.field(), "price");
        assert!(SelectorSet::compile("price", &["span["]).is_err());
    }

    #[test]
    fn parses_complete_and_partial_listings() {
        let html = r#"
            <ul>
              <li class="product">
                <a href="/jackets/roadster/123/buy">
                  <img src="https://img.example.com/123.jpg">
                  <h3 class="brand">Roadster</h3>
                  <h4 class="name">  Blue   Denim Jacket </h4>
                  <div class="price">Rs. 1,999</div>
                </a>
              </li>
              <li class="product">
                <h4 class="name">Nameless link</h4>
              </li>
              <li class="product"><span>ad slot</span></li>
            </ul>"#;

        let outcome = layout().parse(html, "https://www.myntra.com");
        assert_eq!(outcome.len(), 2);
        let first = &outcome.listings[0];
        assert_eq!(first.title.as_deref(), Some("Roadster Blue Denim Jacket"));
        assert_eq!(first.price_text.as_deref(), Some("Rs. 1,999"));
        assert_eq!(
            first.product_url.as_deref(),
            Some("https://www.myntra.com/jackets/roadster/123/buy")
        );
        // second listing lacks price, url and image
        assert_eq!(outcome.incomplete_fields, 3);
    }

    #[test]
    fn malformed_html_yields_empty_outcome() {
        let outcome = layout().parse("<li class=\"product\"><<<>>>", "https://www.ajio.com");
        assert!(outcome.is_empty());
    }

    #[test]
    fn resolve_url_rejects_non_http() {
        assert!(resolve_url("javascript:void(0)", "https://www.ajio.com").is_err());
        assert!(resolve_url("mailto:x@y.z", "https://www.ajio.com").is_err());
        assert_eq!(
            resolve_url("//cdn.ajio.com/a.jpg", "https://www.ajio.com").unwrap(),
            "https://cdn.ajio.com/a.jpg"
        );
    }

    #[test]
    fn srcset_takes_first_candidate() {
        assert_eq!(first_srcset_candidate("a.jpg 1x, b.jpg 2x"), "a.jpg");
        assert_eq!(collapse_whitespace("  a \n b  "), "a b");
    }
}
