use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::query::Retailer;

/// Unstructured listing data as scraped from one retailer page.
///
/// Any field the page did not provide stays `None`; the normalizer decides
/// whether the listing is still usable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub title: Option<String>,
    pub price_text: Option<String>,
    pub product_url: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Inr,
    Usd,
    Eur,
    Gbp,
    Unknown,
}

impl Currency {
    /// ISO-4217 style code used in storage
    pub const fn code(self) -> &'static str {
        match self {
            Self::Inr => "INR",
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "INR" => Self::Inr,
            "USD" => Self::Usd,
            "EUR" => Self::Eur,
            "GBP" => Self::Gbp,
            _ => Self::Unknown,
        }
    }
}

/// Listing price. `amount == None` is the explicit "unknown" price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub amount: Option<f64>,
    pub currency: Currency,
}

impl Price {
    pub const fn unknown() -> Self {
        Self {
            amount: None,
            currency: Currency::Unknown,
        }
    }

    /// Known prices are always finite and non-negative
    pub fn known(amount: f64, currency: Currency) -> Self {
        if amount.is_finite() && amount >= 0.0 {
            Self {
                amount: Some(amount),
                currency,
            }
        } else {
            Self::unknown()
        }
    }

    pub const fn is_known(&self) -> bool {
        self.amount.is_some()
    }
}

/// A single extracted attribute value, or the explicit unknown marker
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum Attribute {
    Known(String),
    #[default]
    Unknown,
}

impl Attribute {
    pub fn known(value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
            Self::Unknown
        } else {
            Self::Known(trimmed.to_lowercase())
        }
    }

    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Known(v) => Some(v.as_str()),
            Self::Unknown => None,
        }
    }

    pub const fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }
}

impl From<Option<String>> for Attribute {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Unknown, Self::known)
    }
}

impl From<Attribute> for Option<String> {
    fn from(value: Attribute) -> Self {
        match value {
            Attribute::Known(v) => Some(v),
            Attribute::Unknown => None,
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_deref().unwrap_or("unknown"))
    }
}

/// Structured apparel attributes inferred for a product.
///
/// An empty `colors` set means the color is unknown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub colors: BTreeSet<String>,
    pub material: Attribute,
    pub fit: Attribute,
    pub category: Attribute,
    pub gender: Attribute,
    pub brand: Attribute,
    pub confidence: f32,
}

impl AttributeSet {
    /// Every field unknown, confidence zero
    pub const fn unknown() -> Self {
        Self {
            colors: BTreeSet::new(),
            material: Attribute::Unknown,
            fit: Attribute::Unknown,
            category: Attribute::Unknown,
            gender: Attribute::Unknown,
            brand: Attribute::Unknown,
            confidence: 0.0,
        }
    }

    pub fn is_all_unknown(&self) -> bool {
        self.colors.is_empty()
            && !self.material.is_known()
            && !self.fit.is_known()
            && !self.category.is_known()
            && !self.gender.is_known()
            && !self.brand.is_known()
    }

    /// Share of the six attribute slots that carry a value
    pub fn known_fraction(&self) -> f32 {
        let known = [
            !self.colors.is_empty(),
            self.material.is_known(),
            self.fit.is_known(),
            self.category.is_known(),
            self.gender.is_known(),
            self.brand.is_known(),
        ]
        .iter()
        .filter(|k| **k)
        .count();
        known as f32 / 6.0
    }
}

impl Default for AttributeSet {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Canonical product record produced by the normalizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedProduct {
    pub retailer: Retailer,
    /// `None` when the listing had no usable title
    pub title: Option<String>,
    pub price: Price,
    pub image_url: Option<Url>,
    /// Absolute listing URL, the basis of the identity key
    pub source_url: Url,
    pub scraped_at: DateTime<Utc>,
}

impl NormalizedProduct {
    pub fn identity_key(&self) -> IdentityKey {
        IdentityKey::derive(self.retailer, &self.source_url)
    }
}

/// Stable catalog identity: blake3 of (retailer, canonical source URL)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn derive(retailer: Retailer, source_url: &Url) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(retailer.slug().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_source_url(source_url).as_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    /// Wraps an already computed key (e.g. read back from storage)
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

const TRACKING_PARAMS: &[&str] = &["ref", "ref_", "sid", "src", "tag", "qid", "sr", "crid", "sprefix", "keywords"];

/// Normalizes a listing URL so that cosmetic differences between scrapes
/// (tracking parameters, fragments, trailing slashes, Amazon `ref=` path
/// segments) map to the same identity.
pub fn canonical_source_url(url: &Url) -> String {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        canonical.set_query(None);
    } else {
        canonical.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path: Vec<&str> = url
        .path()
        .split('/')
        .filter(|seg| !seg.is_empty() && !seg.starts_with("ref="))
        .collect();
    canonical.set_path(&format!("/{}", path.join("/")));

    canonical.to_string()
}

/// Master catalog record, owned by the catalog store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub identity_key: IdentityKey,
    pub product: NormalizedProduct,
    pub attributes: AttributeSet,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub occurrence_count: u32,
}

impl CatalogEntry {
    /// First sighting of a product
    pub fn first_sighting(product: NormalizedProduct, attributes: AttributeSet) -> Self {
        let seen_at = product.scraped_at;
        Self {
            identity_key: product.identity_key(),
            product,
            attributes,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
            occurrence_count: 1,
        }
    }

    /// Applies a newer observation: mutable fields are last-write-wins,
    /// `first_seen_at` is kept and the occurrence count grows by one.
    pub fn record_sighting(&mut self, product: NormalizedProduct, attributes: AttributeSet) {
        self.last_seen_at = product.scraped_at.max(self.last_seen_at);
        self.product = product;
        self.attributes = attributes;
        self.occurrence_count = self.occurrence_count.saturating_add(1);
    }
}
