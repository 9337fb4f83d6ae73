//! Pluggable ordering for discovery results

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::domain::CatalogEntry;

pub type EntryComparator = Arc<dyn Fn(&CatalogEntry, &CatalogEntry) -> Ordering + Send + Sync>;

/// How [`crate::DiscoveryReport::ranked`] orders entries.
///
/// Every built-in policy falls back to the identity key on ties so the
/// order is deterministic.
#[derive(Clone, Default)]
pub enum RankingPolicy {
    /// Most recently seen first
    #[default]
    Recency,
    /// Cheapest first, unknown prices last
    PriceAscending,
    /// Most expensive first, unknown prices last
    PriceDescending,
    /// Keyword overlap with the title, then extraction confidence
    Relevance { keywords: Vec<String> },
    Custom(EntryComparator),
}

impl fmt::Debug for RankingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recency => f.write_str("Recency"),
            Self::PriceAscending => f.write_str("PriceAscending"),
            Self::PriceDescending => f.write_str("PriceDescending"),
            Self::Relevance { keywords } => f.debug_struct("Relevance").field("keywords", keywords).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl RankingPolicy {
    pub fn relevance<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Relevance {
            keywords: keywords.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&CatalogEntry, &CatalogEntry) -> Ordering + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(compare))
    }

    pub fn compare(&self, a: &CatalogEntry, b: &CatalogEntry) -> Ordering {
        let primary = match self {
            Self::Recency => b.last_seen_at.cmp(&a.last_seen_at),
            Self::PriceAscending => compare_prices(a, b, false),
            Self::PriceDescending => compare_prices(a, b, true),
            Self::Relevance { keywords } => relevance_score(keywords, b)
                .cmp(&relevance_score(keywords, a))
                .then_with(|| b.attributes.confidence.total_cmp(&a.attributes.confidence)),
            Self::Custom(compare) => return compare(a, b),
        };
        primary.then_with(|| a.identity_key.cmp(&b.identity_key))
    }

    /// Sorts in place with this policy
    pub fn sort(&self, entries: &mut [CatalogEntry]) {
        entries.sort_by(|a, b| self.compare(a, b));
    }
}

fn compare_prices(a: &CatalogEntry, b: &CatalogEntry, descending: bool) -> Ordering {
    match (a.product.price.amount, b.product.price.amount) {
        (Some(x), Some(y)) if descending => y.total_cmp(&x),
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Number of distinct keywords that appear as words in the title
fn relevance_score(keywords: &[String], entry: &CatalogEntry) -> usize {
    let Some(title) = entry.product.title.as_deref() else {
        return 0;
    };
    let words: Vec<String> = title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    keywords
        .iter()
        .filter(|k| words.contains(k))
        .collect::<BTreeSet<_>>()
        .len()
}
