use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Supported retail storefronts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Retailer {
    Myntra,
    Ajio,
    Amazon,
}

impl Retailer {
    pub const ALL: [Self; 3] = [Self::Myntra, Self::Ajio, Self::Amazon];

    /// Stable lowercase identifier, used in identity keys and storage
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Myntra => "myntra",
            Self::Ajio => "ajio",
            Self::Amazon => "amazon",
        }
    }

    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Myntra => "https://www.myntra.com",
            Self::Ajio => "https://www.ajio.com",
            Self::Amazon => "https://www.amazon.in",
        }
    }
}

impl fmt::Display for Retailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Myntra => "Myntra",
            Self::Ajio => "Ajio",
            Self::Amazon => "Amazon",
        };
        f.write_str(name)
    }
}

impl FromStr for Retailer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|r| r.slug().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown retailer '{s}'"))
    }
}

/// A structured product search for one retailer.
///
/// Fields are private so a query cannot change once it has been handed to
/// the pipeline; build it with [`ProductQuery::new`] and the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductQuery {
    keywords: Vec<String>,
    retailer: Retailer,
    category_hint: Option<String>,
    max_results: usize,
}

impl ProductQuery {
    pub const DEFAULT_MAX_RESULTS: usize = 5;

    pub fn new<I, S>(retailer: Retailer, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .flat_map(|k| {
                k.as_ref()
                    .split_whitespace()
                    .map(str::to_lowercase)
                    .collect::<Vec<_>>()
            })
            .collect();

        Self {
            keywords,
            retailer,
            category_hint: None,
            max_results: Self::DEFAULT_MAX_RESULTS,
        }
    }

    #[must_use]
    pub fn with_category_hint(mut self, hint: impl Into<String>) -> Self {
        let hint = hint.into();
        self.category_hint = Some(hint.trim().to_lowercase()).filter(|h| !h.is_empty());
        self
    }

    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub const fn retailer(&self) -> Retailer {
        self.retailer
    }

    pub fn category_hint(&self) -> Option<&str> {
        self.category_hint.as_deref()
    }

    pub const fn max_results(&self) -> usize {
        self.max_results
    }

    /// Keywords joined with single spaces
    pub fn search_text(&self) -> String {
        self.keywords.join(" ")
    }

    /// A wider version of this query keeping only the last two keywords.
    ///
    /// Returns `None` when there is nothing to drop.
    pub fn broadened(&self) -> Option<Self> {
        if self.keywords.len() <= 2 {
            return None;
        }
        let tail = self.keywords[self.keywords.len() - 2..].to_vec();
        Some(Self {
            keywords: tail,
            ..self.clone()
        })
    }
}

/// A site-specific request produced by a site adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteRequest {
    pub retailer: Retailer,
    /// Absolute URL of the listing page to retrieve
    pub target_url: String,
    /// Selector that marks the listing container as rendered
    pub wait_selector: String,
    /// Extra request headers (name, value)
    pub headers: Vec<(String, String)>,
}
