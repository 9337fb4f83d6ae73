//! Structured attribute extraction through a language model
//!
//! One prompt per page of products. The response is validated field by
//! field: anything outside the schema degrades to unknown instead of being
//! stored as free text. A failed or disabled model never fails the caller;
//! see [`AttributeExtractor::extract_or_unknown`].

#![allow(clippy::uninlined_format_args)]

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Attribute, AttributeSet, NormalizedProduct};
use crate::infrastructure::llm_client::LanguageModel;

const MAX_VALUE_CHARS: usize = 40;
const MAX_COLORS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("attribute extraction is disabled (no language model configured)")]
    Disabled,

    #[error("language model call failed: {0}")]
    Model(String),

    #[error("malformed extraction response: {0}")]
    MalformedResponse(String),
}

#[derive(Clone)]
pub struct AttributeExtractor {
    model: Option<Arc<dyn LanguageModel>>,
}

impl AttributeExtractor {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model: Some(model) }
    }

    /// Extractor that always yields all-unknown attributes
    pub const fn disabled() -> Self {
        Self { model: None }
    }

    pub const fn is_enabled(&self) -> bool {
        self.model.is_some()
    }

    /// One attribute set per product, in input order. `category_hint` is
    /// the category the shopper searched in, if any.
    pub async fn extract_batch(
        &self,
        products: &[NormalizedProduct],
        category_hint: Option<&str>,
    ) -> Result<Vec<AttributeSet>, ExtractionError> {
        let model = self.model.as_ref().ok_or(ExtractionError::Disabled)?;
        if products.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(products, category_hint);
        let raw = model
            .complete_json(&prompt)
            .await
            .map_err(|e| ExtractionError::Model(format!("{:#}", e)))?;

        let items = parse_items(&raw)?;
        if items.len() != products.len() {
            warn!(
                "⚠️ {} returned {} attribute sets for {} products",
                model.name(),
                items.len(),
                products.len()
            );
        }

        let mut sets: Vec<AttributeSet> = items.iter().take(products.len()).map(validate_item).collect();
        sets.resize_with(products.len(), AttributeSet::unknown);
        debug!("🏷️ Extracted attributes for {} products", sets.len());
        Ok(sets)
    }

    /// Like [`Self::extract_batch`], but degrades a failure to all-unknown
    /// sets. The error is returned alongside for observability.
    pub async fn extract_or_unknown(
        &self,
        products: &[NormalizedProduct],
        category_hint: Option<&str>,
    ) -> (Vec<AttributeSet>, Option<ExtractionError>) {
        match self.extract_batch(products, category_hint).await {
            Ok(sets) => (sets, None),
            Err(e) => (vec![AttributeSet::unknown(); products.len()], Some(e)),
        }
    }
}

/// Fixed extraction prompt contract
pub fn build_prompt(products: &[NormalizedProduct], category_hint: Option<&str>) -> String {
    let inputs: Vec<Value> = products
        .iter()
        .map(|p| {
            serde_json::json!({
                "title": p.title.as_deref().unwrap_or(""),
                "image_url": p.image_url.as_ref().map(url::Url::as_str),
            })
        })
        .collect();
    let inputs = serde_json::to_string_pretty(&inputs).unwrap_or_else(|_| "[]".to_string());
    let hint = category_hint
        .map(|c| format!("\nThe shopper searched in the \"{}\" category; use it only when a title is ambiguous.\n", c))
        .unwrap_or_default();

    format!(
        r#"You are a data extraction service for a fashion e-commerce catalog.
For each product below, infer structured attributes from its title (and image, if given).

Attributes:
- "gender": one of "men", "women", "unisex"
- "category": e.g. "kurta", "jeans", "t-shirt", "blazer", "chinos"
- "colors": list of colors, e.g. ["blue"], ["dark grey", "white"]
- "material": e.g. "cotton", "linen", "denim", "silk-blend"
- "fit": e.g. "slim-fit", "regular", "straight-leg", "a-line"
- "brand": the brand name
- "confidence": number between 0 and 1

Use null for any attribute that cannot be determined. Do not guess.
{}
Products:
{}

Respond with one JSON object: {{"products": [ ... ]}} holding exactly one
object per input product, in the same order."#,
        hint, inputs
    )
}

fn parse_items(raw: &str) -> Result<Vec<Value>, ExtractionError> {
    let cleaned = strip_code_fences(raw);
    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut object) => {
            for key in ["products", "enriched_products", "items"] {
                if let Some(Value::Array(items)) = object.remove(key) {
                    return Ok(items);
                }
            }
            // a lone attribute object answers a batch of one
            Ok(vec![Value::Object(object)])
        }
        other => Err(ExtractionError::MalformedResponse(format!(
            "expected object or array, got {}",
            other
        ))),
    }
}

fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Validates one response item against the attribute schema
pub fn validate_item(item: &Value) -> AttributeSet {
    let Some(object) = item.as_object() else {
        return AttributeSet::unknown();
    };

    let mut set = AttributeSet {
        colors: validate_colors(object),
        material: validate_text(object.get("material")),
        fit: validate_text(object.get("fit")),
        category: validate_text(object.get("category")),
        gender: validate_gender(object.get("gender")),
        brand: validate_text(object.get("brand")),
        confidence: 0.0,
    };

    set.confidence = if set.is_all_unknown() {
        0.0
    } else {
        object
            .get("confidence")
            .and_then(Value::as_f64)
            .filter(|c| c.is_finite())
            .map_or_else(|| set.known_fraction(), |c| c.clamp(0.0, 1.0) as f32)
    };
    set
}

fn validate_text(value: Option<&Value>) -> Attribute {
    value
        .and_then(Value::as_str)
        .filter(|s| is_schema_text(s))
        .map_or(Attribute::Unknown, Attribute::known)
}

fn is_schema_text(text: &str) -> bool {
    let text = text.trim();
    !text.is_empty()
        && text.chars().count() <= MAX_VALUE_CHARS
        && text.chars().any(char::is_alphabetic)
        && text
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '\'' | '&' | '.'))
}

fn validate_gender(value: Option<&Value>) -> Attribute {
    let Some(raw) = value.and_then(Value::as_str) else {
        return Attribute::Unknown;
    };
    match raw.trim().to_lowercase().as_str() {
        "men" | "man" | "male" | "mens" | "men's" => Attribute::known("men"),
        "women" | "woman" | "female" | "womens" | "women's" => Attribute::known("women"),
        "unisex" => Attribute::known("unisex"),
        _ => Attribute::Unknown,
    }
}

fn validate_colors(object: &Map<String, Value>) -> BTreeSet<String> {
    let raw: Vec<&str> = match object.get("colors").or_else(|| object.get("color")) {
        Some(Value::String(s)) => s.split([',', '/']).collect(),
        Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
        _ => Vec::new(),
    };

    raw.into_iter()
        .filter(|c| is_schema_text(c))
        .filter_map(|c| Attribute::known(c).as_deref().map(ToString::to_string))
        .take(MAX_COLORS)
        .collect()
}
