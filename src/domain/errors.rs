//! Error taxonomy for discovery
//!
//! Field- and listing-level problems are absorbed where they happen
//! (degrade to unknown). Only retailer- and pair-level failures surface
//! as [`DiscoveryError`] values in the batch result.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::query::Retailer;

/// Observable failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorTaxonomy {
    NetworkTransient,
    NetworkBlocked,
    ParseIncomplete,
    ExtractionFailed,
    DiscoveryUnavailable,
    DiscoveryTimeout,
}

/// Typed outcome of a failed primary or fallback fetch
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchFailure {
    #[error("blocked: {reason}")]
    Blocked { reason: String },

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("timed out: {message}")]
    Timeout { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },
}

impl FetchFailure {
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::Blocked {
            reason: reason.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Whether another attempt on the same tier may succeed
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::Blocked { .. })
    }

    pub const fn taxonomy(&self) -> ErrorTaxonomy {
        match self {
            Self::Blocked { .. } => ErrorTaxonomy::NetworkBlocked,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Transport { .. } => {
                ErrorTaxonomy::NetworkTransient
            }
        }
    }

    /// Server-requested delay, if any
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Per-pair failure reported in the batch result
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryError {
    #[error("{retailer} unavailable after {attempts} attempts: {last_failure}")]
    Unavailable {
        retailer: Retailer,
        attempts: u32,
        last_failure: FetchFailure,
    },

    #[error("{retailer} discovery exceeded its deadline")]
    Timeout { retailer: Retailer },

    #[error("{retailer} catalog write failed: {message}")]
    Store { retailer: Retailer, message: String },
}

impl DiscoveryError {
    pub const fn retailer(&self) -> Retailer {
        match self {
            Self::Unavailable { retailer, .. }
            | Self::Timeout { retailer }
            | Self::Store { retailer, .. } => *retailer,
        }
    }

    pub const fn taxonomy(&self) -> ErrorTaxonomy {
        match self {
            Self::Timeout { .. } => ErrorTaxonomy::DiscoveryTimeout,
            Self::Unavailable { .. } | Self::Store { .. } => ErrorTaxonomy::DiscoveryUnavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocked_is_not_retryable() {
        assert!(!FetchFailure::blocked("captcha").is_retryable());
        assert!(FetchFailure::timeout("30s").is_retryable());
        assert!(FetchFailure::RateLimited { retry_after: None }.is_retryable());
        assert!(FetchFailure::transport("reset").is_retryable());
    }

    #[test]
    fn taxonomy_mapping() {
        assert_eq!(FetchFailure::blocked("403").taxonomy(), ErrorTaxonomy::NetworkBlocked);
        assert_eq!(FetchFailure::timeout("x").taxonomy(), ErrorTaxonomy::NetworkTransient);
        let err = DiscoveryError::Timeout { retailer: Retailer::Ajio };
        assert_eq!(err.taxonomy(), ErrorTaxonomy::DiscoveryTimeout);
        assert_eq!(err.retailer(), Retailer::Ajio);
    }
}
