//! Domain module - core entities and collaborator contracts
//!
//! Everything in here is free of network and database concerns:
//! - queries and site requests
//! - raw, normalized and catalog product shapes
//! - the error taxonomy
//! - the catalog store contract
//! - discovery events for the best-effort event log

pub mod query;
pub mod product;
pub mod errors;
pub mod repositories;
pub mod events;

// Re-export commonly used items for convenience
pub use query::{ProductQuery, Retailer, SiteRequest};
pub use product::{
    Attribute, AttributeSet, CatalogEntry, Currency, IdentityKey, NormalizedProduct, Price,
    RawListing,
};
pub use errors::{DiscoveryError, ErrorTaxonomy, FetchFailure};
pub use repositories::{CatalogSearch, CatalogStore};
pub use events::{DiscoveryEvent, FetchTier};
