//! Application layer module
//!
//! Use cases that sequence the domain and infrastructure pieces:
//! the batch discovery orchestrator, result ranking and the out-of-band
//! attribute refresh pass.

pub mod discovery_orchestrator;
pub mod ranking;
pub mod report;
pub mod attribute_refresh;

pub use discovery_orchestrator::{Clock, DiscoveryOrchestrator, OrchestratorSettings};
pub use ranking::{EntryComparator, RankingPolicy};
pub use report::{DiscoveryReport, Page, PairOutcome};
pub use attribute_refresh::{AttributeRefreshPass, RefreshSummary};
