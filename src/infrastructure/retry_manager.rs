//! Retry/backoff controller for the two fetch tiers
//!
//! Escalation is an explicit state machine. [`transition`] is pure: given
//! the current state and the outcome of the attempt just made, it returns
//! the next state and the step to take, so the whole policy is testable
//! without a network. [`RetryController`] drives it against real fetchers.
//!
//! ```text
//! Primary{n} --ok-------------------------------> Succeeded
//! Primary{n} --transient, n < P--(backoff)------> Primary{n+1}
//! Primary{n} --blocked | transient, n == P------> Fallback{1}   (Failed if F == 0)
//! Fallback{n} --ok------------------------------> Succeeded
//! Fallback{n} --transient, n < F--(backoff)-----> Fallback{n+1}
//! Fallback{n} --blocked | transient, n == F-----> Failed
//! ```

#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{DiscoveryError, FetchFailure, FetchTier, SiteRequest};
use crate::infrastructure::fetching::PageFetcher;
use crate::infrastructure::parsing::ParseOutcome;
use crate::infrastructure::site_adapters::SiteAdapter;

/// Attempt budgets and backoff timing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// P: primary attempts (at least one)
    pub primary_attempts: u32,
    /// F: fallback attempts; zero disables escalation
    pub fallback_attempts: u32,
    /// b: base delay
    pub base_delay: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            primary_attempts: 2,
            fallback_attempts: 1,
            base_delay: Duration::from_millis(500),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the attempt following attempt `attempt` (1-based):
    /// `min(b * 2^(attempt-1), b * 2^P)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(self.primary_attempts).min(20);
        let cap_exponent = self.primary_attempts.min(20);
        let delay = self.base_delay.saturating_mul(1 << exponent);
        delay.min(self.base_delay.saturating_mul(1 << cap_exponent))
    }

    /// Adds up to 25% random jitter when enabled
    pub fn jittered(&self, delay: Duration) -> Duration {
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = (delay.as_millis() / 4) as u64;
        delay + Duration::from_millis(fastrand::u64(..=spread))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationState {
    Primary { attempt: u32 },
    Fallback { attempt: u32 },
    Succeeded,
    Failed,
}

impl EscalationState {
    pub const START: Self = Self::Primary { attempt: 1 };

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub const fn tier(self) -> Option<FetchTier> {
        match self {
            Self::Primary { .. } => Some(FetchTier::Primary),
            Self::Fallback { .. } => Some(FetchTier::Fallback),
            Self::Succeeded | Self::Failed => None,
        }
    }
}

/// Outcome of one fetch attempt as seen by the state machine.
///
/// Any successful fetch counts, including one that parsed zero listings.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    Fetched,
    Failed(&'a FetchFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Retry { delay: Duration },
    Escalate,
    Finish,
    GiveUp,
}

/// Pure transition function of the escalation state machine
pub fn transition(
    state: EscalationState,
    outcome: AttemptOutcome<'_>,
    policy: &BackoffPolicy,
) -> (EscalationState, Step) {
    use EscalationState::{Failed, Fallback, Primary, Succeeded};

    match (state, outcome) {
        (Succeeded, _) => (Succeeded, Step::Finish),
        (Failed, _) => (Failed, Step::GiveUp),
        (Primary { .. } | Fallback { .. }, AttemptOutcome::Fetched) => (Succeeded, Step::Finish),

        (Primary { attempt }, AttemptOutcome::Failed(failure)) => {
            if failure.is_retryable() && attempt < policy.primary_attempts {
                let delay = retry_delay(policy, attempt, failure);
                (Primary { attempt: attempt + 1 }, Step::Retry { delay })
            } else if policy.fallback_attempts > 0 {
                (Fallback { attempt: 1 }, Step::Escalate)
            } else {
                (Failed, Step::GiveUp)
            }
        }

        (Fallback { attempt }, AttemptOutcome::Failed(failure)) => {
            if failure.is_retryable() && attempt < policy.fallback_attempts {
                let delay = retry_delay(policy, attempt, failure);
                (Fallback { attempt: attempt + 1 }, Step::Retry { delay })
            } else {
                (Failed, Step::GiveUp)
            }
        }
    }
}

fn retry_delay(policy: &BackoffPolicy, attempt: u32, failure: &FetchFailure) -> Duration {
    let backoff = policy.delay_for(attempt);
    failure.retry_after().map_or(backoff, |server| server.max(backoff))
}

/// One attempt as recorded by the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub tier: FetchTier,
    pub attempt: u32,
    /// `Ok(listing count)` or the failure
    pub result: Result<usize, FetchFailure>,
    pub elapsed_ms: u64,
}

/// Successful retrieval of one listing page
#[derive(Debug, Clone)]
pub struct FetchReport {
    pub outcome: ParseOutcome,
    pub tier: FetchTier,
    pub attempts: Vec<AttemptRecord>,
}

impl FetchReport {
    pub fn escalated(&self) -> bool {
        self.tier == FetchTier::Fallback
    }
}

/// Drives the escalation state machine against the two fetch tiers
#[derive(Clone)]
pub struct RetryController {
    primary: Arc<dyn PageFetcher>,
    fallback: Option<Arc<dyn PageFetcher>>,
    policy: BackoffPolicy,
}

impl RetryController {
    /// Without a fallback fetcher escalation gives up immediately
    pub fn new(
        primary: Arc<dyn PageFetcher>,
        fallback: Option<Arc<dyn PageFetcher>>,
        mut policy: BackoffPolicy,
    ) -> Self {
        policy.primary_attempts = policy.primary_attempts.max(1);
        if fallback.is_none() {
            policy.fallback_attempts = 0;
        }
        Self {
            primary,
            fallback,
            policy,
        }
    }

    pub const fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Fetches and parses `request`, escalating per the policy
    pub async fn fetch_listings(
        &self,
        adapter: &dyn SiteAdapter,
        request: &SiteRequest,
    ) -> Result<FetchReport, DiscoveryError> {
        let mut state = EscalationState::START;
        let mut attempts = Vec::new();

        loop {
            let (fetcher, attempt) = match state {
                EscalationState::Primary { attempt } => (&self.primary, attempt),
                EscalationState::Fallback { attempt } => match &self.fallback {
                    Some(fallback) => (fallback, attempt),
                    None => break,
                },
                EscalationState::Succeeded | EscalationState::Failed => break,
            };
            let tier = fetcher.tier();

            let started = Instant::now();
            let fetched = fetcher.fetch(request).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let (next, step) = match fetched {
                Ok(body) => {
                    let outcome = adapter.parse(&body);
                    debug!(
                        "✅ {} {:?} attempt {} parsed {} listings",
                        request.retailer,
                        tier,
                        attempt,
                        outcome.len()
                    );
                    attempts.push(AttemptRecord {
                        tier,
                        attempt,
                        result: Ok(outcome.len()),
                        elapsed_ms,
                    });
                    return Ok(FetchReport {
                        outcome,
                        tier,
                        attempts,
                    });
                }
                Err(failure) => {
                    let transitioned = transition(state, AttemptOutcome::Failed(&failure), &self.policy);
                    warn!(
                        "❌ {} {:?} attempt {} failed: {}",
                        request.retailer, tier, attempt, failure
                    );
                    attempts.push(AttemptRecord {
                        tier,
                        attempt,
                        result: Err(failure),
                        elapsed_ms,
                    });
                    transitioned
                }
            };

            match step {
                Step::Retry { delay } => {
                    let delay = self.policy.jittered(delay);
                    info!("🔄 Retrying {} in {:?}", request.retailer, delay);
                    tokio::time::sleep(delay).await;
                }
                Step::Escalate => {
                    info!("⚖️ Escalating {} to fallback tier", request.retailer);
                }
                Step::Finish | Step::GiveUp => {}
            }
            state = next;
        }

        let last_failure = attempts
            .iter()
            .rev()
            .find_map(|a| a.result.clone().err())
            .unwrap_or_else(|| FetchFailure::transport("no fetch attempt was made"));
        Err(DiscoveryError::Unavailable {
            retailer: request.retailer,
            attempts: attempts.len() as u32,
            last_failure,
        })
    }
}
