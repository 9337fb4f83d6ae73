//! Fallback tier: stealth browser sessions behind a bounded pool
//!
//! Sessions are expensive to start, so idle ones are kept and reused.
//! A reused session is reset (cookies, storage, history) before it is
//! handed out again, and a session that failed is dropped rather than
//! returned. Callers queue on the pool semaphore when every session is busy.

#![allow(clippy::uninlined_format_args)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, info, warn};

use crate::domain::{FetchFailure, FetchTier, SiteRequest};
use crate::infrastructure::fetching::{PageFetcher, detect_bot_wall};

/// One live browser (or tab) able to render a page
#[async_trait]
pub trait BrowserSession: Send {
    /// Navigates to `url`, waits until `wait_selector` is present (or
    /// `timeout` elapses) and returns the rendered DOM.
    async fn navigate_and_extract(
        &mut self,
        url: &str,
        wait_selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchFailure>;

    /// Clears cookies, storage and history
    async fn reset(&mut self) -> Result<(), FetchFailure>;
}

/// Starts new browser sessions for the pool
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> anyhow::Result<Box<dyn BrowserSession>>;
}

pub struct SessionPool {
    launcher: Arc<dyn BrowserLauncher>,
    permits: Semaphore,
    idle: Mutex<Vec<Box<dyn BrowserSession>>>,
    launched: AtomicUsize,
    size: usize,
}

impl SessionPool {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            launcher,
            permits: Semaphore::new(size),
            idle: Mutex::new(Vec::with_capacity(size)),
            launched: AtomicUsize::new(0),
            size,
        }
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    /// Total sessions started over the pool lifetime
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::Relaxed)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Waits for a free slot, then hands out a clean session
    pub async fn checkout(&self) -> Result<PooledSession<'_>, FetchFailure> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FetchFailure::transport("browser pool closed"))?;

        while let Some(mut session) = self.pop_idle() {
            match session.reset().await {
                Ok(()) => {
                    debug!("♻️ Reusing browser session");
                    return Ok(PooledSession::new(self, session, permit));
                }
                Err(e) => warn!("Discarding browser session that failed to reset: {}", e),
            }
        }

        let session = self
            .launcher
            .launch()
            .await
            .map_err(|e| FetchFailure::transport(format!("browser launch failed: {:#}", e)))?;
        let total = self.launched.fetch_add(1, Ordering::Relaxed) + 1;
        info!("🕶️ Launched browser session #{} (pool size {})", total, self.size);
        Ok(PooledSession::new(self, session, permit))
    }

    fn pop_idle(&self) -> Option<Box<dyn BrowserSession>> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn push_idle(&self, session: Box<dyn BrowserSession>) {
        if let Ok(mut idle) = self.idle.lock() {
            idle.push(session);
        }
    }
}

/// A checked-out session. Dropping it without [`PooledSession::release`]
/// discards the session; the pool slot is freed either way.
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Box<dyn BrowserSession>>,
    _permit: SemaphorePermit<'a>,
}

impl<'a> PooledSession<'a> {
    fn new(pool: &'a SessionPool, session: Box<dyn BrowserSession>, permit: SemaphorePermit<'a>) -> Self {
        Self {
            pool,
            session: Some(session),
            _permit: permit,
        }
    }

    pub fn session(&mut self) -> Option<&mut (dyn BrowserSession + 'static)> {
        self.session.as_deref_mut()
    }

    /// Returns a healthy session to the idle list
    pub fn release(mut self) {
        if let Some(session) = self.session.take() {
            self.pool.push_idle(session);
        }
    }
}

/// [`PageFetcher`] that renders pages through the session pool
pub struct FallbackFetcher {
    pool: Arc<SessionPool>,
    navigation_timeout: Duration,
}

impl FallbackFetcher {
    pub const fn new(pool: Arc<SessionPool>, navigation_timeout: Duration) -> Self {
        Self {
            pool,
            navigation_timeout,
        }
    }

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }
}

#[async_trait]
impl PageFetcher for FallbackFetcher {
    fn tier(&self) -> FetchTier {
        FetchTier::Fallback
    }

    async fn fetch(&self, request: &SiteRequest) -> Result<String, FetchFailure> {
        let mut pooled = self.pool.checkout().await?;
        let Some(session) = pooled.session() else {
            return Err(FetchFailure::transport("browser session unavailable"));
        };

        debug!("🕶️ Fallback fetch {} ({})", request.target_url, request.retailer);
        let navigation = session.navigate_and_extract(
            &request.target_url,
            &request.wait_selector,
            self.navigation_timeout,
        );
        // the session's own wait is bounded too; this guards a hung browser
        let result = match tokio::time::timeout(self.navigation_timeout * 2, navigation).await {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::timeout(format!(
                "browser navigation exceeded {:?}",
                self.navigation_timeout * 2
            ))),
        };

        match result {
            Ok(html) => {
                pooled.release();
                match detect_bot_wall(&html) {
                    Some(marker) => Err(FetchFailure::blocked(format!("bot wall: {}", marker))),
                    None => Ok(html),
                }
            }
            Err(e) => {
                warn!("Discarding browser session after failure: {}", e);
                drop(pooled);
                Err(e)
            }
        }
    }
}
