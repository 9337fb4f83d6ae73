//! Headless Chromium sessions for the fallback tier (`stealth-browser` feature)

#![allow(clippy::uninlined_format_args)]

use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::ClearBrowserCookiesParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::FetchFailure;
use crate::infrastructure::browser_pool::{BrowserLauncher, BrowserSession};

const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--no-sandbox",
    "--incognito",
    "--window-size=1920,1080",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-sync",
    "--no-first-run",
];

const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
    Object.defineProperty(navigator, 'languages', { get: () => ['en-IN', 'en'] });
    Object.defineProperty(navigator, 'platform', { get: () => 'Win32' });
    window.chrome = { runtime: {} };
"#;

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches one Chromium process per session
pub struct ChromiumLauncher {
    user_agent: String,
}

impl ChromiumLauncher {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        let user_agent_arg = format!("--user-agent={}", self.user_agent);
        let config = BrowserConfig::builder()
            .viewport(Some(Viewport {
                width: 1920,
                height: 1080,
                device_scale_factor: Some(1.0),
                ..Default::default()
            }))
            .args(STEALTH_ARGS.iter().copied().chain(std::iter::once(user_agent_arg.as_str())))
            .build()
            .map_err(|e| anyhow!("Browser config error: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| anyhow!("Failed to launch browser: {}", e))?;
        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = open_stealth_page(&browser)
            .await
            .map_err(|e| anyhow!("Failed to open page: {}", e))?;

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
        }))
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
}

async fn open_stealth_page(browser: &Browser) -> Result<Page, FetchFailure> {
    let page = browser
        .new_page("about:blank")
        .await
        .map_err(|e| FetchFailure::transport(format!("new page: {}", e)))?;
    // injected before any page script runs
    page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
        .await
        .map_err(|e| FetchFailure::transport(format!("stealth script: {}", e)))?;
    Ok(page)
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate_and_extract(
        &mut self,
        url: &str,
        wait_selector: &str,
        timeout: Duration,
    ) -> Result<String, FetchFailure> {
        self.page
            .goto(url)
            .await
            .map_err(|e| FetchFailure::transport(format!("navigation failed: {}", e)))?;

        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(wait_selector).await.is_ok() {
                break;
            }
            if Instant::now() >= deadline {
                // still return what rendered; an empty result page has no container
                debug!("Selector {} not present after {:?}", wait_selector, timeout);
                break;
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }

        // lazy-loaded cards render on scroll
        self.page.evaluate("window.scrollTo(0, document.body.scrollHeight / 2)").await.ok();
        tokio::time::sleep(Duration::from_millis(500 + fastrand::u64(..1500))).await;

        self.page
            .content()
            .await
            .map_err(|e| FetchFailure::transport(format!("content: {}", e)))
    }

    async fn reset(&mut self) -> Result<(), FetchFailure> {
        self.page
            .execute(ClearBrowserCookiesParams::default())
            .await
            .map_err(|e| FetchFailure::transport(format!("clear cookies: {}", e)))?;
        self.page
            .evaluate("try { localStorage.clear(); sessionStorage.clear(); } catch (e) {}")
            .await
            .ok();

        let fresh = open_stealth_page(&self.browser).await?;
        let previous = std::mem::replace(&mut self.page, fresh);
        previous.close().await.ok();
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        self.handler_task.abort();
    }
}
