//! The browsing-session seam.
//!
//! The orchestrator drives everything through [`BrowserSession`], the one
//! interface the automation collaborator implements. Production uses
//! [`ChromiumSession`] over chromiumoxide; tests script a mock. Whatever
//! variant is installed, the contract is the same: init scripts run before
//! any page script, listeners outlive navigations, and `close()` never fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::emulation;
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, Headers, SetCookiesParams, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
    Viewport as ClipViewport,
};
use chromiumoxide::{Browser, Page};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

use super::browser;
use super::consent::SeedCookie;
use super::netwatch;
use super::profile::ContextProfile;
use super::recorder::SessionRecorder;
use crate::core::config::VIEWPORT_WIDTH;

/// One isolated browsing session, scoped to one scan.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Apply the spoofed client profile: UA + accept-language override,
    /// client-hint headers, locale and timezone emulation.
    async fn apply_profile(&self, profile: &ContextProfile) -> Result<()>;

    /// Register a script to run in every new document before page scripts.
    async fn add_init_script(&self, source: &str) -> Result<()>;

    /// Seed cookies on the context before navigation.
    async fn seed_cookies(&self, cookies: Vec<SeedCookie>) -> Result<()>;

    /// Subscribe request/response observation, feeding the recorder.
    async fn observe_network(&self, recorder: Arc<SessionRecorder>) -> Result<()>;

    /// Install the consent-autoblock neutralizer.
    async fn neutralize_autoblock(&self) -> Result<()>;

    /// Navigate and wait for the document to finish loading.
    /// `Ok(Some(status))` when the main document status is known,
    /// `Ok(None)` when the page loaded but the status is not observable.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<Option<u16>>;

    /// Evaluate an expression in the page. Async IIFEs are awaited; the
    /// resolved value comes back as JSON (`null` for undefined).
    async fn evaluate(&self, expression: &str) -> Result<Value>;

    /// Click the first match of `selector`, bounded by `timeout`.
    async fn click(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Poll `expression` until it evaluates truthy or `timeout` elapses.
    /// Returns whether it ever became truthy; elapsing is not an error.
    async fn wait_for(&self, expression: &str, timeout: Duration) -> bool;

    /// Capture a JPEG of the top of the viewport, returned as base64.
    async fn screenshot_jpeg_base64(&self, quality: i64, clip_height: u32) -> Result<String>;

    /// Tear the session down. Must succeed on every path; errors are logged
    /// and swallowed.
    async fn close(&self);
}

/// Strategy that produces a ready session. Separate from the session so the
/// orchestrator can classify launch failures before any browser exists.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, profile: &ContextProfile) -> Result<Box<dyn BrowserSession>>;
}

// ── chromiumoxide implementation ─────────────────────────────────────────────

pub struct ChromiumSession {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
}

/// Default launcher: system browser headful when interactive, headless
/// fallback otherwise (see `scan::browser::launch_scan_browser`).
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self, profile: &ContextProfile) -> Result<Box<dyn BrowserSession>> {
        let (browser, handler) = browser::launch_scan_browser(&profile.user_agent).await?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| anyhow!("failed to open page: {e}"))?;
        Ok(Box::new(ChromiumSession {
            page,
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler)),
        }))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn apply_profile(&self, profile: &ContextProfile) -> Result<()> {
        let ua = SetUserAgentOverrideParams::builder()
            .user_agent(&profile.user_agent)
            .accept_language(&profile.accept_language)
            .build()
            .map_err(|e| anyhow!("user-agent override: {e}"))?;
        self.page
            .execute(ua)
            .await
            .map_err(|e| anyhow!("user-agent override: {e}"))?;

        let header_map: serde_json::Map<String, Value> = profile
            .extra_headers()
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        let headers = SetExtraHttpHeadersParams::builder()
            .headers(Headers::new(Value::Object(header_map)))
            .build()
            .map_err(|e| anyhow!("header override: {e}"))?;
        self.page
            .execute(headers)
            .await
            .map_err(|e| anyhow!("header override: {e}"))?;

        self.page
            .execute(emulation::SetTimezoneOverrideParams {
                timezone_id: profile.timezone.clone(),
            })
            .await
            .map_err(|e| anyhow!("timezone override: {e}"))?;
        self.page
            .execute(
                emulation::SetLocaleOverrideParams::builder()
                    .locale(&profile.locale)
                    .build(),
            )
            .await
            .map_err(|e| anyhow!("locale override: {e}"))?;
        Ok(())
    }

    async fn add_init_script(&self, source: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                source.to_string(),
            ))
            .await
            .map_err(|e| anyhow!("init-script injection failed: {e}"))?;
        Ok(())
    }

    async fn seed_cookies(&self, cookies: Vec<SeedCookie>) -> Result<()> {
        let params: Vec<CookieParam> = cookies
            .into_iter()
            .map(|c| {
                CookieParam::builder()
                    .name(c.name)
                    .value(c.value)
                    .domain(c.domain)
                    .path("/")
                    .build()
                    .map_err(|e| anyhow!("cookie build: {e}"))
            })
            .collect::<Result<_>>()?;
        self.page
            .execute(SetCookiesParams::new(params))
            .await
            .map_err(|e| anyhow!("cookie seeding failed: {e}"))?;
        Ok(())
    }

    async fn observe_network(&self, recorder: Arc<SessionRecorder>) -> Result<()> {
        netwatch::install(&self.page, recorder).await
    }

    async fn neutralize_autoblock(&self) -> Result<()> {
        netwatch::neutralize_autoblock(&self.page).await
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<Option<u16>> {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Err(_) => return Err(anyhow!("navigation timed out after {}ms", timeout.as_millis())),
            Ok(Err(e)) => return Err(anyhow!("navigation failed: {e}")),
            Ok(Ok(_)) => {}
        }

        // goto resolves on navigation commit; hold out for the load event so
        // deferred tag-management scripts have actually run.
        while started.elapsed() < timeout {
            let complete = self
                .evaluate("document.readyState === 'complete'")
                .await
                .ok()
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if complete {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        // Main-document status via the navigation timing entry. Older
        // engines lack `responseStatus`; zero means "unknown", not failure.
        let status = self
            .evaluate("(performance.getEntriesByType('navigation')[0] || {}).responseStatus || 0")
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(if status == 0 { None } else { Some(status as u16) })
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .page
            .evaluate(expression.to_string())
            .await
            .map_err(|e| anyhow!("evaluate failed: {e}"))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    async fn click(&self, selector: &str, timeout: Duration) -> Result<()> {
        let attempt = async {
            let element = self
                .page
                .find_element(selector)
                .await
                .map_err(|e| anyhow!("selector {selector}: {e}"))?;
            element
                .click()
                .await
                .map_err(|e| anyhow!("click {selector}: {e}"))?;
            Ok::<(), anyhow::Error>(())
        };
        tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| anyhow!("click timed out: {selector}"))?
    }

    async fn wait_for(&self, expression: &str, timeout: Duration) -> bool {
        let started = Instant::now();
        loop {
            if let Ok(v) = self.evaluate(expression).await {
                if v.as_bool().unwrap_or(false) {
                    return true;
                }
            }
            if started.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn screenshot_jpeg_base64(&self, quality: i64, clip_height: u32) -> Result<String> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(quality)
            .clip(ClipViewport {
                x: 0.0,
                y: 0.0,
                width: VIEWPORT_WIDTH as f64,
                height: clip_height as f64,
                scale: 1.0,
            })
            .build();
        let returns = self
            .page
            .execute(params)
            .await
            .map_err(|e| anyhow!("screenshot capture failed: {e}"))?;
        let data: &str = returns.result.data.as_ref();
        Ok(data.to_string())
    }

    async fn close(&self) {
        if let Some(mut b) = self.browser.lock().await.take() {
            if let Err(e) = b.close().await {
                warn!("Browser close error (non-fatal): {}", e);
            }
        }
        if let Some(handle) = self.handler.lock().await.take() {
            handle.abort();
        }
    }
}
