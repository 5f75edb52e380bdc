//! Browser session orchestrator.
//!
//! `Scanner::scan(url)` drives one full pass:
//!
//! ```text
//! Launching → ContextReady → Navigating → Loaded → ConsentBypassed
//!   → AwaitingSdk → SdkInteraction → FallbackInvocation? → ScreenshotCapture
//!   → ResultAssembly → Terminated
//! ```
//!
//! Launch and navigation failures are terminal; everything after that
//! degrades to a "not found / not ready" state and the scan keeps going.
//! Session teardown runs on every path that got a browser, and all failures
//! come back as [`ScanResult::Failure`] values; `scan` never raises.

pub mod browser;
pub mod consent;
pub mod netwatch;
pub mod pagehook;
pub mod profile;
pub mod recorder;
pub mod sdk;
pub mod session;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::config::{ScanTimings, SCREENSHOT_CLIP_HEIGHT};
use crate::core::types::{ActivityRecord, FailureKind, ScanResult, SdkKind};
use crate::parse;

use consent::BroadcastPass;
use profile::{ContextProfile, HostHeuristicResolver, LocaleResolver};
use recorder::SessionRecorder;
use session::{BrowserSession, ChromiumLauncher, SessionLauncher};

/// Scan-phase failures, classified per the result taxonomy.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("page load failed: {0}")]
    PageLoad(String),

    #[error("{0}")]
    NoSdkDetected(String),

    #[error("{0}")]
    SdkDetectedNoActivity(String),

    #[error("scan error: {0}")]
    Internal(String),
}

impl ScanError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScanError::InvalidInput(_) => FailureKind::InvalidInput,
            ScanError::BrowserLaunch(_) => FailureKind::BrowserLaunch,
            ScanError::PageLoad(_) => FailureKind::PageLoad,
            ScanError::NoSdkDetected(_) => FailureKind::NoSdkDetected,
            ScanError::SdkDetectedNoActivity(_) => FailureKind::SdkDetectedNoActivity,
            ScanError::Internal(_) => FailureKind::Internal,
        }
    }
}

impl From<anyhow::Error> for ScanError {
    fn from(e: anyhow::Error) -> Self {
        ScanError::Internal(format!("{e:#}"))
    }
}

/// Validate the operator-supplied URL: non-empty after trimming, parseable,
/// http/https only. Runs before any browser work.
pub fn validate_scan_url(raw: &str) -> Result<Url, ScanError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ScanError::InvalidInput("URL must not be empty".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|_| ScanError::InvalidInput(format!("not a valid URL: {trimmed}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(ScanError::InvalidInput(format!(
            "unsupported scheme '{other}' — only http and https URLs are scannable"
        ))),
    }
}

/// The URL actually navigated to: the input plus the SDK debug switches,
/// which make both SDK generations emit richer traces.
pub fn debug_scan_url(parsed: &Url) -> String {
    let mut u = parsed.clone();
    u.query_pairs_mut()
        .append_pair("mboxDebug", "1")
        .append_pair("alloy_debug", "true");
    u.to_string()
}

/// What `drive` learned besides the recorder's contents.
struct ScanOutcome {
    sdk: SdkKind,
    version: String,
    send_event_calls: usize,
    fallback_attempts: usize,
}

/// One scanner instance; cheap to share behind an `Arc`. Each `scan` call
/// owns an isolated session, so concurrent scans only share launch resources.
pub struct Scanner {
    launcher: Arc<dyn SessionLauncher>,
    locales: Arc<dyn LocaleResolver>,
    timings: ScanTimings,
}

impl Scanner {
    pub fn new(timings: ScanTimings) -> Self {
        Self {
            launcher: Arc::new(ChromiumLauncher),
            locales: Arc::new(HostHeuristicResolver),
            timings,
        }
    }

    /// Swap the automation collaborator. This is the seam the mocked
    /// end-to-end tests use.
    pub fn with_launcher(launcher: Arc<dyn SessionLauncher>, timings: ScanTimings) -> Self {
        Self {
            launcher,
            locales: Arc::new(HostHeuristicResolver),
            timings,
        }
    }

    pub fn with_locale_resolver(mut self, resolver: Arc<dyn LocaleResolver>) -> Self {
        self.locales = resolver;
        self
    }

    /// Scan one page. Infallible signature: every failure mode is a value.
    pub async fn scan(&self, url: &str) -> ScanResult {
        let parsed = match validate_scan_url(url) {
            Ok(u) => u,
            Err(e) => {
                return ScanResult::Failure {
                    kind: e.kind(),
                    error: e.to_string(),
                    debug: None,
                }
            }
        };
        let scan_url = debug_scan_url(&parsed);
        let profile = self.locales.resolve(&parsed);
        info!(
            "🔎 scan start: {} ({} / {})",
            parsed, profile.locale, profile.timezone
        );

        let session = match self.launcher.launch(&profile).await {
            Ok(s) => s,
            Err(e) => {
                warn!("browser launch failed: {e:#}");
                return ScanResult::Failure {
                    kind: FailureKind::BrowserLaunch,
                    error: format!("browser launch failed: {e}"),
                    debug: None,
                };
            }
        };

        let recorder = SessionRecorder::new();
        let outcome = self
            .drive(session.as_ref(), &parsed, &scan_url, &profile, &recorder)
            .await;

        // Unconditional best-effort screenshot, failures included. It is often
        // the fastest way to see *why* a page yielded nothing.
        let screenshot = session
            .screenshot_jpeg_base64(60, SCREENSHOT_CLIP_HEIGHT)
            .await
            .unwrap_or_default();

        // Guaranteed teardown for every path that reached a session.
        session.close().await;

        self.assemble(outcome, &recorder, screenshot).await
    }

    /// Everything between ContextReady and FallbackInvocation. Failures map
    /// to the taxonomy; the caller owns screenshot + teardown + assembly.
    async fn drive(
        &self,
        session: &dyn BrowserSession,
        target: &Url,
        scan_url: &str,
        profile: &ContextProfile,
        recorder: &Arc<SessionRecorder>,
    ) -> Result<ScanOutcome, ScanError> {
        let t = self.timings;

        // ContextReady: spoofed identity, init scripts, seeded consent,
        // observation channels, all before the first navigation.
        session.apply_profile(profile).await?;
        session.add_init_script(&browser::stealth_script()).await?;
        session
            .add_init_script(&pagehook::call_interceptor_script())
            .await?;
        session
            .add_init_script(&consent::storage_seed_script())
            .await?;
        session.seed_cookies(consent::consent_cookies(target)).await?;
        session.neutralize_autoblock().await?;
        session.observe_network(recorder.clone()).await?;

        // Navigating
        info!("🌐 navigating: {scan_url}");
        let status = session
            .navigate(scan_url, ms(t.navigation_timeout_ms))
            .await
            .map_err(|e| ScanError::PageLoad(e.to_string()))?;
        if let Some(code) = status {
            if !(200..300).contains(&code) {
                return Err(ScanError::PageLoad(format!("HTTP {code}")));
            }
        }

        // Loaded → ConsentBypassed: click whatever consent button exists,
        // then broadcast "granted" for rules that listen instead of look.
        tokio::time::sleep(ms(t.post_load_delay_ms)).await;
        for selector in consent::CONSENT_SELECTORS {
            match session.click(selector, ms(t.click_timeout_ms)).await {
                Ok(()) => debug!("consent selector clicked: {selector}"),
                Err(_) => {} // selector may simply not exist on this page
            }
        }
        session
            .evaluate(&consent::broadcast_script(BroadcastPass::AfterLoad))
            .await
            .ok();

        self.simulate_engagement(session).await;

        // AwaitingSdk: bounded poll; elapsing is non-fatal.
        let appeared = session
            .wait_for(&sdk::presence_expression(), ms(t.sdk_wait_ms))
            .await;
        if !appeared {
            debug!("no SDK indicator within {}ms", t.sdk_wait_ms);
        }

        // Second consent volley: tag-management listeners frequently
        // register only after the SDK loads.
        session
            .evaluate(&consent::broadcast_script(BroadcastPass::AfterSdkConfirmed))
            .await
            .ok();

        // SdkInteraction: settle, then introspect and drain.
        tokio::time::sleep(ms(t.sdk_settle_ms)).await;

        let probe = sdk::decode_probe(
            &session
                .evaluate(&sdk::probe_script())
                .await
                .unwrap_or(Value::Null),
        );
        // at.js wins when both indicators are present; hybrid pages route
        // Target decisions through the legacy client.
        let sdk_kind = if probe.has_target {
            SdkKind::AtJs
        } else if probe.has_alloy {
            SdkKind::WebSdk
        } else {
            SdkKind::Absent
        };
        let mut version = probe.version;
        info!("SDK probe: {} v{}", sdk_kind.label(), version);

        let log_value = session
            .evaluate(&pagehook::drain_expression())
            .await
            .unwrap_or(Value::Null);
        let entries = pagehook::decode_log(&log_value);
        recorder
            .note(format!("[call-log] {} entries", entries.len()))
            .await;

        let mut send_event_calls = 0usize;
        for entry in &entries {
            match entry.cmd.as_str() {
                "getLibraryInfo" => {
                    if let Ok(v) = serde_json::from_str::<Value>(&entry.result) {
                        if let Some(ver) = v.pointer("/libraryInfo/version").and_then(Value::as_str)
                        {
                            version = ver.to_string();
                        }
                    }
                }
                "sendEvent" => {
                    send_event_calls += 1;
                    let excerpt: String = entry.result.chars().take(1500).collect();
                    recorder.note(format!("[alloy-sendEvent] {excerpt}")).await;
                    if let Ok(v) = serde_json::from_str::<Value>(&entry.result) {
                        recorder.add_records(parse::extract_activities(&v)).await;
                    }
                }
                _ => {}
            }
        }

        // FallbackInvocation: only when passive channels came up dry, and
        // only for the SDK type already decided.
        let mut fallback_attempts = 0usize;
        if sdk_kind.detected() && recorder.record_count().await == 0 {
            fallback_attempts += 1;
            self.invoke_fallback(session, sdk_kind, recorder).await;
        }

        Ok(ScanOutcome {
            sdk: sdk_kind,
            version,
            send_event_calls,
            fallback_attempts,
        })
    }

    async fn invoke_fallback(
        &self,
        session: &dyn BrowserSession,
        kind: SdkKind,
        recorder: &Arc<SessionRecorder>,
    ) {
        match kind {
            SdkKind::AtJs => {
                info!("falling back to at.js getOffers");
                let value = session
                    .evaluate(&sdk::get_offers_script())
                    .await
                    .unwrap_or(Value::Null);
                match sdk::decode_invocation(&value) {
                    Ok(Some(body)) => {
                        let excerpt: String = body.chars().take(1000).collect();
                        recorder.note(format!("[at.js-getOffers] {excerpt}")).await;
                        if let Ok(v) = serde_json::from_str::<Value>(&body) {
                            recorder.add_records(parse::extract_activities(&v)).await;
                        }
                    }
                    Ok(None) => recorder.note("[at.js-getOffers] namespace gone").await,
                    Err(msg) => recorder.note(format!("[fallback-error] {msg}")).await,
                }
            }
            SdkKind::WebSdk => {
                info!("falling back to synthetic sendEvent");
                let value = session
                    .evaluate(&sdk::send_event_script())
                    .await
                    .unwrap_or(Value::Null);
                match sdk::decode_invocation(&value) {
                    Ok(Some(body)) => {
                        let excerpt: String = body.chars().take(1200).collect();
                        recorder
                            .note(format!("[fallback-sendEvent] {excerpt}"))
                            .await;
                        if let Ok(v) = serde_json::from_str::<Value>(&body) {
                            recorder.add_records(parse::extract_activities(&v)).await;
                        }
                        // Let side-effect network calls triggered by the
                        // event land before assembly.
                        tokio::time::sleep(ms(self.timings.fallback_settle_ms)).await;
                    }
                    Ok(None) => recorder.note("[fallback-sendEvent] entry point gone").await,
                    Err(msg) => recorder.note(format!("[fallback-error] {msg}")).await,
                }
            }
            SdkKind::Absent => {}
        }
    }

    /// Minimal engagement simulation: hover over the page center and scroll
    /// through the first viewport-heights. Some tag rules only fire on
    /// scroll-depth or first-interaction triggers.
    async fn simulate_engagement(&self, session: &dyn BrowserSession) {
        let pauses: Vec<u64> = {
            use rand::distr::{Distribution, Uniform};
            let mut rng = rand::rng();
            let dist = Uniform::new(150u64, 300).unwrap();
            (0..3).map(|_| dist.sample(&mut rng)).collect()
        };

        session
            .evaluate("document.elementFromPoint(720, 400)")
            .await
            .ok();
        for (i, pause) in pauses.into_iter().enumerate() {
            let y = i * 300;
            session
                .evaluate(&format!("window.scrollTo({{top: {y}, behavior: 'smooth'}});"))
                .await
                .ok();
            tokio::time::sleep(ms(pause)).await;
        }
    }

    /// ResultAssembly: dedup + tag the collected records, then classify.
    async fn assemble(
        &self,
        outcome: Result<ScanOutcome, ScanError>,
        recorder: &Arc<SessionRecorder>,
        screenshot: String,
    ) -> ScanResult {
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                let debug = recorder.debug_payload("none", "unknown", screenshot).await;
                warn!("scan failed: {e}");
                return ScanResult::Failure {
                    kind: e.kind(),
                    error: e.to_string(),
                    debug: Some(debug),
                };
            }
        };

        let debug = recorder
            .debug_payload(outcome.sdk.label(), &outcome.version, screenshot)
            .await;

        if !outcome.sdk.detected() {
            return ScanResult::Failure {
                kind: FailureKind::NoSdkDetected,
                error: "Adobe Target not detected — neither window.alloy nor window.adobe.target \
                        appeared within the wait window"
                    .to_string(),
                debug: Some(debug),
            };
        }

        let items = dedupe_and_tag(recorder.records().await, outcome.sdk.label());
        if items.is_empty() {
            let interact_count = debug.interact_requests.len();
            let hint = if interact_count == 0 && outcome.send_event_calls == 0 {
                "→ the consent gate likely still blocks the SDK, or no tag rule condition was met."
            } else {
                "→ interaction requests occurred but no activity matched (audience conditions \
                 unmet, or no eligible campaign)."
            };
            let excerpt = recorder.transcript_excerpt(300).await;
            return ScanResult::Failure {
                kind: FailureKind::SdkDetectedNoActivity,
                error: format!(
                    "{} v{} detected. {} interact request(s), {} sendEvent call(s), {} fallback \
                     attempt(s).\n{}\nResponse excerpt: {}",
                    outcome.sdk.label(),
                    outcome.version,
                    interact_count,
                    outcome.send_event_calls,
                    outcome.fallback_attempts,
                    hint,
                    excerpt
                ),
                debug: Some(debug),
            };
        }

        info!("✅ scan complete: {} unique activities", items.len());
        ScanResult::Success { items, debug }
    }
}

/// First-seen-wins dedup over `(activityId, experienceId, scope)`, tagging
/// every survivor with the detected SDK label. Runs once, here, never in
/// the parser's recursive walk.
fn dedupe_and_tag(records: Vec<ActivityRecord>, sdk_label: &str) -> Vec<ActivityRecord> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    records
        .into_iter()
        .filter_map(|mut record| {
            let key = {
                let (a, e, s) = record.dedup_key();
                (a.to_string(), e.to_string(), s.to_string())
            };
            if !seen.insert(key) {
                return None;
            }
            record.sdk_type = sdk_label.to_string();
            Some(record)
        })
        .collect()
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}
