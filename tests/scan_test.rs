//! Orchestrator tests against a scripted automation session.
//!
//! The mock implements the same `BrowserSession` seam production uses, so
//! these exercise the full state machine — validation, consent sequencing,
//! probe/drain, fallback, classification — without a real browser.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use target_scout::core::config::ScanTimings;
use target_scout::core::types::{FailureKind, ScanResult};
use target_scout::scan::consent::SeedCookie;
use target_scout::scan::pagehook::CALL_LOG_GLOBAL;
use target_scout::scan::profile::ContextProfile;
use target_scout::scan::recorder::SessionRecorder;
use target_scout::scan::session::{BrowserSession, SessionLauncher};
use target_scout::Scanner;

fn fast_timings() -> ScanTimings {
    ScanTimings {
        navigation_timeout_ms: 500,
        post_load_delay_ms: 5,
        click_timeout_ms: 5,
        sdk_wait_ms: 30,
        sdk_settle_ms: 5,
        fallback_settle_ms: 5,
    }
}

// ── Scripted session ─────────────────────────────────────────────────────────

#[derive(Clone)]
struct MockBehavior {
    has_alloy: bool,
    has_target: bool,
    version: String,
    call_log: Value,
    nav_status: Option<u16>,
    fallback_result: Value,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            has_alloy: false,
            has_target: false,
            version: "unknown".to_string(),
            call_log: json!([]),
            nav_status: Some(200),
            fallback_result: Value::Null,
        }
    }
}

struct MockSession {
    behavior: MockBehavior,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn apply_profile(&self, _profile: &ContextProfile) -> Result<()> {
        Ok(())
    }

    async fn add_init_script(&self, _source: &str) -> Result<()> {
        Ok(())
    }

    async fn seed_cookies(&self, _cookies: Vec<SeedCookie>) -> Result<()> {
        Ok(())
    }

    async fn observe_network(&self, _recorder: Arc<SessionRecorder>) -> Result<()> {
        Ok(())
    }

    async fn neutralize_autoblock(&self) -> Result<()> {
        Ok(())
    }

    async fn navigate(&self, _url: &str, _timeout: Duration) -> Result<Option<u16>> {
        Ok(self.behavior.nav_status)
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        // Dispatch on distinguishing markers of each injected script.
        if expression.contains("hasAlloy") {
            return Ok(json!({
                "hasAlloy": self.behavior.has_alloy,
                "hasTarget": self.behavior.has_target,
                "version": self.behavior.version,
            }));
        }
        if expression.contains("sendDisplayEvent") || expression.contains("getOffers") {
            return Ok(self.behavior.fallback_result.clone());
        }
        if expression.contains(CALL_LOG_GLOBAL) {
            return Ok(self.behavior.call_log.clone());
        }
        if expression.contains("typeof window.alloy") {
            return Ok(json!(self.behavior.has_alloy || self.behavior.has_target));
        }
        Ok(Value::Null)
    }

    async fn click(&self, selector: &str, _timeout: Duration) -> Result<()> {
        Err(anyhow!("selector not present: {selector}"))
    }

    async fn wait_for(&self, expression: &str, _timeout: Duration) -> bool {
        self.evaluate(expression)
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    async fn screenshot_jpeg_base64(&self, _quality: i64, _clip_height: u32) -> Result<String> {
        Ok(String::new())
    }

    async fn close(&self) {}
}

struct MockLauncher {
    behavior: MockBehavior,
    launches: Arc<AtomicUsize>,
}

impl MockLauncher {
    fn scanner(behavior: MockBehavior) -> (Scanner, Arc<AtomicUsize>) {
        let launches = Arc::new(AtomicUsize::new(0));
        let launcher = Arc::new(MockLauncher {
            behavior,
            launches: launches.clone(),
        });
        (Scanner::with_launcher(launcher, fast_timings()), launches)
    }
}

#[async_trait]
impl SessionLauncher for MockLauncher {
    async fn launch(&self, _profile: &ContextProfile) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            behavior: self.behavior.clone(),
        }))
    }
}

/// Launcher that must never be reached.
struct FailingLauncher {
    launches: Arc<AtomicUsize>,
}

#[async_trait]
impl SessionLauncher for FailingLauncher {
    async fn launch(&self, _profile: &ContextProfile) -> Result<Box<dyn BrowserSession>> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("no launch strategy succeeded"))
    }
}

// ── Input validation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_urls_fail_without_launching() {
    let launches = Arc::new(AtomicUsize::new(0));
    let scanner = Scanner::with_launcher(
        Arc::new(FailingLauncher {
            launches: launches.clone(),
        }),
        fast_timings(),
    );

    for bad in ["", "   ", "not a url", "ftp://x", "file:///etc/hosts"] {
        let result = scanner.scan(bad).await;
        match result {
            ScanResult::Failure { kind, debug, .. } => {
                assert_eq!(kind, FailureKind::InvalidInput, "input: {bad:?}");
                assert!(debug.is_none(), "InvalidInput must carry no diagnostics");
            }
            ScanResult::Success { .. } => panic!("{bad:?} must not scan"),
        }
    }
    assert_eq!(
        launches.load(Ordering::SeqCst),
        0,
        "validation failures must never launch a browser"
    );
}

#[tokio::test]
async fn launch_failure_is_classified_without_diagnostics() {
    let launches = Arc::new(AtomicUsize::new(0));
    let scanner = Scanner::with_launcher(Arc::new(FailingLauncher { launches }), fast_timings());
    match scanner.scan("https://example.com/").await {
        ScanResult::Failure { kind, error, debug } => {
            assert_eq!(kind, FailureKind::BrowserLaunch);
            assert!(error.contains("no launch strategy succeeded"));
            assert!(debug.is_none());
        }
        ScanResult::Success { .. } => panic!("launch failure must not succeed"),
    }
}

// ── End-to-end paths ─────────────────────────────────────────────────────────

fn handle_payload_body() -> String {
    json!({
        "handle": [{
            "payload": [{
                "scopeDetails": { "activity": { "id": "99" }, "experience": { "id": "2" } },
                "scope": "view"
            }]
        }]
    })
    .to_string()
}

#[tokio::test]
async fn web_sdk_call_log_produces_success() {
    let (scanner, launches) = MockLauncher::scanner(MockBehavior {
        has_alloy: true,
        call_log: json!([
            { "cmd": "getLibraryInfo", "result": r#"{"libraryInfo":{"version":"2.19.0"}}"# },
            { "cmd": "sendEvent", "result": handle_payload_body() },
            // Same decision observed twice — assembly must collapse it.
            { "cmd": "sendEvent", "result": handle_payload_body() },
        ]),
        ..Default::default()
    });

    let result = scanner.scan("https://www.samsung.com/uk/").await;
    assert!(result.is_success(), "expected success, got {result:?}");
    let ScanResult::Success { items, debug } = result else {
        unreachable!();
    };
    assert_eq!(items.len(), 1, "dedup invariant violated");
    assert_eq!(items[0].activity_id, "99");
    assert_eq!(items[0].experience_id, "2");
    assert_eq!(items[0].scope, "view");
    assert_eq!(items[0].sdk_type, "WebSDK");
    assert_eq!(debug.sdk_type, "WebSDK");
    assert_eq!(debug.sdk_version, "2.19.0");
    assert_eq!(launches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn absent_sdk_classifies_no_sdk_detected() {
    let (scanner, _) = MockLauncher::scanner(MockBehavior::default());
    match scanner.scan("https://example.com/").await {
        ScanResult::Failure { kind, debug, .. } => {
            assert_eq!(kind, FailureKind::NoSdkDetected);
            let debug = debug.expect("diagnostics must be attached");
            assert_eq!(debug.sdk_type, "none");
            assert_eq!(debug.sdk_version, "unknown");
        }
        ScanResult::Success { .. } => panic!("no SDK must not succeed"),
    }
}

#[tokio::test]
async fn present_sdk_with_no_records_reports_counts() {
    let (scanner, _) = MockLauncher::scanner(MockBehavior {
        has_alloy: true,
        version: "2.19.0".to_string(),
        ..Default::default()
    });
    match scanner.scan("https://example.com/").await {
        ScanResult::Failure { kind, error, debug } => {
            assert_eq!(kind, FailureKind::SdkDetectedNoActivity);
            assert!(error.contains("WebSDK v2.19.0"), "got: {error}");
            assert!(error.contains("0 interact request(s)"));
            assert!(error.contains("1 fallback attempt(s)"));
            assert!(debug.is_some());
        }
        ScanResult::Success { .. } => panic!("zero records must not succeed"),
    }
}

#[tokio::test]
async fn fallback_send_event_result_feeds_parser() {
    let (scanner, _) = MockLauncher::scanner(MockBehavior {
        has_alloy: true,
        fallback_result: json!(handle_payload_body()),
        ..Default::default()
    });
    let ScanResult::Success { items, .. } = scanner.scan("https://example.com/").await else {
        panic!("fallback records must produce success");
    };
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].activity_id, "99");
}

#[tokio::test]
async fn at_js_wins_when_both_indicators_present() {
    let (scanner, _) = MockLauncher::scanner(MockBehavior {
        has_alloy: true,
        has_target: true,
        version: "2.11.6".to_string(),
        call_log: json!([{ "cmd": "sendEvent", "result": handle_payload_body() }]),
        ..Default::default()
    });
    let ScanResult::Success { items, debug } = scanner.scan("https://example.com/").await else {
        panic!("expected success");
    };
    assert_eq!(items[0].sdk_type, "at.js");
    assert_eq!(debug.sdk_type, "at.js");
}

#[tokio::test]
async fn non_2xx_navigation_is_a_page_load_failure() {
    let (scanner, _) = MockLauncher::scanner(MockBehavior {
        nav_status: Some(404),
        ..Default::default()
    });
    match scanner.scan("https://example.com/missing").await {
        ScanResult::Failure { kind, error, debug } => {
            assert_eq!(kind, FailureKind::PageLoad);
            assert!(error.contains("404"));
            assert!(debug.is_some(), "post-launch failures attach diagnostics");
        }
        ScanResult::Success { .. } => panic!("404 must not succeed"),
    }
}
