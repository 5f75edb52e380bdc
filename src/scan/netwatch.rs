//! Network interception layer.
//!
//! Subscribes to request/response events on the browsing session (main
//! frame, iframes, and workers all surface through the same CDP stream),
//! records observed traffic into the [`SessionRecorder`], and feeds every
//! interaction-endpoint response body through the parser. Also hosts the
//! CDP Fetch hook that neutralizes the consent vendor's autoblock script.

use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use aho_corasick::AhoCorasick;
use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, EventRequestPaused, FulfillRequestParams, HeaderEntry, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventRequestWillBeSent, EventResponseReceived, GetResponseBodyParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::consent::{AUTOBLOCK_STUB_BODY, AUTOBLOCK_URL_MARKER, AUTOBLOCK_URL_PATTERN};
use super::recorder::SessionRecorder;
use crate::parse;

/// Endpoints the SDK fetches/reports decisions through. Substring match,
/// case-insensitive: AEP Edge interact (two URL spellings), Analytics
/// `smetrics` beacons, the legacy Target edge domain, and at.js delivery.
const INTERACT_PATTERNS: &[&str] = &[
    "v1/interact",
    "interact?configid",
    "smetrics",
    "tt.omtrdc.net",
    "/delivery",
];

static INTERACT_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn interact_matcher() -> &'static AhoCorasick {
    INTERACT_MATCHER.get_or_init(|| {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(INTERACT_PATTERNS)
            .expect("valid interaction-endpoint patterns")
    })
}

/// Returns `true` when this URL belongs to a known interaction endpoint.
pub fn is_interact_url(url: &str) -> bool {
    interact_matcher().is_match(url)
}

static BRACE_SPAN: OnceLock<Regex> = OnceLock::new();

fn brace_span() -> &'static Regex {
    // Greedy across newlines: first `{` through last `}`.
    BRACE_SPAN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid brace pattern"))
}

/// Strict JSON parse, then the recovery heuristic: the largest
/// brace-delimited substring. Delivery responses occasionally arrive with a
/// debug prefix or trailing garbage the strict parser chokes on.
pub fn parse_lenient(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }
    let span = brace_span().find(text)?;
    serde_json::from_str(span.as_str()).ok()
}

/// Subscribe the request/response listeners for this page. Listener tasks
/// run until the page's event streams close at session teardown.
pub async fn install(page: &Page, recorder: Arc<SessionRecorder>) -> Result<()> {
    page.execute(EnableParams::default())
        .await
        .map_err(|e| anyhow!("Network.enable failed: {e}"))?;

    let mut requests = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(|e| anyhow!("request listener failed: {e}"))?;
    let req_recorder = recorder.clone();
    tokio::spawn(async move {
        while let Some(event) = requests.next().await {
            let url = event.request.url.clone();
            req_recorder.saw_request(url.clone()).await;
            if is_interact_url(&url) {
                req_recorder.saw_interact(url).await;
            }
        }
    });

    let mut responses = page
        .event_listener::<EventResponseReceived>()
        .await
        .map_err(|e| anyhow!("response listener failed: {e}"))?;
    let resp_page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = responses.next().await {
            if !is_interact_url(&event.response.url) {
                continue;
            }
            capture_interact_response(&resp_page, &recorder, &event).await;
        }
    });

    Ok(())
}

/// Read, parse, and record one matched response. Every outcome leaves a
/// transcript line; none of them fails the scan.
async fn capture_interact_response(
    page: &Page,
    recorder: &Arc<SessionRecorder>,
    event: &EventResponseReceived,
) {
    let status = event.response.status;
    let short_url: String = event.response.url.chars().take(100).collect();
    let mut line = format!("[network-response] HTTP{status} {short_url}");

    if !(200..300).contains(&status) {
        line.push_str(" (skip: non-2xx)");
        recorder.note(line).await;
        return;
    }

    // Body is only retrievable once loading finished; a short grace period
    // covers the gap between responseReceived and loadingFinished.
    tokio::time::sleep(Duration::from_millis(250)).await;

    let body = match page
        .execute(GetResponseBodyParams::new(event.request_id.clone()))
        .await
    {
        Ok(returns) => {
            let raw = returns.result.body.clone();
            if returns.result.base64_encoded {
                BASE64
                    .decode(raw.as_bytes())
                    .ok()
                    .and_then(|b| String::from_utf8(b).ok())
                    .unwrap_or_default()
            } else {
                raw
            }
        }
        Err(e) => {
            line.push_str(&format!(" (text-read-error: {e})"));
            recorder.note(line).await;
            return;
        }
    };

    if body.is_empty() {
        line.push_str(" (empty body)");
        recorder.note(line).await;
        return;
    }
    recorder.note(line).await;
    let preview: String = body.chars().take(800).collect();
    recorder.note(format!("body-preview: {preview}")).await;

    match parse_lenient(&body) {
        Some(value) => {
            let records = parse::extract_activities(&value);
            recorder.note(format!("parsed-items: {}", records.len())).await;
            debug!(
                "interact response {} yielded {} records",
                short_url,
                records.len()
            );
            recorder.add_records(records).await;
        }
        None => {
            recorder.note("(JSON parse failed)").await;
        }
    }
}

/// Intercept the consent vendor's remote autoblock script and serve an empty
/// success response in its place. Uses a URL-scoped Fetch pattern so no other
/// request is ever paused.
pub async fn neutralize_autoblock(page: &Page) -> Result<()> {
    let pattern = RequestPattern::builder()
        .url_pattern(AUTOBLOCK_URL_PATTERN)
        .request_stage(RequestStage::Request)
        .build();
    page.execute(fetch::EnableParams::builder().pattern(pattern).build())
        .await
        .map_err(|e| anyhow!("Fetch.enable failed: {e}"))?;

    let mut paused = page
        .event_listener::<EventRequestPaused>()
        .await
        .map_err(|e| anyhow!("fetch listener failed: {e}"))?;
    let fetch_page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = paused.next().await {
            let url = event.request.url.to_ascii_lowercase();
            if !url.contains(AUTOBLOCK_URL_MARKER) {
                // Scoped pattern should prevent this; release the request
                // rather than stalling it.
                let _ = fetch_page
                    .execute(fetch::ContinueRequestParams::new(event.request_id.clone()))
                    .await;
                continue;
            }
            let mut params = FulfillRequestParams::new(event.request_id.clone(), 200);
            params.response_headers = Some(vec![HeaderEntry {
                name: "Content-Type".to_string(),
                value: "application/javascript; charset=utf-8".to_string(),
            }]);
            params.body = Some(BASE64.encode(AUTOBLOCK_STUB_BODY).into());
            if let Err(e) = fetch_page.execute(params).await {
                warn!("autoblock fulfill failed (non-fatal): {e}");
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interact_matching_covers_both_sdk_generations() {
        assert!(is_interact_url(
            "https://edge.adobedc.net/ee/v1/interact?configId=abc"
        ));
        assert!(is_interact_url(
            "https://example.tt.omtrdc.net/rest/v1/delivery?client=x"
        ));
        assert!(is_interact_url("https://smetrics.example.com/b/ss/rsid"));
        assert!(is_interact_url("https://x.com/INTERACT?CONFIGID=1"));
        assert!(!is_interact_url("https://example.com/index.html"));
        assert!(!is_interact_url("https://cdn.example.com/alloy.min.js"));
    }

    #[test]
    fn lenient_parse_recovers_wrapped_json() {
        let wrapped = "/**/ {\"handle\":[]} \n";
        let v = parse_lenient(wrapped).unwrap();
        assert!(v.get("handle").is_some());

        assert!(parse_lenient("no json here").is_none());
        assert!(parse_lenient("}{").is_none());
        assert!(parse_lenient("{\"a\":1}").is_some());
    }
}
