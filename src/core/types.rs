use serde::{Deserialize, Serialize};

/// One personalization activity observed during a scan.
///
/// `activity_id` is the only required field; the parser never emits a record
/// without one. Everything else degrades to an empty string when the payload
/// shape doesn't carry it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    pub activity_id: String,
    #[serde(default)]
    pub experience_id: String,
    #[serde(default)]
    pub scope: String,
    /// Filled in once at result assembly ("WebSDK" / "at.js"), never by the parser.
    #[serde(default)]
    pub sdk_type: String,
    #[serde(default)]
    pub activity_name: String,
    #[serde(default)]
    pub experience_name: String,
}

impl ActivityRecord {
    /// Dedup identity. Two records sharing this key are the same decision
    /// observed through different channels.
    pub fn dedup_key(&self) -> (&str, &str, &str) {
        (&self.activity_id, &self.experience_id, &self.scope)
    }
}

/// Which Adobe Target delivery flavor the page runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkKind {
    /// AEP Web SDK — `window.alloy` entry point, Edge `interact` endpoint.
    WebSdk,
    /// Legacy at.js — `window.adobe.target` namespace, `/delivery` endpoint.
    AtJs,
    /// Neither indicator present.
    Absent,
}

impl SdkKind {
    pub fn label(self) -> &'static str {
        match self {
            SdkKind::WebSdk => "WebSDK",
            SdkKind::AtJs => "at.js",
            SdkKind::Absent => "none",
        }
    }

    pub fn detected(self) -> bool {
        !matches!(self, SdkKind::Absent)
    }
}

/// One `{command, result}` pair captured by the in-page call interceptor.
///
/// `result` is the JSON-serialized resolved value of the SDK promise,
/// serialized *inside* the page so structured values cross the CDP boundary
/// as plain strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkCallLogEntry {
    pub cmd: String,
    pub result: String,
}

/// Diagnostics attached to every result that got past browser launch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanDebug {
    /// JPEG screenshot of the top of the page, base64. Empty on capture failure.
    pub screenshot_base64: String,
    /// Every request URL observed on the session, capped at 150.
    pub all_requests: Vec<String>,
    /// Requests matching the interaction-endpoint patterns (uncapped).
    pub interact_requests: Vec<String>,
    pub sdk_type: String,
    pub sdk_version: String,
    /// Free-form transcript of network/SDK observations, capped at ~8000 chars.
    pub raw_sdk_data: String,
}

/// Failure taxonomy; classification rules live in `scan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
    BrowserLaunch,
    PageLoad,
    NoSdkDetected,
    SdkDetectedNoActivity,
    Internal,
}

/// Outcome of one `scan()` call. All failures are values; the operation
/// boundary never raises.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ScanResult {
    #[serde(rename = "ok")]
    Success {
        items: Vec<ActivityRecord>,
        debug: ScanDebug,
    },
    #[serde(rename = "error")]
    Failure {
        kind: FailureKind,
        error: String,
        /// Absent only when the failure happened before a browser existed.
        #[serde(skip_serializing_if = "Option::is_none")]
        debug: Option<ScanDebug>,
    },
}

impl ScanResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ScanResult::Success { .. })
    }

    pub fn items(&self) -> &[ActivityRecord] {
        match self {
            ScanResult::Success { items, .. } => items,
            ScanResult::Failure { .. } => &[],
        }
    }

    pub fn debug(&self) -> Option<&ScanDebug> {
        match self {
            ScanResult::Success { debug, .. } => Some(debug),
            ScanResult::Failure { debug, .. } => debug.as_ref(),
        }
    }
}

/// Body of `POST /scan`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanRequest {
    pub url: String,
}
