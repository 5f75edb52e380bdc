//! Per-scan observation state.
//!
//! Written from the orchestrator *and* from the CDP listener tasks it spawns,
//! so every list is append-only behind a mutex with short lock sections.
//! One recorder per scan; dropped with the scan.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::core::config::{MAX_TRACKED_REQUESTS, TRANSCRIPT_CAP};
use crate::core::types::{ActivityRecord, ScanDebug};

#[derive(Default)]
pub struct SessionRecorder {
    all_requests: Mutex<Vec<String>>,
    interact_requests: Mutex<Vec<String>>,
    records: Mutex<Vec<ActivityRecord>>,
    transcript: Mutex<String>,
}

impl SessionRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track one observed request URL. Keeps the first
    /// [`MAX_TRACKED_REQUESTS`]; later traffic is noise for diagnostics.
    pub async fn saw_request(&self, url: String) {
        let mut all = self.all_requests.lock().await;
        if all.len() < MAX_TRACKED_REQUESTS {
            all.push(url);
        }
    }

    /// Track one interaction-endpoint URL. Uncapped, since these are the signal.
    pub async fn saw_interact(&self, url: String) {
        self.interact_requests.lock().await.push(url);
    }

    pub async fn interact_count(&self) -> usize {
        self.interact_requests.lock().await.len()
    }

    /// Append one line to the diagnostic transcript. Stops accepting once the
    /// cap is reached; the transcript is a debugging aid, not a log sink.
    pub async fn note(&self, line: impl AsRef<str>) {
        let mut t = self.transcript.lock().await;
        if t.len() >= TRANSCRIPT_CAP {
            return;
        }
        t.push('\n');
        t.push_str(line.as_ref());
        if t.len() > TRANSCRIPT_CAP {
            t.truncate(TRANSCRIPT_CAP);
        }
    }

    pub async fn add_records(&self, records: Vec<ActivityRecord>) {
        if records.is_empty() {
            return;
        }
        self.records.lock().await.extend(records);
    }

    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Collected records in observation order (undeduplicated).
    pub async fn records(&self) -> Vec<ActivityRecord> {
        self.records.lock().await.clone()
    }

    pub async fn transcript_excerpt(&self, max: usize) -> String {
        let t = self.transcript.lock().await;
        t.chars().take(max).collect()
    }

    /// Assemble the debug payload. `screenshot` and the SDK identity are
    /// owned by the orchestrator and passed in at the end.
    pub async fn debug_payload(
        &self,
        sdk_type: &str,
        sdk_version: &str,
        screenshot_base64: String,
    ) -> ScanDebug {
        let transcript = {
            let t = self.transcript.lock().await;
            if t.is_empty() {
                "(none)".to_string()
            } else {
                t.clone()
            }
        };
        ScanDebug {
            screenshot_base64,
            all_requests: self.all_requests.lock().await.clone(),
            interact_requests: self.interact_requests.lock().await.clone(),
            sdk_type: sdk_type.to_string(),
            sdk_version: sdk_version.to_string(),
            raw_sdk_data: transcript,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_list_is_capped() {
        let rec = SessionRecorder::new();
        for i in 0..200 {
            rec.saw_request(format!("https://example.com/{i}")).await;
        }
        let debug = rec.debug_payload("none", "unknown", String::new()).await;
        assert_eq!(debug.all_requests.len(), MAX_TRACKED_REQUESTS);
    }

    #[tokio::test]
    async fn transcript_is_capped() {
        let rec = SessionRecorder::new();
        let line = "x".repeat(500);
        for _ in 0..50 {
            rec.note(&line).await;
        }
        let debug = rec.debug_payload("none", "unknown", String::new()).await;
        assert!(debug.raw_sdk_data.len() <= TRANSCRIPT_CAP);
    }

    #[tokio::test]
    async fn interact_list_is_not_capped() {
        let rec = SessionRecorder::new();
        for i in 0..200 {
            rec.saw_interact(format!("https://edge.net/v1/interact?{i}")).await;
        }
        assert_eq!(rec.interact_count().await, 200);
    }
}
