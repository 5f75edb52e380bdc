//! SDK presence/version introspection and the active fallback strategies.
//!
//! Passive observation (network tap + call log) is preferred; the fallback
//! invocations here run only when the SDK is confirmed present and both
//! passive channels came up empty after the primary wait window. Both
//! strategies are best-effort: an error is a diagnostic line, never a scan
//! failure.

use serde_json::Value;

/// Prefix marking an in-page fallback error that was caught and stringified.
pub const ERROR_SENTINEL: &str = "__error__:";

/// Truthy once either SDK indicator exists. Used for the bounded
/// `AwaitingSdk` poll; timing out is non-fatal.
pub fn presence_expression() -> String {
    "typeof window.alloy === 'function' || !!(window.adobe && window.adobe.target)".to_string()
}

/// What the presence/version probe reports.
#[derive(Debug, Clone, Default)]
pub struct SdkProbe {
    pub has_alloy: bool,
    pub has_target: bool,
    pub version: String,
}

/// Presence + version introspection. Web SDK exposes no synchronous version
/// API, so the probe reads a `getLibraryInfo` entry out of the call log if
/// the host page happened to issue one; at.js is asked directly.
pub fn probe_script() -> String {
    format!(
        r#"
(() => {{
  const hasAlloy  = typeof window.alloy === "function";
  const hasTarget = !!(window.adobe && window.adobe.target);
  let version = "unknown";
  if (hasAlloy) {{
    try {{
      const log = window.{log} || [];
      const info = log.find((e) => e.cmd === "getLibraryInfo");
      if (info) {{
        const parsed = JSON.parse(info.result);
        version = String((parsed && parsed.libraryInfo && parsed.libraryInfo.version) || "unknown");
      }}
    }} catch (e) {{}}
  }}
  if (hasTarget) {{
    try {{
      const info = window.adobe.target.getLibraryInfo();
      version = String((info && info.version) || "unknown");
    }} catch (e) {{}}
  }}
  return {{ hasAlloy: hasAlloy, hasTarget: hasTarget, version: version }};
}})()
"#,
        log = super::pagehook::CALL_LOG_GLOBAL,
    )
}

pub fn decode_probe(value: &Value) -> SdkProbe {
    SdkProbe {
        has_alloy: value
            .get("hasAlloy")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        has_target: value
            .get("hasTarget")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        version: value
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string(),
    }
}

/// Legacy at.js fallback: callback-based offer request for the page-load
/// scope, bridged to a promise. Resolves to the JSON-serialized response,
/// `null` when the namespace vanished, or an [`ERROR_SENTINEL`] string.
pub fn get_offers_script() -> String {
    format!(
        r#"
(async () => {{
  const t = window.adobe && window.adobe.target;
  if (!t) return null;
  try {{
    return await new Promise((resolve, reject) => {{
      t.getOffers({{
        request: {{ execute: {{ pageLoad: {{}} }} }},
        success: (r) => resolve(JSON.stringify(r)),
        error:   (e) => reject(new Error(String(e))),
      }});
    }});
  }} catch (e) {{ return "{sentinel}" + e.message; }}
}})()
"#,
        sentinel = ERROR_SENTINEL,
    )
}

/// Web SDK fallback: a synthetic proposition-fetch event. Decision rendering
/// stays on so scoped content resolves, but the display notification is
/// suppressed so the scan does not pollute the page's impression counts.
pub fn send_event_script() -> String {
    format!(
        r#"
(async () => {{
  if (typeof window.alloy !== "function") return null;
  try {{
    const result = await window.alloy("sendEvent", {{
      renderDecisions: true,
      personalization: {{ sendDisplayEvent: false }},
      xdm: {{
        eventType: "decisioning.propositionFetch",
        web: {{
          webPageDetails: {{ URL: window.location.href }},
          webReferrer:    {{ URL: document.referrer }},
        }},
        timestamp: new Date().toISOString(),
      }},
    }});
    return JSON.stringify(result ?? null);
  }} catch (e) {{ return "{sentinel}" + e.message; }}
}})()
"#,
        sentinel = ERROR_SENTINEL,
    )
}

/// Unwrap a fallback invocation result: `Some(json_string)` on success,
/// `Err(message)` when the page reported a caught error, `Ok(None)` when the
/// SDK was gone by invocation time.
pub fn decode_invocation(value: &Value) -> Result<Option<String>, String> {
    match value.as_str() {
        None => Ok(None),
        Some(s) => match s.strip_prefix(ERROR_SENTINEL) {
            Some(msg) => Err(msg.to_string()),
            None => Ok(Some(s.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probe_decodes_partial_objects() {
        let p = decode_probe(&json!({ "hasAlloy": true }));
        assert!(p.has_alloy);
        assert!(!p.has_target);
        assert_eq!(p.version, "unknown");
    }

    #[test]
    fn invocation_decode_separates_errors() {
        assert_eq!(decode_invocation(&json!(null)), Ok(None));
        assert_eq!(
            decode_invocation(&json!("{\"handle\":[]}")),
            Ok(Some("{\"handle\":[]}".to_string()))
        );
        assert_eq!(
            decode_invocation(&json!("__error__:timeout")),
            Err("timeout".to_string())
        );
    }

    #[test]
    fn send_event_suppresses_display_notification() {
        let script = send_event_script();
        assert!(script.contains("sendDisplayEvent: false"));
        assert!(script.contains("decisioning.propositionFetch"));
        assert!(script.contains("renderDecisions: true"));
    }
}
