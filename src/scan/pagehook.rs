//! In-page call interceptor for the SDK entry point.
//!
//! Some decisions never surface as a distinguishable network response (cached
//! delivery, pre-hydrated state), so the network tap alone under-reports.
//! This hook captures every call at the source instead: an accessor installed
//! on the page-global entry-point name intercepts the moment the host page
//! assigns its SDK function and swaps in a logging wrapper with an identical
//! call signature. When the accessor cannot be installed, a polling fallback
//! wraps a late-appearing binding reactively. Both variants live in one
//! injected script, so callers see a single "install the hook" capability.

use serde_json::Value;

use crate::core::types::SdkCallLogEntry;

/// Page-global the wrapper appends `{cmd, result}` pairs to. Append-only for
/// the page's lifetime; drained once by the orchestrator.
pub const CALL_LOG_GLOBAL: &str = "__scoutCallLog";

/// The SDK entry-point name the hook instruments.
pub const SDK_ENTRY_POINT: &str = "alloy";

/// Instrumentation script. Must be registered to run before any page script
/// (`Page.addScriptToEvaluateOnNewDocument`), otherwise the host page wins
/// the race and the accessor lands on top of an existing binding.
pub fn call_interceptor_script() -> String {
    format!(
        r#"
(() => {{
  window.{log} = [];

  let _real = null;

  const wrap = (fn) => {{
    const wrapped = function (cmd, ...args) {{
      const p = fn.apply(window, [cmd, ...args]);
      if (p && typeof p.then === "function") {{
        p.then((res) => {{
          window.{log}.push({{ cmd: String(cmd), result: JSON.stringify(res ?? null) }});
        }}).catch(() => {{}});
      }}
      return p;
    }};
    wrapped.__wrapped = true;
    return wrapped;
  }};

  try {{
    Object.defineProperty(window, "{entry}", {{
      configurable: true,
      get() {{ return _real; }},
      set(fn) {{ _real = typeof fn === "function" ? wrap(fn) : fn; }},
    }});
  }} catch (e) {{
    // Accessor install failed (binding made non-configurable); poll instead.
    let done = false;
    const tid = setInterval(() => {{
      if (done) return;
      const existing = window.{entry};
      if (typeof existing === "function" && !existing.__wrapped) {{
        window.{entry} = wrap(existing);
        done = true;
        clearInterval(tid);
      }}
    }}, 50);
  }}
}})();
"#,
        log = CALL_LOG_GLOBAL,
        entry = SDK_ENTRY_POINT,
    )
}

/// Expression draining the call log (returns the raw array).
pub fn drain_expression() -> String {
    format!("window.{CALL_LOG_GLOBAL} || []")
}

/// Decode the drained log value. Entries that don't match the expected shape
/// are dropped rather than failing the drain.
pub fn decode_log(value: &Value) -> Vec<SdkCallLogEntry> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|e| serde_json::from_value(e.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn script_guards_against_double_wrapping() {
        let script = call_interceptor_script();
        assert!(script.contains("__wrapped"));
        assert!(script.contains("defineProperty"));
        assert!(script.contains(CALL_LOG_GLOBAL));
    }

    #[test]
    fn decode_tolerates_junk_entries() {
        let log = json!([
            { "cmd": "sendEvent", "result": "{}" },
            { "unexpected": true },
            42
        ]);
        let entries = decode_log(&log);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].cmd, "sendEvent");
    }

    #[test]
    fn decode_of_non_array_is_empty() {
        assert!(decode_log(&json!(null)).is_empty());
        assert!(decode_log(&json!({"cmd": "x"})).is_empty());
    }
}
