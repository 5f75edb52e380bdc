use std::path::Path;

// ---------------------------------------------------------------------------
// ScoutConfig — file-based config loader (target-scout.json) with env-var fallback
// ---------------------------------------------------------------------------

/// Hard caps that are part of the scan contract, not tunables.
pub const MAX_TRACKED_REQUESTS: usize = 150;
pub const TRANSCRIPT_CAP: usize = 8000;

/// Context viewport. The screenshot clips to the top 600px of this.
pub const VIEWPORT_WIDTH: u32 = 1440;
pub const VIEWPORT_HEIGHT: u32 = 900;
pub const SCREENSHOT_CLIP_HEIGHT: u32 = 600;

/// Scan-step sub-config (mirrors the `scan` key in target-scout.json).
/// Every field is optional; `resolve()` fills in the defaults.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ScanTimingConfig {
    /// Navigation budget up to the `load` event. Default: 45_000.
    pub navigation_timeout_ms: Option<u64>,
    /// Settle delay between `load` and the consent-button pass. Default: 1_500.
    pub post_load_delay_ms: Option<u64>,
    /// Per-selector click budget during the consent pass. Default: 800.
    pub click_timeout_ms: Option<u64>,
    /// Poll budget for an SDK indicator to appear. Default: 10_000.
    pub sdk_wait_ms: Option<u64>,
    /// Settle delay for async personalization calls to finish. Default: 5_000.
    pub sdk_settle_ms: Option<u64>,
    /// Settle delay after a fallback `sendEvent`, letting triggered network
    /// calls land. Default: 3_000.
    pub fallback_settle_ms: Option<u64>,
}

/// Fully-resolved step timings handed to the orchestrator.
#[derive(Clone, Copy, Debug)]
pub struct ScanTimings {
    pub navigation_timeout_ms: u64,
    pub post_load_delay_ms: u64,
    pub click_timeout_ms: u64,
    pub sdk_wait_ms: u64,
    pub sdk_settle_ms: u64,
    pub fallback_settle_ms: u64,
}

impl Default for ScanTimings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 45_000,
            post_load_delay_ms: 1_500,
            click_timeout_ms: 800,
            sdk_wait_ms: 10_000,
            sdk_settle_ms: 5_000,
            fallback_settle_ms: 3_000,
        }
    }
}

impl ScanTimingConfig {
    /// JSON field → `TARGET_SCOUT_<FIELD>` env var → default.
    pub fn resolve(&self) -> ScanTimings {
        let d = ScanTimings::default();
        ScanTimings {
            navigation_timeout_ms: pick(
                self.navigation_timeout_ms,
                "TARGET_SCOUT_NAVIGATION_TIMEOUT_MS",
                d.navigation_timeout_ms,
            ),
            post_load_delay_ms: pick(
                self.post_load_delay_ms,
                "TARGET_SCOUT_POST_LOAD_DELAY_MS",
                d.post_load_delay_ms,
            ),
            click_timeout_ms: pick(
                self.click_timeout_ms,
                "TARGET_SCOUT_CLICK_TIMEOUT_MS",
                d.click_timeout_ms,
            ),
            sdk_wait_ms: pick(self.sdk_wait_ms, "TARGET_SCOUT_SDK_WAIT_MS", d.sdk_wait_ms),
            sdk_settle_ms: pick(
                self.sdk_settle_ms,
                "TARGET_SCOUT_SDK_SETTLE_MS",
                d.sdk_settle_ms,
            ),
            fallback_settle_ms: pick(
                self.fallback_settle_ms,
                "TARGET_SCOUT_FALLBACK_SETTLE_MS",
                d.fallback_settle_ms,
            ),
        }
    }
}

fn pick(field: Option<u64>, env_key: &str, default: u64) -> u64 {
    if let Some(v) = field {
        return v;
    }
    std::env::var(env_key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Top-level config loaded from `target-scout.json`.
#[derive(serde::Deserialize, Default, Clone, Debug)]
pub struct ScoutConfig {
    #[serde(default)]
    pub scan: ScanTimingConfig,
}

/// Load `target-scout.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `TARGET_SCOUT_CONFIG` env var path
/// 2. `./target-scout.json`  (process cwd)
/// 3. `../target-scout.json` (one level up)
///
/// Missing file → `ScoutConfig::default()` (silent, all env-var fallbacks apply).
/// Parse error → log a warning, return `ScoutConfig::default()`.
pub fn load_scout_config() -> ScoutConfig {
    let candidates: Vec<std::path::PathBuf> = {
        let mut v = vec![
            std::path::PathBuf::from("target-scout.json"),
            std::path::PathBuf::from("../target-scout.json"),
        ];
        if let Ok(env_path) = std::env::var("TARGET_SCOUT_CONFIG") {
            v.insert(0, std::path::PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<ScoutConfig>(&contents) {
                Ok(cfg) => {
                    tracing::info!("target-scout.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    tracing::warn!(
                        "target-scout.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return ScoutConfig::default();
                }
            },
            Err(_) => continue, // file not found at this path — try next
        }
    }

    ScoutConfig::default()
}

// ---------------------------------------------------------------------------

pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";
pub const ENV_FORCE_HEADLESS: &str = "TARGET_SCOUT_HEADLESS";

/// Optional override for the Chromium-family browser executable.
///
/// Default behavior is **auto-discovery** (see `scan::browser::find_chrome_executable()`).
/// This function only returns a value when `CHROME_EXECUTABLE` is set to an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

/// Whether the scan must run headless regardless of environment.
///
/// `TARGET_SCOUT_HEADLESS=1` forces it; otherwise headless is chosen when no
/// display server is reachable (typical for CI and server deployments).
pub fn headless_required() -> bool {
    if let Ok(v) = std::env::var(ENV_FORCE_HEADLESS) {
        let v = v.trim().to_ascii_lowercase();
        if matches!(v.as_str(), "1" | "true" | "yes" | "on") {
            return true;
        }
        if matches!(v.as_str(), "0" | "false" | "no" | "off") {
            return false;
        }
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("DISPLAY").map(|d| d.trim().is_empty()).unwrap_or(true)
            && std::env::var("WAYLAND_DISPLAY").map(|d| d.trim().is_empty()).unwrap_or(true)
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_match_contract() {
        let t = ScanTimingConfig::default().resolve();
        assert_eq!(t.navigation_timeout_ms, 45_000);
        assert_eq!(t.sdk_wait_ms, 10_000);
        assert_eq!(t.click_timeout_ms, 800);
        assert_eq!(t.sdk_settle_ms, 5_000);
    }

    #[test]
    fn file_fields_win_over_defaults() {
        let cfg: ScoutConfig =
            serde_json::from_str(r#"{"scan":{"navigation_timeout_ms":9000}}"#).unwrap();
        let t = cfg.scan.resolve();
        assert_eq!(t.navigation_timeout_ms, 9_000);
        assert_eq!(t.post_load_delay_ms, 1_500);
    }
}
