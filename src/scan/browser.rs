//! Browser launch policy.
//!
//! * Finding a usable browser executable (Brave → Chrome → Chromium, cross-platform).
//! * Building a launch config with stealth defaults.
//! * The two-stage launch strategy: privileged system-browser launch first
//!   (headful in interactive environments), headless auto-detected fallback.
//!
//! Stealth model: process-level flags live here; JS-level overrides are an
//! init script injected by the orchestrator before any page script runs.

use anyhow::{anyhow, Result};
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::Browser;
use futures::StreamExt;
use std::path::Path;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::config::{self, VIEWPORT_HEIGHT, VIEWPORT_WIDTH};

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan – finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_chrome_executable() -> Option<String> {
    if let Some(p) = config::chrome_executable_override() {
        return Some(p);
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "brave-browser",
            "brave",
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/brave-browser",
            "/usr/bin/brave",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

/// Init script applied before any page script: hides the automation flag and
/// plants the browser-vendor namespace headless builds lack.
pub fn stealth_script() -> String {
    r#"
(() => {
  try {
    Object.defineProperty(Navigator.prototype, "webdriver", {
      get: () => undefined,
      configurable: true,
    });
  } catch (e) {}
  try { delete navigator.webdriver; } catch (e) {}
  if (!window.chrome) { window.chrome = { runtime: {} }; }
})();
"#
    .to_string()
}

/// Build a `BrowserConfig` with stealth defaults.
///
/// Flags chosen for:
/// * Compatibility with CI / restricted environments (`--no-sandbox`, `--disable-dev-shm-usage`).
/// * Stealth — `--disable-blink-features=AutomationControlled` hides the
///   `navigator.webdriver` flag at the protocol level.
///
/// A headful launch parks the window far off-screen so an interactive
/// machine never sees it.
pub fn build_browser_config(
    exe: Option<&str>,
    headless: bool,
    user_agent: &str,
) -> Result<BrowserConfig> {
    let mut builder = BrowserConfig::builder()
        .viewport(Viewport {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(VIEWPORT_WIDTH, VIEWPORT_HEIGHT)
        .arg("--disable-gpu")
        .arg("--no-sandbox") // often required in CI / restricted environments
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage") // avoids /dev/shm OOM in constrained environments
        .arg("--no-zygote")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--mute-audio")
        // Stealth: suppress CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", user_agent));

    if let Some(exe) = exe {
        builder = builder.chrome_executable(exe);
    }
    if headless {
        builder = builder.arg("--hide-scrollbars");
    } else {
        builder = builder.with_head().arg("--window-position=-2400,-2400");
    }

    builder
        .build()
        .map_err(|e| anyhow!("Failed to build browser config: {}", e))
}

/// Launch one browser for one scan.
///
/// In interactive environments the first attempt is a headful launch of a
/// discovered system browser, the strongest fingerprint. On failure, or
/// when no display exists, falls back to a headless launch (auto-detected
/// executable when discovery found nothing). The returned task drives the
/// CDP event handler and must be aborted at teardown.
pub async fn launch_scan_browser(user_agent: &str) -> Result<(Browser, JoinHandle<()>)> {
    let exe = find_chrome_executable();
    let headless = config::headless_required();

    if !headless {
        if let Some(exe) = exe.as_deref() {
            let cfg = build_browser_config(Some(exe), false, user_agent)?;
            match Browser::launch(cfg).await {
                Ok((browser, handler)) => {
                    info!("🚀 Launched system browser headful ({})", exe);
                    return Ok((browser, spawn_handler(handler)));
                }
                Err(e) => {
                    warn!("Headful launch failed ({}): {} — falling back to headless", exe, e);
                }
            }
        }
    }

    let cfg = build_browser_config(exe.as_deref(), true, user_agent)?;
    let (browser, handler) = Browser::launch(cfg)
        .await
        .map_err(|e| anyhow!("Failed to launch browser ({:?}): {}", exe, e))?;
    info!("🚀 Launched headless browser ({})", exe.as_deref().unwrap_or("auto-detected"));
    Ok((browser, spawn_handler(handler)))
}

fn spawn_handler(mut handler: chromiumoxide::Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!("CDP handler error: {}", e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stealth_script_covers_both_overrides() {
        let s = stealth_script();
        assert!(s.contains("webdriver"));
        assert!(s.contains("window.chrome"));
    }

    #[test]
    fn headless_config_builds_with_explicit_executable() {
        // Any existing path works; config building never runs the binary.
        let exe = std::env::current_exe().unwrap();
        let cfg = build_browser_config(Some(exe.to_str().unwrap()), true, "UA-Test/1.0");
        assert!(cfg.is_ok());
    }
}
