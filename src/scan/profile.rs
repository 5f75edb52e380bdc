//! Browsing-context profile: spoofed client identity plus locale/timezone
//! emulation. Locale inference is a pluggable strategy; the default
//! hostname/path heuristic is calibrated to the deployments this tool is
//! pointed at and does not pretend to generalize.

use url::Url;

/// Fixed desktop Chrome identity. Kept consistent with the `sec-ch-ua*`
/// header overrides below: a mismatched UA/client-hints pair is itself a
/// bot signal.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.6778.265 Safari/537.36";

const SEC_CH_UA: &str = "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"";

/// Everything the orchestrator applies to a fresh browsing context before
/// navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextProfile {
    pub user_agent: String,
    pub locale: String,
    pub timezone: String,
    pub accept_language: String,
}

impl ContextProfile {
    fn new(locale: &str, timezone: &str, accept_language: &str) -> Self {
        Self {
            user_agent: DESKTOP_USER_AGENT.to_string(),
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            accept_language: accept_language.to_string(),
        }
    }

    /// Header overrides mimicking a real Chrome client.
    pub fn extra_headers(&self) -> Vec<(String, String)> {
        vec![
            ("Accept-Language".to_string(), self.accept_language.clone()),
            ("sec-ch-ua".to_string(), SEC_CH_UA.to_string()),
            ("sec-ch-ua-mobile".to_string(), "?0".to_string()),
            ("sec-ch-ua-platform".to_string(), "\"Windows\"".to_string()),
        ]
    }

    pub fn us_east() -> Self {
        Self::new("en-US", "America/New_York", "en-US,en;q=0.9")
    }

    pub fn uk() -> Self {
        Self::new("en-GB", "Europe/London", "en-GB,en;q=0.9")
    }

    pub fn japan() -> Self {
        Self::new("ja-JP", "Asia/Tokyo", "ja-JP,ja;q=0.9")
    }
}

/// Strategy that maps a target URL to the context profile a real visitor of
/// that page would present.
pub trait LocaleResolver: Send + Sync {
    fn resolve(&self, url: &Url) -> ContextProfile;
}

/// Default resolver: substring matching over the URL's host and path.
///
/// The market segment usually lives in the path (`/uk/`, `/jp/`), not the
/// hostname, so both are inspected.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostHeuristicResolver;

impl LocaleResolver for HostHeuristicResolver {
    fn resolve(&self, url: &Url) -> ContextProfile {
        let haystack = format!(
            "{}{}",
            url.host_str().unwrap_or_default().to_ascii_lowercase(),
            url.path().to_ascii_lowercase()
        );
        if haystack.contains("/jp") || haystack.contains("jpn") {
            ContextProfile::japan()
        } else if haystack.contains("/uk") || haystack.contains(".co.uk") {
            ContextProfile::uk()
        } else {
            ContextProfile::us_east()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(u: &str) -> ContextProfile {
        HostHeuristicResolver.resolve(&Url::parse(u).unwrap())
    }

    #[test]
    fn uk_path_selects_london() {
        let p = resolve("https://www.samsung.com/uk/smartphones/");
        assert_eq!(p.timezone, "Europe/London");
        assert_eq!(p.locale, "en-GB");
    }

    #[test]
    fn jp_path_selects_tokyo() {
        assert_eq!(resolve("https://www.samsung.com/jp/").locale, "ja-JP");
        assert_eq!(resolve("https://shop.example.com/jpn/top").locale, "ja-JP");
    }

    #[test]
    fn anything_else_defaults_to_us() {
        let p = resolve("https://www.example.com/de/");
        assert_eq!(p.timezone, "America/New_York");
        assert_eq!(p.accept_language, "en-US,en;q=0.9");
    }

    #[test]
    fn headers_stay_consistent_with_user_agent() {
        let p = ContextProfile::us_east();
        assert!(p.user_agent.contains("Chrome/131"));
        let headers = p.extra_headers();
        let ua_hint = headers.iter().find(|(k, _)| k == "sec-ch-ua").unwrap();
        assert!(ua_hint.1.contains("v=\"131\""));
    }
}
