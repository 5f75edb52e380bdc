//! Consent-bypass subsystem for TrustArc-gated pages.
//!
//! The personalization SDK never executes while the consent-management gate
//! is closed, so nothing downstream is observable. This module opens the
//! gate from four directions before and after page load: seeded consent
//! cookies, mirrored storage keys, a mocked `truste.cma.callApi`, and
//! repeated "consent granted" broadcasts over every channel a tag-management
//! rule might listen on. The CMP's remote autoblock script is neutralized
//! separately (see `scan::netwatch::neutralize_autoblock`).

use url::Url;

/// Ordered consent-button selector candidates. Clicking is best-effort;
/// most pages have at most one of these.
pub const CONSENT_SELECTORS: &[&str] = &[
    "#truste-consent-button",
    "#truste-show-consent",
    ".truste-button-2",
    "[data-testid='consent-accept']",
    "button[aria-label*='Accept']",
    "button[aria-label*='accept']",
];

/// URL substring of the CMP's remote autoblock asset (case-insensitive match).
pub const AUTOBLOCK_URL_MARKER: &str = "trustarc.com/autoblockasset";

/// CDP Fetch url pattern covering the autoblock asset.
pub const AUTOBLOCK_URL_PATTERN: &str = "*trustarc.com/autoblockasset*";

/// Stub served in place of the autoblock script.
pub const AUTOBLOCK_STUB_BODY: &str = "/* autoblock disabled */";

/// A cookie to seed on the context before navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

const CONSENT_COOKIE_VALUES: &[(&str, &str)] = &[
    ("cmapi_cookie_privacy", "permit 1,2,3"),
    ("notice_behavior", "expressed,eu"),
    ("notice_gdpr_prefs", "0,1,2:"),
    ("cm_default_preferences", "permit 1,2,3"),
];

/// Last two labels of the hostname, i.e. the registrable domain for the sites
/// this tool targets. IP-address hosts fall back to the host itself.
pub fn registrable_domain(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host.to_string();
    }
    labels[labels.len() - 2..].join(".")
}

/// TrustArc consent cookies for both the parent wildcard domain and the bare
/// registrable domain. CMP builds differ in which one they read back.
pub fn consent_cookies(url: &Url) -> Vec<SeedCookie> {
    let root = registrable_domain(url);
    let wildcard = format!(".{root}");
    let now_iso = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);

    let mut cookies: Vec<SeedCookie> = CONSENT_COOKIE_VALUES
        .iter()
        .map(|(name, value)| SeedCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: wildcard.clone(),
        })
        .collect();
    cookies.push(SeedCookie {
        name: "notice_poptime".to_string(),
        value: now_iso,
        domain: wildcard,
    });
    // Bare-domain copies of the two cookies the gate actually checks first.
    for (name, value) in &CONSENT_COOKIE_VALUES[..2] {
        cookies.push(SeedCookie {
            name: name.to_string(),
            value: value.to_string(),
            domain: root.clone(),
        });
    }
    cookies
}

/// Init script: storage mirrors of the consent cookies, session debug flags,
/// the `truste.cma` mock, and a `dataLayer` so tag rules that poll it never
/// see `undefined`. Must run before any page script.
pub fn storage_seed_script() -> String {
    r#"
(() => {
  const kv = [
    ["truste.eu.cookie.cmapi_cookie_privacy",   "permit 1,2,3"],
    ["truste.eu.cookie.notice_behavior",        "expressed,eu"],
    ["truste.eu.cookie.notice_gdpr_prefs",      "0,1,2:"],
    ["truste.eu.cookie.cm_default_preferences", "permit 1,2,3"],
  ];
  for (const [k, v] of kv) { try { localStorage.setItem(k, v); } catch (e) {} }

  try { sessionStorage.setItem("at_check",    "true"); } catch (e) {}
  try { sessionStorage.setItem("mboxDebug",   "true"); } catch (e) {}
  try { sessionStorage.setItem("alloy_debug", "true"); } catch (e) {}

  const mockCma = {
    callApi: (name, _domain, cb) => {
      if (name === "getGDPRConsentDecision" || name === "getConsent") {
        if (typeof cb === "function") cb({ consentDecision: 1 });
      }
    },
  };
  window.truste = Object.assign({}, window.truste, { cma: mockCma });

  window.dataLayer = window.dataLayer || [];
})();
"#
    .to_string()
}

/// Which of the two broadcast passes to emit. The second pass exists because
/// tag-management listeners frequently register only after the SDK loads and
/// miss the first volley; it also re-asserts the CMA mock, which the real
/// vendor script may have overwritten in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastPass {
    AfterLoad,
    AfterSdkConfirmed,
}

/// Consent-granted broadcast over three independent channels: analytics
/// event queue pushes, DOM `CustomEvent`s, and same-origin `postMessage`.
pub fn broadcast_script(pass: BroadcastPass) -> String {
    let (queue_events, dom_events, include_post_message) = match pass {
        BroadcastPass::AfterLoad => (
            r#"["trustarc_consent_given","consent_given","truste_consent","consentGranted","CookieConsentGranted","OneTrustGroupsUpdated"]"#,
            r#"["consent_updated","truste.eu.cookie","TrustArcConsentGiven","trustarc:consent:accepted","cmapi_consent_loaded"]"#,
            true,
        ),
        BroadcastPass::AfterSdkConfirmed => (
            r#"["trustarc_consent_given","consent_given","truste_consent","consentGranted"]"#,
            r#"["consent_updated","truste.eu.cookie","TrustArcConsentGiven","cmapi_consent_loaded"]"#,
            false,
        ),
    };

    let post_message = if include_post_message {
        r#"
  try {
    window.postMessage({ type: "consent_update",   cmapi_cookie_privacy: "permit 1,2,3" }, "*");
    window.postMessage({ name: "trustarc_consent", status: "accept" }, "*");
  } catch (e) {}
"#
    } else {
        r#"
  try { window.postMessage({ type: "consent_update", cmapi_cookie_privacy: "permit 1,2,3" }, "*"); } catch (e) {}
"#
    };

    format!(
        r#"
(() => {{
  // Re-assert the CMA mock; the vendor script may have replaced it.
  if (window.truste) {{
    window.truste.cma = {{
      callApi: (name, _domain, cb) => {{
        if (name === "getGDPRConsentDecision" || name === "getConsent") {{
          if (typeof cb === "function") cb({{ consentDecision: 1 }});
        }}
      }},
    }};
  }}

  const dl = window.dataLayer || [];
  window.dataLayer = dl;
  for (const evtName of {queue_events}) {{
    dl.push({{ event: evtName, consent_given: true }});
  }}

  for (const evtName of {dom_events}) {{
    try {{
      document.dispatchEvent(new CustomEvent(evtName, {{
        bubbles: true,
        detail: {{ category: "C0001,C0002,C0003,C0004", consent: true }},
      }}));
    }} catch (e) {{}}
  }}
{post_message}
}})();
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrable_domain_strips_subdomains() {
        let url = Url::parse("https://www.shop.samsung.com/uk/").unwrap();
        assert_eq!(registrable_domain(&url), "samsung.com");
        let short = Url::parse("https://example.com/").unwrap();
        assert_eq!(registrable_domain(&short), "example.com");
    }

    #[test]
    fn cookies_cover_both_domain_forms() {
        let url = Url::parse("https://www.samsung.com/uk/").unwrap();
        let cookies = consent_cookies(&url);
        assert!(cookies
            .iter()
            .any(|c| c.name == "cmapi_cookie_privacy" && c.domain == ".samsung.com"));
        assert!(cookies
            .iter()
            .any(|c| c.name == "cmapi_cookie_privacy" && c.domain == "samsung.com"));
        assert!(cookies
            .iter()
            .any(|c| c.name == "notice_poptime" && c.domain == ".samsung.com"));
        assert_eq!(cookies.len(), 7);
    }

    #[test]
    fn second_pass_is_a_subset_without_post_message_pair() {
        let first = broadcast_script(BroadcastPass::AfterLoad);
        let second = broadcast_script(BroadcastPass::AfterSdkConfirmed);
        assert!(first.contains("OneTrustGroupsUpdated"));
        assert!(!second.contains("OneTrustGroupsUpdated"));
        assert!(first.contains("trustarc_consent"));
        assert!(!second.contains(r#"name: "trustarc_consent""#));
        // Both passes re-assert the CMA mock.
        assert!(first.contains("getGDPRConsentDecision"));
        assert!(second.contains("getGDPRConsentDecision"));
    }

    #[test]
    fn seed_script_mirrors_every_consent_cookie() {
        let script = storage_seed_script();
        for (name, _) in CONSENT_COOKIE_VALUES {
            assert!(script.contains(name), "missing storage mirror for {name}");
        }
        assert!(script.contains("alloy_debug"));
    }
}
