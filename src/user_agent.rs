//! User-Agent and default headers for resolver HTTP traffic.
//!
//! Cloud storage front-ends serve sign-in pages to clients that do not look
//! like a browser, so probes always present browser headers.

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue, UPGRADE_INSECURE_REQUESTS};

/// Browser User-Agent sent with every probe.
pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const BROWSER_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,application/octet-stream,*/*;q=0.8";

/// Default headers installed on the probe client.
#[must_use]
pub(crate) fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_browser_user_agent_looks_like_chrome() {
        assert!(BROWSER_USER_AGENT.starts_with("Mozilla/5.0"));
        assert!(BROWSER_USER_AGENT.contains("Chrome/"));
        assert!(!BROWSER_USER_AGENT.contains("  "));
    }

    #[test]
    fn test_browser_headers_accept_html_and_binary() {
        let headers = browser_headers();
        let accept = headers.get(ACCEPT).and_then(|v| v.to_str().ok()).unwrap_or("");
        assert!(accept.contains("text/html"));
        assert!(accept.contains("application/octet-stream"));
        assert!(headers.contains_key(ACCEPT_LANGUAGE));
    }
}
