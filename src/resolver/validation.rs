//! Deciding whether a probe response is the file we asked for.
//!
//! A response is valid when it has status 200 and either a non-HTML body or
//! an HTML body the candidate explicitly allows. HTML bodies are scanned for
//! error markers first and for a client-side redirect second.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use super::utils::{absolutize_url, compile_static_regex};

/// How a candidate's HTML responses are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// The target is a binary file; an HTML page is never the file itself.
    BinaryBody,
    /// The target may itself be an HTML document.
    HtmlAllowed,
}

/// Result of judging an HTML body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HtmlVerdict {
    /// The page is the file.
    Accept,
    /// The page forwards to another URL via script or meta refresh.
    Redirect(String),
    /// The page is not the file.
    Reject(String),
}

/// Phrases that only appear on error, sign-in or not-found pages.
pub const ERROR_MARKERS: &[&str] = &[
    "access denied",
    "sign in",
    "file not found",
    "404",
    "something went wrong",
    "login.microsoftonline.com",
];

static WINDOW_LOCATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"window\.location(?:\.href)?\s*=\s*["']([^"']+)["']"#)
});

static META_REFRESH_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(
        r#"(?i)<meta[^>]+http-equiv\s*=\s*["']?refresh["']?[^>]*content\s*=\s*["'][^"']*?url\s*=\s*([^"'>\s]+)"#,
    )
});

/// Only status 200 counts as a hit; other 2xx codes are not file bodies here.
#[must_use]
pub fn is_acceptable_status(status: u16) -> bool {
    status == 200
}

/// True for `text/html` and `application/xhtml+xml` content types.
#[must_use]
pub fn is_html_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let ct = ct.to_ascii_lowercase();
        ct.contains("text/html") || ct.contains("application/xhtml")
    })
}

/// Sniffs the first bytes of a body for an HTML document.
#[must_use]
pub fn looks_like_html(prefix: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&prefix[..prefix.len().min(512)]).to_ascii_lowercase();
    let head = head.trim_start_matches('\u{feff}').trim_start();
    head.starts_with("<!doctype html") || head.starts_with("<html") || head.starts_with("<head")
}

/// Returns the first error marker present in `body`, if any.
#[must_use]
pub fn find_error_marker(body: &str) -> Option<&'static str> {
    let lower = body.to_lowercase();
    if let Some(marker) = ERROR_MARKERS.iter().find(|m| lower.contains(*m)) {
        return Some(marker);
    }
    if lower.contains("sharepoint") && lower.contains("error") {
        return Some("sharepoint error");
    }
    None
}

/// Extracts a `window.location` assignment or meta refresh target.
#[must_use]
pub fn extract_client_redirect(body: &str, base_url: &Url) -> Option<String> {
    let raw = WINDOW_LOCATION_RE
        .captures(body)
        .or_else(|| META_REFRESH_RE.captures(body))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().replace("&amp;", "&"))?;
    absolutize_url(&raw, base_url)
}

/// Judges an HTML response body for a candidate.
///
/// Error markers always reject. A redirect is reported only when
/// `allow_redirect` is set; the probe loop clears it after following one.
#[must_use]
pub fn judge_html(
    body: &str,
    base_url: &Url,
    mode: ValidationMode,
    allow_redirect: bool,
) -> HtmlVerdict {
    if let Some(marker) = find_error_marker(body) {
        return HtmlVerdict::Reject(format!("page contains '{marker}'"));
    }
    if let Some(target) = extract_client_redirect(body, base_url) {
        return if allow_redirect {
            HtmlVerdict::Redirect(target)
        } else {
            HtmlVerdict::Reject("second client-side redirect".to_string())
        };
    }
    match mode {
        ValidationMode::HtmlAllowed => HtmlVerdict::Accept,
        ValidationMode::BinaryBody => HtmlVerdict::Reject("HTML page instead of file".to_string()),
    }
}
