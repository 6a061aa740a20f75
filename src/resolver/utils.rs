//! Shared helpers for the cloud-link resolver.

use regex::Regex;
use url::Url;

/// Compiles a regex that is known to be valid at build time.
///
/// # Panics
///
/// Panics if `pattern` is invalid. Only call with string literals covered by tests.
#[allow(clippy::panic)]
pub(crate) fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// Resolves a scraped link against the page it was found on.
///
/// Absolute http(s) links are returned unchanged, protocol-relative ones get
/// `https:`, anything else is joined onto `base_url`.
pub(crate) fn absolutize_url(value: &str, base_url: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("http://") || value.starts_with("https://") {
        return Some(value.to_string());
    }
    if value.starts_with("//") {
        return Some(format!("https:{value}"));
    }
    base_url.join(value).ok().map(|u| u.to_string())
}

/// True when `host` equals `domain` or is a subdomain of it.
pub(crate) fn host_matches_domain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain || host.ends_with(&format!(".{domain}"))
}

/// `scheme://host[:port]` of a URL, without a trailing slash.
pub(crate) fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}
