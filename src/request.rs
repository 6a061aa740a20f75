//! Download requests and source URL normalization.

use std::path::{Path, PathBuf};

use url::Url;

use crate::auth::CredentialSet;
use crate::download::RequestError;
use crate::profile::DownloadMode;

/// Default number of ladder attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Schemes rejected outright, before parsing.
const BLOCKED_SCHEMES: &[&str] = &["javascript", "data", "file", "ftp", "vbscript"];

/// A single download request. Immutable once built.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    source_url: String,
    output_dir: PathBuf,
    credentials: Option<CredentialSet>,
    mode: DownloadMode,
    max_attempts: u32,
}

impl DownloadRequest {
    /// Creates a balanced-mode request with the default attempt budget.
    pub fn new(source_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            output_dir: output_dir.into(),
            credentials: None,
            mode: DownloadMode::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: DownloadMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the ladder attempt budget. Values below 1 are raised to 1.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Attaches credentials. Empty sets are treated as absent.
    #[must_use]
    pub fn with_credentials(mut self, credentials: CredentialSet) -> Self {
        self.credentials = (!credentials.is_empty()).then_some(credentials);
        self
    }

    #[must_use]
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    #[must_use]
    pub fn credentials(&self) -> Option<&CredentialSet> {
        self.credentials.as_ref()
    }

    #[must_use]
    pub fn mode(&self) -> DownloadMode {
        self.mode
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Cleans up a user-supplied URL and rejects ones that can never be fetched.
///
/// - whitespace is trimmed and embedded CR/LF/TAB removed
/// - `//host/...` gets an `https:` scheme, a bare `host/...` gets `https://`
/// - mobile YouTube hosts are rewritten to the desktop host
/// - `javascript:`, `data:`, `file:` and `ftp:` URLs are rejected
///
/// # Errors
///
/// Returns [`RequestError`] if the URL is empty, uses a blocked or non-HTTP
/// scheme, or does not parse to a URL with a host.
pub fn normalize_source_url(raw: &str) -> Result<String, RequestError> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '\t'))
        .collect();
    if cleaned.is_empty() {
        return Err(RequestError::Empty);
    }

    let explicit_scheme = explicit_scheme(&cleaned);
    if let Some(scheme) = &explicit_scheme
        && BLOCKED_SCHEMES.contains(&scheme.as_str())
    {
        return Err(RequestError::unsupported_scheme(&cleaned, scheme.as_str()));
    }

    let with_scheme = if cleaned.starts_with("//") {
        format!("https:{cleaned}")
    } else if explicit_scheme.is_some() {
        cleaned
    } else {
        format!("https://{cleaned}")
    };

    let mut parsed =
        Url::parse(&with_scheme).map_err(|e| RequestError::invalid(&with_scheme, e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        let scheme = parsed.scheme().to_string();
        return Err(RequestError::unsupported_scheme(with_scheme, scheme));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(RequestError::invalid(with_scheme, "missing host"));
    }
    if parsed.host_str() == Some("m.youtube.com") {
        parsed
            .set_host(Some("www.youtube.com"))
            .map_err(|e| RequestError::invalid(&with_scheme, e.to_string()))?;
    }

    Ok(parsed.to_string())
}

/// Returns the lowercased scheme if `value` starts with one.
///
/// `host:8080/...` is a host with a port, not a scheme.
fn explicit_scheme(value: &str) -> Option<String> {
    let (candidate, rest) = value.split_once(':')?;
    let mut chars = candidate.chars();
    let valid = chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-');
    if !valid || rest.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    Some(candidate.to_ascii_lowercase())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::auth::Credential;

    #[test]
    fn test_normalize_adds_https_scheme() {
        assert_eq!(
            normalize_source_url("example.com/video").unwrap(),
            "https://example.com/video"
        );
        assert_eq!(
            normalize_source_url("//cdn.example.com/a.mp4").unwrap(),
            "https://cdn.example.com/a.mp4"
        );
    }

    #[test]
    fn test_normalize_strips_whitespace_and_control_chars() {
        assert_eq!(
            normalize_source_url("  https://example.com/a\r\nb\t  ").unwrap(),
            "https://example.com/ab"
        );
    }

    #[test]
    fn test_normalize_rewrites_mobile_youtube() {
        assert_eq!(
            normalize_source_url("https://m.youtube.com/watch?v=abc").unwrap(),
            "https://www.youtube.com/watch?v=abc"
        );
    }

    #[test]
    fn test_normalize_rejects_blocked_schemes() {
        for url in [
            "javascript:alert(1)",
            "data:text/html,hi",
            "file:///etc/passwd",
            "ftp://host/file.zip",
        ] {
            assert!(
                matches!(
                    normalize_source_url(url),
                    Err(RequestError::UnsupportedScheme { .. })
                ),
                "{url}"
            );
        }
    }

    #[test]
    fn test_normalize_rejects_empty_and_garbage() {
        assert_eq!(normalize_source_url("   "), Err(RequestError::Empty));
        assert!(matches!(
            normalize_source_url("https://"),
            Err(RequestError::Invalid { .. })
        ));
    }

    #[test]
    fn test_normalize_rejects_other_schemes() {
        assert!(matches!(
            normalize_source_url("mailto:someone@example.com"),
            Err(RequestError::UnsupportedScheme { .. } | RequestError::Invalid { .. })
        ));
    }

    #[test]
    fn test_request_builder_clamps_attempts_and_drops_empty_credentials() {
        let request = DownloadRequest::new("https://example.com/v", "/tmp/out")
            .with_max_attempts(0)
            .with_credentials(CredentialSet::default());
        assert_eq!(request.max_attempts(), 1);
        assert!(request.credentials().is_none());

        let request = request.with_credentials(CredentialSet::from_pairs([Credential::new(
            "FedAuth", "token",
        )]));
        assert!(request.credentials().is_some());
    }
}
