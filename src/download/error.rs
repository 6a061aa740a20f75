//! Error taxonomy for download attempts.
//!
//! The external fetch engine reports failures only as human-readable text.
//! [`classify_engine_message`] converts that text into an [`ErrorKind`] right at
//! the engine boundary; nothing past that point inspects message strings.

use std::fmt;

use thiserror::Error;

/// Structured classification of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Partial-content or segment failure.
    Fragment,
    /// Timeout, reset, DNS or TLS failure.
    Network,
    /// Missing or unwritable output path.
    Filesystem,
    /// Access denied by the local system.
    Permission,
    /// Malformed request or URL, detected before any network call.
    Validation,
    /// Anything the keyword tables do not recognise.
    Unknown,
}

impl ErrorKind {
    /// Fragment and network failures are retried with an escalated profile.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Fragment | Self::Network)
    }

    /// Failures that no retry or alternative format can fix.
    #[must_use]
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::Filesystem | Self::Permission | Self::Validation)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Fragment => "fragment",
            Self::Network => "network",
            Self::Filesystem => "filesystem",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Local access problems. Checked first so a denied write on a fragment file
/// is not mistaken for a fragment failure.
pub const PERMISSION_KEYWORDS: &[&str] = &[
    "permission denied",
    "access is denied",
    "operation not permitted",
    "errno 13",
    "winerror 5",
];

/// Unambiguous references to fragment or segment files.
pub const FRAGMENT_KEYWORDS: &[&str] = &["fragment", "part-frag", "segment"];

pub const FILESYSTEM_KEYWORDS: &[&str] = &[
    "no such file or directory",
    "errno 2",
    "no space left",
    "errno 28",
    "read-only file system",
    "unable to open for writing",
    "file name too long",
    "is a directory",
    "disk full",
];

pub const VALIDATION_KEYWORDS: &[&str] = &[
    "unsupported url",
    "invalid url",
    "is not a valid url",
    "no video formats found",
    "unable to extract",
];

pub const NETWORK_KEYWORDS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection refused",
    "connection aborted",
    "network is unreachable",
    "temporary failure in name resolution",
    "getaddrinfo failed",
    "name or service not known",
    "ssl",
    "certificate verify failed",
    "remote end closed",
    "incompleteread",
    "http error 5",
    "http error 429",
    "too many requests",
    "network error",
    "connection error",
];

/// Generic transfer failures, treated as fragment problems once nothing more
/// specific matched.
pub const WEAK_FRAGMENT_KEYWORDS: &[&str] = &[
    "chunk",
    "unable to continue",
    "download failed",
    "failed to download",
    "retry",
];

/// Classifies an engine error message.
///
/// Matching is case-insensitive and checks the keyword tables in order:
///
/// | Order | Table | Kind |
/// |-------|-------|------|
/// | 1 | [`PERMISSION_KEYWORDS`] | [`ErrorKind::Permission`] |
/// | 2 | [`FRAGMENT_KEYWORDS`] | [`ErrorKind::Fragment`] |
/// | 3 | [`FILESYSTEM_KEYWORDS`] | [`ErrorKind::Filesystem`] |
/// | 4 | [`VALIDATION_KEYWORDS`] | [`ErrorKind::Validation`] |
/// | 5 | [`NETWORK_KEYWORDS`] | [`ErrorKind::Network`] |
/// | 6 | [`WEAK_FRAGMENT_KEYWORDS`] | [`ErrorKind::Fragment`] |
/// | - | nothing matched | [`ErrorKind::Unknown`] |
#[must_use]
pub fn classify_engine_message(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    if matches(PERMISSION_KEYWORDS) {
        ErrorKind::Permission
    } else if matches(FRAGMENT_KEYWORDS) {
        ErrorKind::Fragment
    } else if matches(FILESYSTEM_KEYWORDS) {
        ErrorKind::Filesystem
    } else if matches(VALIDATION_KEYWORDS) {
        ErrorKind::Validation
    } else if matches(NETWORK_KEYWORDS) {
        ErrorKind::Network
    } else if matches(WEAK_FRAGMENT_KEYWORDS) {
        ErrorKind::Fragment
    } else {
        ErrorKind::Unknown
    }
}

/// A request rejected before any network activity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// No URL was given.
    #[error("source URL is empty")]
    Empty,

    /// The URL uses a scheme that can never be downloaded.
    #[error("unsupported URL scheme '{scheme}' in {url}")]
    UnsupportedScheme {
        /// The offending URL.
        url: String,
        /// The rejected scheme.
        scheme: String,
    },

    /// The URL could not be parsed or has no host.
    #[error("invalid URL {url}: {reason}")]
    Invalid {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl RequestError {
    /// Creates an unsupported-scheme error.
    pub fn unsupported_scheme(url: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            url: url.into(),
            scheme: scheme.into(),
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Request errors are always validation failures.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}
