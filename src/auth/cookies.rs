//! Cookie credentials and the cookie-file supplier.
//!
//! Supported file formats:
//! - Netscape HTTP Cookie File (`cookies.txt`): 7 TAB-separated fields per line
//! - JSON exports: an array of `{ "name", "value", "domain" }` objects, a
//!   `{ "cookies": [...] }` wrapper, or a flat `{ "name": "value" }` object

use std::collections::BTreeMap;
use std::fmt;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::cookie::Jar;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Errors that can occur while loading credentials.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The cookie file could not be read.
    #[error("failed to read cookie file {path}: {source}")]
    Io {
        /// The cookie file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A Netscape-format line is malformed.
    #[error("invalid cookie line {line_number}: {reason}")]
    InvalidLine {
        /// 1-based line number.
        line_number: usize,
        /// Why the line was rejected.
        reason: String,
    },

    /// A JSON cookie export could not be parsed.
    #[error("invalid cookie JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The file parsed but contained no usable cookies.
    #[error("no cookies found in {path}")]
    NoCookiesFound {
        /// The cookie file path.
        path: PathBuf,
    },
}

/// A single cookie.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub name: String,
    value: String,
    /// Cookie domain; `None` means "whatever host is being requested".
    pub domain: Option<String>,
}

impl Credential {
    /// Creates an unscoped cookie.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
        }
    }

    /// Creates a cookie scoped to `domain`.
    pub fn scoped(
        name: impl Into<String>,
        value: impl Into<String>,
        domain: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: Some(domain.into()),
        }
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    fn applies_to(&self, host: &str) -> bool {
        match &self.domain {
            None => true,
            Some(domain) => {
                let domain = domain.trim_start_matches('.').to_ascii_lowercase();
                let host = host.to_ascii_lowercase();
                host == domain || host.ends_with(&format!(".{domain}"))
            }
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .finish()
    }
}

/// On-disk format of a cookie file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieFormat {
    /// Netscape `cookies.txt`, readable by `yt-dlp --cookies`.
    Netscape,
    /// Browser-extension JSON export.
    Json,
}

/// An ordered collection of cookies, optionally remembering the file it came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    credentials: Vec<Credential>,
    source: Option<(PathBuf, CookieFormat)>,
}

impl CredentialSet {
    /// Builds a set from in-memory cookies.
    pub fn from_pairs(credentials: impl IntoIterator<Item = Credential>) -> Self {
        Self {
            credentials: credentials.into_iter().collect(),
            source: None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    /// File the set was loaded from, if any.
    #[must_use]
    pub fn source_path(&self) -> Option<&Path> {
        self.source.as_ref().map(|(path, _)| path.as_path())
    }

    /// Format of the file the set was loaded from, if any.
    #[must_use]
    pub fn source_format(&self) -> Option<CookieFormat> {
        self.source.as_ref().map(|(_, format)| *format)
    }

    /// Source file, but only when it is a Netscape `cookies.txt`.
    #[must_use]
    pub fn netscape_file(&self) -> Option<&Path> {
        match &self.source {
            Some((path, CookieFormat::Netscape)) => Some(path.as_path()),
            _ => None,
        }
    }

    /// Cookies as a name→value map. Later duplicates win.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.credentials
            .iter()
            .map(|c| (c.name.clone(), c.value.clone()))
            .collect()
    }

    /// Renders a `Cookie` header value for requests to `host`.
    #[must_use]
    pub fn cookie_header_for(&self, host: &str) -> Option<String> {
        let pairs: Vec<String> = self
            .credentials
            .iter()
            .filter(|c| c.applies_to(host))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        (!pairs.is_empty()).then(|| pairs.join("; "))
    }
}

/// Loads credentials from a file path.
pub trait CredentialSupplier: Send + Sync {
    /// Loads the credential set stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError`] if the file cannot be read or parsed.
    fn load(&self, path: &Path) -> Result<CredentialSet, CredentialError>;
}

/// Reads Netscape `cookies.txt` or JSON cookie exports.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieFileSupplier;

impl CredentialSupplier for CookieFileSupplier {
    #[instrument(level = "debug", skip(self))]
    fn load(&self, path: &Path) -> Result<CredentialSet, CredentialError> {
        let content = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let trimmed = content.trim_start();

        let (credentials, format) = if trimmed.starts_with('[') || trimmed.starts_with('{') {
            (parse_json_cookies(trimmed)?, CookieFormat::Json)
        } else {
            (parse_netscape_cookies(content.as_bytes())?, CookieFormat::Netscape)
        };

        if credentials.is_empty() {
            return Err(CredentialError::NoCookiesFound {
                path: path.to_path_buf(),
            });
        }
        debug!(count = credentials.len(), ?format, "loaded cookies");

        Ok(CredentialSet {
            credentials,
            source: Some((path.to_path_buf(), format)),
        })
    }
}

/// Parses Netscape-format cookies.
///
/// Lines starting with `#` are comments, except for the `#HttpOnly_` domain
/// prefix browsers emit for HTTP-only cookies. Lines with fewer than 7 fields
/// are skipped with a warning; lines with an empty name are errors.
///
/// # Errors
///
/// Returns [`CredentialError::InvalidLine`] for a line with an empty cookie name.
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<Vec<Credential>, CredentialError> {
    let mut credentials = Vec::new();

    for (index, line) in reader.lines().enumerate() {
        let line_number = index + 1;
        let Ok(line) = line else {
            warn!(line_number, "skipping unreadable cookie line");
            continue;
        };
        let line = line.trim_end_matches(['\r', '\n']);

        let line = match line.strip_prefix("#HttpOnly_") {
            Some(rest) => rest,
            None if line.trim().is_empty() || line.starts_with('#') => continue,
            None => line,
        };

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            warn!(line_number, fields = fields.len(), "skipping cookie line with too few fields");
            continue;
        }

        let name = fields[5].trim();
        if name.is_empty() {
            return Err(CredentialError::InvalidLine {
                line_number,
                reason: "cookie name field is empty".to_string(),
            });
        }
        let domain = fields[0].trim();
        credentials.push(Credential {
            name: name.to_string(),
            value: fields[6].to_string(),
            domain: (!domain.is_empty()).then(|| domain.to_string()),
        });
    }

    Ok(credentials)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonCookiePayload {
    Array(Vec<JsonCookieEntry>),
    Wrapped { cookies: Vec<JsonCookieEntry> },
    Flat(BTreeMap<String, serde_json::Value>),
}

#[derive(Debug, Deserialize)]
struct JsonCookieEntry {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    host: Option<String>,
}

/// Parses JSON cookie exports.
///
/// # Errors
///
/// Returns [`CredentialError::Json`] if the input is not one of the supported shapes.
pub fn parse_json_cookies(input: &str) -> Result<Vec<Credential>, CredentialError> {
    let payload: JsonCookiePayload = serde_json::from_str(input)?;
    let credentials = match payload {
        JsonCookiePayload::Array(entries) | JsonCookiePayload::Wrapped { cookies: entries } => {
            entries
                .into_iter()
                .filter(|entry| !entry.name.trim().is_empty())
                .map(|entry| Credential {
                    name: entry.name,
                    value: entry.value,
                    domain: entry
                        .domain
                        .or(entry.host)
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty()),
                })
                .collect()
        }
        JsonCookiePayload::Flat(map) => map
            .into_iter()
            .filter_map(|(name, value)| match value {
                serde_json::Value::String(value) => Some(Credential::new(name, value)),
                serde_json::Value::Number(n) => Some(Credential::new(name, n.to_string())),
                _ => None,
            })
            .collect(),
    };
    Ok(credentials)
}

/// Builds a cookie jar for `request_url`.
///
/// Domain-scoped cookies are registered for their own domain; unscoped ones
/// for the host of `request_url`.
#[instrument(level = "debug", skip(credentials))]
pub fn build_cookie_jar(credentials: &CredentialSet, request_url: &Url) -> Arc<Jar> {
    let jar = Arc::new(Jar::default());

    for credential in credentials.iter() {
        let (origin, set_cookie) = match &credential.domain {
            Some(domain) => {
                let host = domain.trim_start_matches('.');
                let origin = format!("https://{host}/");
                let set_cookie = format!(
                    "{}={}; Domain={host}; Path=/",
                    credential.name, credential.value
                );
                (Url::parse(&origin).ok(), set_cookie)
            }
            None => (
                Some(request_url.clone()),
                format!("{}={}; Path=/", credential.name, credential.value),
            ),
        };

        match origin {
            Some(origin) => jar.add_cookie_str(&set_cookie, &origin),
            None => warn!(name = %credential.name, "skipping cookie with unparseable domain"),
        }
    }

    jar
}
