//! HTTP probing for cloud sharing candidates.
//!
//! [`ProbeClient`] issues browser-like GET requests with the caller's cookie
//! jar, validates each response and streams accepted bodies to disk through a
//! `.part` file that is renamed once the transfer completes.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use reqwest::Client;
use reqwest::cookie::Jar;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::candidates::CandidateUrl;
use super::validation::{
    HtmlVerdict, is_acceptable_status, is_html_content_type, judge_html, looks_like_html,
};
use crate::download::ErrorKind;
use crate::status::{Severity, StatusSink};
use crate::user_agent::{BROWSER_USER_AGENT, browser_headers};

/// Fixed connect timeout for probes.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Only this much of an HTML body is inspected; the rest is never judged.
const MAX_HTML_BYTES: usize = 2 * 1024 * 1024;

/// Bytes between two progress reports when the total size is unknown.
const PROGRESS_STEP_BYTES: u64 = 1024 * 1024;

/// Errors from a single probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Connection, TLS or body-read failure.
    #[error("network error fetching {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout fetching {url}")]
    Timeout { url: String },

    /// Any status other than 200.
    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    /// 200 response that is not the file (error page, sign-in page, ...).
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    /// Local write failure.
    #[error("IO error writing to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("empty body from {url}")]
    EmptyBody { url: String },
}

impl ProbeError {
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    pub fn invalid_response(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn empty_body(url: impl Into<String>) -> Self {
        Self::EmptyBody { url: url.into() }
    }

    /// Connection-level failures, as opposed to a server answering with the wrong thing.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// Maps the probe failure onto the shared taxonomy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => ErrorKind::Network,
            Self::HttpStatus { status, .. } if *status == 429 || *status >= 500 => {
                ErrorKind::Network
            }
            Self::HttpStatus { .. } | Self::InvalidResponse { .. } | Self::EmptyBody { .. } => {
                ErrorKind::Validation
            }
            Self::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorKind::Permission
            }
            Self::Io { .. } => ErrorKind::Filesystem,
        }
    }
}

/// Errors building the resolver's HTTP client.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("failed to build HTTP client: {source}")]
    Build {
        #[source]
        source: reqwest::Error,
    },
}

/// Browser-like HTTP client used for candidate probes and page fetches.
#[derive(Debug, Clone)]
pub struct ProbeClient {
    client: Client,
}

impl ProbeClient {
    /// Builds a client with browser headers, optional cookies and a read timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::Build`] if the TLS backend cannot be initialised.
    pub fn new(cookie_jar: Option<Arc<Jar>>, read_timeout: Duration) -> Result<Self, ResolveError> {
        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(read_timeout)
            .gzip(true)
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(browser_headers());
        if let Some(jar) = cookie_jar {
            builder = builder.cookie_provider(jar);
        }
        let client = builder
            .build()
            .map_err(|source| ResolveError::Build { source })?;
        Ok(Self { client })
    }

    /// Fetches an HTML page for link scraping. Returns the final URL and the body.
    ///
    /// # Errors
    ///
    /// Transport failures and non-200 statuses.
    #[instrument(skip(self))]
    pub async fn fetch_page(&self, url: &str) -> Result<(Url, String), ProbeError> {
        let response = self.send(url).await?;
        let status = response.status().as_u16();
        if !is_acceptable_status(status) {
            return Err(ProbeError::http_status(url, status));
        }
        let final_url = response.url().clone();
        let body = collect_text(Vec::new(), response.bytes_stream(), url).await?;
        debug!(bytes = body.len(), final_url = %final_url, "fetched sharing page");
        Ok((final_url, body))
    }

    /// Probes one candidate and, when the response is the file, writes it to `dest`.
    ///
    /// One client-side redirect found in an HTML body is followed; a second
    /// one rejects the candidate. Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns a [`ProbeError`] when the candidate is not usable. On error no
    /// file is left at `dest` and the `.part` file is removed.
    #[instrument(skip(self, candidate, sink), fields(strategy = candidate.strategy, url = %candidate.url))]
    pub async fn probe_to_file(
        &self,
        candidate: &CandidateUrl,
        dest: &Path,
        sink: &dyn StatusSink,
    ) -> Result<u64, ProbeError> {
        let mut url = candidate.url.clone();
        let mut allow_redirect = true;

        loop {
            let response = self.send(&url).await?;
            let status = response.status().as_u16();
            if !is_acceptable_status(status) {
                return Err(ProbeError::http_status(&url, status));
            }

            let final_url = response.url().clone();
            let html_header = is_html_content_type(
                response
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok()),
            );
            let total = response.content_length();
            let mut stream = response.bytes_stream();

            let first = match stream.next().await {
                Some(chunk) => chunk.map_err(|e| map_reqwest_error(&url, e))?.to_vec(),
                None => return Err(ProbeError::empty_body(&url)),
            };

            if html_header || looks_like_html(&first) {
                let prefix = collect_prefix(first, &mut stream, &url).await?;
                let inspected =
                    String::from_utf8_lossy(&prefix[..prefix.len().min(MAX_HTML_BYTES)]);
                match judge_html(&inspected, &final_url, candidate.validation, allow_redirect) {
                    HtmlVerdict::Accept => {
                        // Raw bytes, then whatever of the body is still unread.
                        return write_to_file(prefix, stream, total, dest, &url, sink).await;
                    }
                    HtmlVerdict::Redirect(target) => {
                        debug!(from = %url, to = %target, "following client-side redirect");
                        allow_redirect = false;
                        url = target;
                    }
                    HtmlVerdict::Reject(reason) => {
                        return Err(ProbeError::invalid_response(&url, reason));
                    }
                }
            } else {
                return write_to_file(first, stream, total, dest, &url, sink).await;
            }
        }
    }

    async fn send(&self, url: &str) -> Result<reqwest::Response, ProbeError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))
    }
}

/// Path of the in-progress file for `dest`.
#[must_use]
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> ProbeError {
    if error.is_timeout() {
        ProbeError::timeout(url)
    } else {
        ProbeError::network(url, error)
    }
}

/// Reads chunks until at least [`MAX_HTML_BYTES`] are buffered or the body ends.
///
/// The buffer may overshoot by part of one chunk; nothing is dropped, so the
/// caller can still write the complete body.
async fn collect_prefix<S, B>(
    mut buffer: Vec<u8>,
    stream: &mut S,
    url: &str,
) -> Result<Vec<u8>, ProbeError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    while buffer.len() < MAX_HTML_BYTES {
        match stream.next().await {
            Some(chunk) => {
                buffer.extend_from_slice(chunk.map_err(|e| map_reqwest_error(url, e))?.as_ref());
            }
            None => break,
        }
    }
    Ok(buffer)
}

async fn collect_text<S, B>(buffer: Vec<u8>, mut stream: S, url: &str) -> Result<String, ProbeError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let mut buffer = collect_prefix(buffer, &mut stream, url).await?;
    buffer.truncate(MAX_HTML_BYTES);
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Streams `first` followed by `rest` into `dest` via its `.part` file.
async fn write_to_file<S, B>(
    first: Vec<u8>,
    rest: S,
    total: Option<u64>,
    dest: &Path,
    url: &str,
    sink: &dyn StatusSink,
) -> Result<u64, ProbeError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let part = part_path(dest);
    let result = stream_to_part(first, rest, total, &part, dest, url, sink).await;

    match result {
        Ok(0) => {
            remove_quietly(&part).await;
            Err(ProbeError::empty_body(url))
        }
        Ok(bytes) => {
            tokio::fs::rename(&part, dest)
                .await
                .map_err(|e| ProbeError::io(dest, e))?;
            info!(bytes, path = %dest.display(), "saved resolved file");
            Ok(bytes)
        }
        Err(error) => {
            remove_quietly(&part).await;
            Err(error)
        }
    }
}

async fn stream_to_part<S, B>(
    first: Vec<u8>,
    mut rest: S,
    total: Option<u64>,
    part: &Path,
    dest: &Path,
    url: &str,
    sink: &dyn StatusSink,
) -> Result<u64, ProbeError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    let file = File::create(part)
        .await
        .map_err(|e| ProbeError::io(part, e))?;
    let mut writer = BufWriter::new(file);
    let mut progress = ProgressReporter::new(dest, total);
    let mut bytes_written: u64 = 0;

    writer
        .write_all(&first)
        .await
        .map_err(|e| ProbeError::io(part, e))?;
    bytes_written += first.len() as u64;
    progress.update(bytes_written, sink);

    while let Some(chunk_result) = rest.next().await {
        let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;
        let chunk = chunk.as_ref();
        writer
            .write_all(chunk)
            .await
            .map_err(|e| ProbeError::io(part, e))?;
        bytes_written += chunk.len() as u64;
        progress.update(bytes_written, sink);
    }

    writer
        .flush()
        .await
        .map_err(|e| ProbeError::io(part, e))?;
    progress.finish(bytes_written, sink);

    Ok(bytes_written)
}

async fn remove_quietly(path: &Path) {
    if let Err(error) = tokio::fs::remove_file(path).await
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), %error, "could not remove partial file");
    }
}

/// Throttles byte-progress reports to whole-percent or 1 MiB steps.
struct ProgressReporter {
    name: String,
    total: Option<u64>,
    last_reported: u64,
}

impl ProgressReporter {
    fn new(dest: &Path, total: Option<u64>) -> Self {
        Self {
            name: dest
                .file_name()
                .map_or_else(String::new, |n| n.to_string_lossy().into_owned()),
            total: total.filter(|t| *t > 0),
            last_reported: 0,
        }
    }

    fn update(&mut self, written: u64, sink: &dyn StatusSink) {
        match self.total {
            Some(total) => {
                let percent = written.saturating_mul(100) / total;
                if percent > self.last_reported {
                    self.last_reported = percent;
                    sink.report(
                        &format!("{}: {percent}% ({written}/{total} bytes)", self.name),
                        Severity::Progress,
                    );
                }
            }
            None => {
                if written >= self.last_reported + PROGRESS_STEP_BYTES {
                    self.last_reported = written;
                    sink.report(
                        &format!("{}: {written} bytes", self.name),
                        Severity::Progress,
                    );
                }
            }
        }
    }

    fn finish(&self, written: u64, sink: &dyn StatusSink) {
        if written > 0 {
            sink.report(
                &format!("{}: finished, {written} bytes", self.name),
                Severity::Progress,
            );
        }
    }
}
