//! Cloud sharing link resolution.
//!
//! Opaque OneDrive/SharePoint sharing links rarely serve the file directly.
//! [`CloudLinkResolver`] turns such a link into a file on disk by walking an
//! ordered chain:
//!
//! 1. [`generate_candidates`] - deterministic direct-download URL guesses
//! 2. [`ProbeClient::probe_to_file`] - validate each guess and stream the body
//! 3. [`extract_download_links`] - scrape the sharing page for embedded links
//! 4. the generic [`FetchEngine`] with [`ConfigProfile::resolver_fallback`]
//!
//! The output name comes from [`extract_filename`] and is fixed before the
//! first network call.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use mediadl_core::engine::YtDlpEngine;
//! use mediadl_core::resolver::CloudLinkResolver;
//! use mediadl_core::status::TracingSink;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = YtDlpEngine::new();
//! let cancel = CancellationToken::new();
//! let resolver = CloudLinkResolver::new(&engine, &TracingSink, &cancel);
//! let outcome = resolver
//!     .resolve(
//!         "https://contoso-my.sharepoint.com/:u:/r/personal/u/Documents/notes.zip?e=x",
//!         Path::new("./downloads"),
//!         None,
//!     )
//!     .await?;
//! println!("success: {}", outcome.success);
//! # Ok(())
//! # }
//! ```

mod candidates;
mod client;
mod filename;
mod page_links;
mod utils;
mod validation;

pub use candidates::{CLOUD_DOMAINS, CandidateUrl, generate_candidates, is_cloud_sharing_link};
pub use client::{CONNECT_TIMEOUT, ProbeClient, ProbeError, ResolveError, part_path};
pub use filename::{DEFAULT_FILENAME, extract_filename, has_known_extension, sanitize_filename};
pub use page_links::extract_download_links;
pub use validation::{
    ERROR_MARKERS, HtmlVerdict, ValidationMode, extract_client_redirect, find_error_marker,
    is_acceptable_status, is_html_content_type, judge_html, looks_like_html,
};

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::auth::{CredentialSet, build_cookie_jar};
use crate::download::{AttemptOutcome, AttemptRecord, ErrorKind};
use crate::engine::{FetchEngine, FetchTarget, OutputName};
use crate::profile::ConfigProfile;
use crate::status::{Severity, StatusSink};

/// Strategy name recorded for links scraped from the sharing page.
pub const PAGE_LINK_STRATEGY: &str = "page-link";
/// Strategy name recorded when the fetch engine produced the file.
pub const ENGINE_FALLBACK_STRATEGY: &str = "engine-fallback";

/// What the resolver achieved for one sharing link.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolutionOutcome {
    pub success: bool,
    pub bytes_written: u64,
    /// Candidate strategy, [`PAGE_LINK_STRATEGY`] or [`ENGINE_FALLBACK_STRATEGY`].
    pub chosen: Option<String>,
    pub output_path: Option<PathBuf>,
    /// Set on failure, unless the run was cancelled.
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
    pub cancelled: bool,
    /// The engine invocation, when the chain got that far.
    pub engine_attempt: Option<AttemptRecord>,
}

impl ResolutionOutcome {
    fn downloaded(strategy: &str, bytes: u64, path: PathBuf) -> Self {
        Self {
            success: true,
            bytes_written: bytes,
            chosen: Some(strategy.to_string()),
            output_path: Some(path),
            ..Self::default()
        }
    }

    fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: Some(kind),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }
}

/// Result of running a list of candidates.
#[derive(Debug)]
pub enum ProbeRun {
    /// A candidate produced the file.
    Downloaded { strategy: String, bytes: u64 },
    /// Every candidate was rejected.
    Exhausted { transport_failure: bool },
    /// A local write failed; trying further URLs cannot help.
    Stopped(ProbeError),
    Cancelled,
}

/// Resolves opaque cloud sharing links to files on disk.
pub struct CloudLinkResolver<'a> {
    engine: &'a dyn FetchEngine,
    sink: &'a dyn StatusSink,
    cancel: &'a CancellationToken,
    probe_timeout: Duration,
}

impl<'a> CloudLinkResolver<'a> {
    /// Creates a resolver that probes with the balanced profile's socket timeout.
    #[must_use]
    pub fn new(
        engine: &'a dyn FetchEngine,
        sink: &'a dyn StatusSink,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            engine,
            sink,
            cancel,
            probe_timeout: ConfigProfile::balanced().socket_timeout,
        }
    }

    #[must_use]
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Runs the full resolution chain for `url`, writing into `output_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] only when the HTTP client cannot be built.
    /// Every download failure is reported through [`ResolutionOutcome`].
    #[instrument(skip(self, output_dir, credentials))]
    pub async fn resolve(
        &self,
        url: &str,
        output_dir: &Path,
        credentials: Option<&CredentialSet>,
    ) -> Result<ResolutionOutcome, ResolveError> {
        let filename = extract_filename(url);
        let dest = output_dir.join(&filename);
        self.sink.report(
            &format!("Resolving sharing link, saving as '{filename}'"),
            Severity::Info,
        );

        let jar = match (credentials, Url::parse(url)) {
            (Some(credentials), Ok(parsed)) => Some(build_cookie_jar(credentials, &parsed)),
            _ => None,
        };
        let client = ProbeClient::new(jar, self.probe_timeout)?;

        let candidates = generate_candidates(url);
        debug!(count = candidates.len(), "generated candidates");
        let mut transport_failure = false;

        match self.probe_candidates(&client, &candidates, &dest).await {
            ProbeRun::Downloaded { strategy, bytes } => {
                return Ok(ResolutionOutcome::downloaded(&strategy, bytes, dest));
            }
            ProbeRun::Exhausted {
                transport_failure: t,
            } => transport_failure |= t,
            ProbeRun::Stopped(error) => return Ok(self.stopped(&error)),
            ProbeRun::Cancelled => return Ok(self.cancelled(url)),
        }

        match self.probe_page_links(&client, url, &dest).await {
            ProbeRun::Downloaded { strategy, bytes } => {
                return Ok(ResolutionOutcome::downloaded(&strategy, bytes, dest));
            }
            ProbeRun::Exhausted {
                transport_failure: t,
            } => transport_failure |= t,
            ProbeRun::Stopped(error) => return Ok(self.stopped(&error)),
            ProbeRun::Cancelled => return Ok(self.cancelled(url)),
        }

        Ok(self
            .engine_fallback(url, output_dir, &filename, credentials, transport_failure)
            .await)
    }

    /// Probes `candidates` in order and stops at the first one that yields the file.
    pub async fn probe_candidates(
        &self,
        client: &ProbeClient,
        candidates: &[CandidateUrl],
        dest: &Path,
    ) -> ProbeRun {
        let mut transport_failure = false;

        for (index, candidate) in candidates.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return ProbeRun::Cancelled;
            }
            self.sink.report(
                &format!(
                    "Trying {} ({}/{})",
                    candidate.strategy,
                    index + 1,
                    candidates.len()
                ),
                Severity::Info,
            );

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = client.probe_to_file(candidate, dest, self.sink) => Some(result),
            };

            match result {
                None => {
                    let _ = tokio::fs::remove_file(part_path(dest)).await;
                    return ProbeRun::Cancelled;
                }
                Some(Ok(bytes)) => {
                    info!(strategy = candidate.strategy, bytes, "candidate succeeded");
                    self.sink.report(
                        &format!(
                            "Downloaded {} ({bytes} bytes) via {}",
                            dest.display(),
                            candidate.strategy
                        ),
                        Severity::Success,
                    );
                    return ProbeRun::Downloaded {
                        strategy: candidate.strategy.to_string(),
                        bytes,
                    };
                }
                Some(Err(error)) => {
                    warn!(strategy = candidate.strategy, %error, "candidate rejected");
                    if matches!(error, ProbeError::Io { .. }) {
                        return ProbeRun::Stopped(error);
                    }
                    transport_failure |= error.is_transport();
                }
            }
        }

        ProbeRun::Exhausted { transport_failure }
    }

    async fn probe_page_links(&self, client: &ProbeClient, url: &str, dest: &Path) -> ProbeRun {
        if self.cancel.is_cancelled() {
            return ProbeRun::Cancelled;
        }
        self.sink
            .report("Scanning sharing page for download links", Severity::Info);

        let page = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return ProbeRun::Cancelled,
            page = client.fetch_page(url) => page,
        };
        let (final_url, html) = match page {
            Ok(page) => page,
            Err(error) => {
                warn!(%error, "could not fetch sharing page");
                return ProbeRun::Exhausted {
                    transport_failure: error.is_transport(),
                };
            }
        };

        let links: Vec<CandidateUrl> = extract_download_links(&html, &final_url)
            .into_iter()
            .map(|link| CandidateUrl {
                strategy: PAGE_LINK_STRATEGY,
                url: link,
                validation: ValidationMode::BinaryBody,
            })
            .collect();
        debug!(count = links.len(), "extracted page links");
        if links.is_empty() {
            return ProbeRun::Exhausted {
                transport_failure: false,
            };
        }
        self.probe_candidates(client, &links, dest).await
    }

    async fn engine_fallback(
        &self,
        url: &str,
        output_dir: &Path,
        filename: &str,
        credentials: Option<&CredentialSet>,
        transport_failure: bool,
    ) -> ResolutionOutcome {
        if self.cancel.is_cancelled() {
            return self.cancelled(url);
        }
        self.sink.report(
            &format!("Direct links failed; handing the link to {}", self.engine.name()),
            Severity::Warning,
        );

        let profile = ConfigProfile::resolver_fallback();
        let target = FetchTarget {
            url,
            output_dir,
            output_name: OutputName::Fixed(filename),
            credentials,
        };
        let job = target.job(&profile, self.sink);
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            result = self.engine.fetch(&job) => Some(result),
        };

        let record = |outcome| AttemptRecord {
            attempt: 1,
            strategy: ENGINE_FALLBACK_STRATEGY.to_string(),
            profile: profile.clone(),
            outcome,
        };

        match result {
            None => self.cancelled(url),
            Some(Ok(())) => {
                let path = output_dir.join(filename);
                let bytes = tokio::fs::metadata(&path)
                    .await
                    .ok()
                    .filter(|m| m.is_file())
                    .map_or(0, |m| m.len());
                if bytes == 0 {
                    let kind = ErrorKind::Validation;
                    let message = format!(
                        "{} reported success but {} is missing or empty",
                        self.engine.name(),
                        path.display()
                    );
                    warn!(path = %path.display(), "engine fallback produced no output");
                    self.sink.report(
                        &format!("Could not resolve sharing link ({kind}): {message}"),
                        Severity::Error,
                    );
                    return ResolutionOutcome {
                        engine_attempt: Some(record(AttemptOutcome::Fatal(kind))),
                        ..ResolutionOutcome::failed(kind, message)
                    };
                }
                self.sink.report(
                    &format!("Downloaded {} via {}", path.display(), self.engine.name()),
                    Severity::Success,
                );
                ResolutionOutcome {
                    engine_attempt: Some(record(AttemptOutcome::Success)),
                    ..ResolutionOutcome::downloaded(ENGINE_FALLBACK_STRATEGY, bytes, path)
                }
            }
            Some(Err(failure)) => {
                let mut kind = failure.kind();
                if kind == ErrorKind::Unknown && transport_failure {
                    kind = ErrorKind::Network;
                }
                self.sink.report(
                    &format!("Could not resolve sharing link ({kind}): {}", failure.message),
                    Severity::Error,
                );
                ResolutionOutcome {
                    engine_attempt: Some(record(AttemptOutcome::Fatal(kind))),
                    ..ResolutionOutcome::failed(kind, failure.message)
                }
            }
        }
    }

    fn stopped(&self, error: &ProbeError) -> ResolutionOutcome {
        let kind = error.kind();
        self.sink.report(
            &format!("Could not write resolved file ({kind}): {error}"),
            Severity::Error,
        );
        ResolutionOutcome::failed(kind, error.to_string())
    }

    fn cancelled(&self, url: &str) -> ResolutionOutcome {
        self.sink
            .report(&format!("Cancelled {url}"), Severity::Warning);
        ResolutionOutcome::cancelled()
    }
}
