//! Per-request orchestration: validation, routing and result assembly.
//!
//! Each [`Orchestrator::download`] call is independent. The route is chosen
//! once, before any network traffic:
//!
//! - [`Route::CloudLink`] for opaque cloud sharing links, handled by the
//!   [`CloudLinkResolver`]
//! - [`Route::Ladder`] for everything else: profile selection, the retry
//!   ladder and, on exhaustion, the alternative strategy chain

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::download::{
    AlternativeStrategyChain, AttemptController, AttemptRecord, ChainOutcome, ErrorKind,
    LadderOutcome, MAX_JITTER, STALE_AFTER, remove_stale_partials,
};
use crate::engine::{FetchEngine, FetchTarget, OutputName};
use crate::failure::{FailureHint, hints_for};
use crate::profile::{LayeredProfile, ProfileLayer, select_profile};
use crate::request::{DownloadRequest, normalize_source_url};
use crate::resolver::{CloudLinkResolver, is_cloud_sharing_link};
use crate::status::{Severity, StatusSink};

/// Which pipeline handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Fetch engine with the retry ladder and fallback chain.
    Ladder,
    /// Candidate probing for a cloud sharing link.
    CloudLink,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ladder => "ladder",
            Self::CloudLink => "cloud-link",
        })
    }
}

/// Chooses the route for an already-normalized URL.
#[must_use]
pub fn select_route(url: &str) -> Route {
    if is_cloud_sharing_link(url) {
        Route::CloudLink
    } else {
        Route::Ladder
    }
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub success: bool,
    /// `None` when the request was rejected before routing.
    pub route: Option<Route>,
    /// Profile, fallback strategy or resolver candidate that produced the file.
    pub strategy: Option<String>,
    /// Failure kind; `None` on success and on cancellation.
    pub error: Option<ErrorKind>,
    pub message: Option<String>,
    pub cancelled: bool,
    pub attempts: Vec<AttemptRecord>,
    /// Output file, when the producing step knows its name.
    pub output: Option<PathBuf>,
    pub hints: Vec<FailureHint>,
}

impl DownloadResult {
    fn succeeded(
        route: Route,
        strategy: String,
        attempts: Vec<AttemptRecord>,
        output: Option<PathBuf>,
    ) -> Self {
        Self {
            success: true,
            route: Some(route),
            strategy: Some(strategy),
            error: None,
            message: None,
            cancelled: false,
            attempts,
            output,
            hints: Vec::new(),
        }
    }

    fn failed(
        route: Option<Route>,
        kind: ErrorKind,
        message: String,
        attempts: Vec<AttemptRecord>,
    ) -> Self {
        Self {
            success: false,
            route,
            strategy: None,
            error: Some(kind),
            message: Some(message),
            cancelled: false,
            attempts,
            output: None,
            hints: hints_for(kind, route.unwrap_or(Route::Ladder)),
        }
    }

    fn cancelled(route: Route, attempts: Vec<AttemptRecord>) -> Self {
        Self {
            success: false,
            route: Some(route),
            strategy: None,
            error: None,
            message: None,
            cancelled: true,
            attempts,
            output: None,
            hints: Vec::new(),
        }
    }
}

/// Process-wide count of requests currently running.
#[derive(Debug, Clone, Default)]
pub struct ActiveDownloads {
    count: Arc<AtomicUsize>,
}

impl ActiveDownloads {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Marks a request as started until the returned guard is dropped.
    #[must_use]
    pub fn begin(&self) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            count: Arc::clone(&self.count),
        }
    }
}

/// Decrements the in-flight counter on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Entry point for download requests.
pub struct Orchestrator {
    engine: Arc<dyn FetchEngine>,
    sink: Arc<dyn StatusSink>,
    merge_capable: bool,
    active: ActiveDownloads,
    max_jitter: Duration,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("engine", &self.engine.name())
            .field("merge_capable", &self.merge_capable)
            .field("active", &self.active.count())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    ///
    /// `merge_capable` states whether the engine can merge separate video and
    /// audio streams (ffmpeg is installed).
    #[must_use]
    pub fn new(
        engine: Arc<dyn FetchEngine>,
        sink: Arc<dyn StatusSink>,
        merge_capable: bool,
    ) -> Self {
        Self {
            engine,
            sink,
            merge_capable,
            active: ActiveDownloads::new(),
            max_jitter: MAX_JITTER,
        }
    }

    /// Overrides the maximum jitter added to ladder backoff.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Handle to the in-flight counter, for display purposes.
    #[must_use]
    pub fn active_downloads(&self) -> ActiveDownloads {
        self.active.clone()
    }

    /// Runs one request to completion, failure or cancellation.
    ///
    /// Invalid URLs are rejected without any network call. The output
    /// directory is created, and cleared of abandoned partial files, before
    /// the first write.
    #[instrument(skip(self, request, cancel), fields(url = %request.source_url(), mode = %request.mode()))]
    pub async fn download(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> DownloadResult {
        let _in_flight = self.active.begin();
        let sink = self.sink.as_ref();

        let url = match normalize_source_url(request.source_url()) {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "rejected request");
                sink.report(&format!("Invalid URL: {error}"), Severity::Error);
                return self.finish(DownloadResult::failed(
                    None,
                    error.kind(),
                    error.to_string(),
                    Vec::new(),
                ));
            }
        };

        let route = select_route(&url);
        debug!(%route, %url, "route selected");

        if let Err(error) = tokio::fs::create_dir_all(request.output_dir()).await {
            let kind = if error.kind() == std::io::ErrorKind::PermissionDenied {
                ErrorKind::Permission
            } else {
                ErrorKind::Filesystem
            };
            let message = format!(
                "cannot create output directory {}: {error}",
                request.output_dir().display()
            );
            sink.report(&message, Severity::Error);
            return self.finish(DownloadResult::failed(
                Some(route),
                kind,
                message,
                Vec::new(),
            ));
        }

        remove_stale_partials(request.output_dir(), STALE_AFTER).await;

        let result = match route {
            Route::Ladder => self.run_ladder(&url, request, cancel).await,
            Route::CloudLink => self.run_resolver(&url, request, cancel).await,
        };
        self.finish(result)
    }

    async fn run_ladder(
        &self,
        url: &str,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> DownloadResult {
        let sink = self.sink.as_ref();
        let engine = self.engine.as_ref();

        let base = select_profile(request.mode(), self.merge_capable, sink);
        let layered = LayeredProfile::for_request(base, url);
        if layered.contains(ProfileLayer::FragileHost) {
            sink.report(
                "Source is known to drop connections; using conservative settings",
                Severity::Info,
            );
        }

        let target = FetchTarget {
            url,
            output_dir: request.output_dir(),
            output_name: OutputName::EngineDefault,
            credentials: request.credentials(),
        };
        let report = AttemptController::new(engine, sink, cancel)
            .with_max_jitter(self.max_jitter)
            .run(&target, layered, request.max_attempts())
            .await;
        let mut attempts = report.attempts;

        let (last_error, last_message) = match report.outcome {
            LadderOutcome::Success { profile } => {
                return DownloadResult::succeeded(Route::Ladder, profile.name, attempts, None);
            }
            LadderOutcome::Fatal { kind, message } => {
                return DownloadResult::failed(Some(Route::Ladder), kind, message, attempts);
            }
            LadderOutcome::Cancelled => return DownloadResult::cancelled(Route::Ladder, attempts),
            LadderOutcome::ExhaustedToFallback {
                last_error,
                message,
            } => (last_error, message),
        };

        let next_attempt = attempts.last().map_or(1, |a| a.attempt + 1);
        let chain = AlternativeStrategyChain::new()
            .run(engine, &target, sink, cancel, next_attempt)
            .await;
        attempts.extend(chain.attempts);

        match chain.outcome {
            ChainOutcome::Success { strategy } => {
                DownloadResult::succeeded(Route::Ladder, strategy.to_string(), attempts, None)
            }
            ChainOutcome::Cancelled => DownloadResult::cancelled(Route::Ladder, attempts),
            ChainOutcome::Exhausted {
                last_error: chain_error,
                message,
            } => {
                let kind = chain_error.unwrap_or(last_error);
                let message = message.unwrap_or(last_message);
                sink.report(
                    &format!("All strategies failed ({kind}): {message}"),
                    Severity::Error,
                );
                DownloadResult::failed(Some(Route::Ladder), kind, message, attempts)
            }
        }
    }

    async fn run_resolver(
        &self,
        url: &str,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> DownloadResult {
        let resolver = CloudLinkResolver::new(self.engine.as_ref(), self.sink.as_ref(), cancel);
        let outcome = match resolver
            .resolve(url, request.output_dir(), request.credentials())
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                return DownloadResult::failed(
                    Some(Route::CloudLink),
                    ErrorKind::Unknown,
                    error.to_string(),
                    Vec::new(),
                );
            }
        };

        let attempts: Vec<AttemptRecord> = outcome.engine_attempt.into_iter().collect();
        if outcome.success {
            return DownloadResult::succeeded(
                Route::CloudLink,
                outcome.chosen.unwrap_or_default(),
                attempts,
                outcome.output_path,
            );
        }
        if outcome.cancelled {
            return DownloadResult::cancelled(Route::CloudLink, attempts);
        }
        DownloadResult::failed(
            Some(Route::CloudLink),
            outcome.error.unwrap_or(ErrorKind::Unknown),
            outcome
                .message
                .unwrap_or_else(|| "sharing link could not be resolved".to_string()),
            attempts,
        )
    }

    fn finish(&self, result: DownloadResult) -> DownloadResult {
        if result.success {
            info!(strategy = ?result.strategy, attempts = result.attempts.len(), "request completed");
        } else if !result.cancelled {
            for hint in &result.hints {
                self.sink
                    .report(&format!("{}. {}", hint.what, hint.fix), Severity::Info);
            }
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::download::AttemptOutcome;
    use crate::profile::DownloadMode;
    use crate::test_support::{RecordingSink, ScriptedEngine};

    fn orchestrator(
        script: impl IntoIterator<Item = Result<(), &'static str>>,
        merge_capable: bool,
    ) -> (Orchestrator, Arc<ScriptedEngine>, Arc<RecordingSink>) {
        let engine = Arc::new(ScriptedEngine::new(script));
        let sink = Arc::new(RecordingSink::default());
        let orchestrator = Orchestrator::new(
            Arc::clone(&engine) as Arc<dyn FetchEngine>,
            Arc::clone(&sink) as Arc<dyn StatusSink>,
            merge_capable,
        )
        .with_max_jitter(Duration::ZERO);
        (orchestrator, engine, sink)
    }

    // ==================== Routing Tests ====================

    #[test]
    fn test_select_route() {
        assert_eq!(select_route("https://www.youtube.com/watch?v=a"), Route::Ladder);
        assert_eq!(
            select_route("https://contoso-my.sharepoint.com/:u:/r/personal/u/Documents/a.zip"),
            Route::CloudLink
        );
        assert_eq!(
            select_route("https://contoso.sharepoint.com/sites/t/a.zip"),
            Route::Ladder
        );
    }

    // ==================== Ladder Route Tests ====================

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, engine, _sink) = orchestrator([Ok(())], true);
        let request = DownloadRequest::new("https://www.youtube.com/watch?v=a", dir.path());

        let result = orchestrator
            .download(&request, &CancellationToken::new())
            .await;

        assert!(result.success);
        assert_eq!(result.route, Some(Route::Ladder));
        assert_eq!(result.attempts.len(), 1);
        assert!(result.hints.is_empty());
        assert_eq!(engine.call_count(), 1);
    }

    #[tokio::test]
    async fn test_normalizes_url_before_engine_call() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, engine, _sink) = orchestrator([Ok(())], true);
        let request = DownloadRequest::new("  m.youtube.com/watch?v=a\n", dir.path());

        let _ = orchestrator
            .download(&request, &CancellationToken::new())
            .await;

        assert_eq!(engine.calls()[0].url, "https://www.youtube.com/watch?v=a");
    }

    #[tokio::test]
    async fn test_validation_failure_makes_no_calls() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, engine, _sink) = orchestrator([Ok(())], true);
        let request = DownloadRequest::new("javascript:alert(1)", dir.path());

        let result = orchestrator
            .download(&request, &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert_eq!(result.route, None);
        assert_eq!(result.error, Some(ErrorKind::Validation));
        assert!(!result.hints.is_empty());
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unusable_output_dir_is_filesystem_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let (orchestrator, engine, _sink) = orchestrator([Ok(())], true);
        let request = DownloadRequest::new("https://example.com/v.mp4", blocker.join("sub"));

        let result = orchestrator
            .download(&request, &CancellationToken::new())
            .await;

        assert_eq!(result.error, Some(ErrorKind::Filesystem));
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_failure_gets_one_safe_retry() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, engine, _sink) =
            orchestrator([Err("something odd"), Err("something odd")], true);
        let request = DownloadRequest::new("https://example.com/v", dir.path()).with_max_attempts(5);

        let result = orchestrator
            .download(&request, &CancellationToken::new())
            .await;

        assert_eq!(engine.call_count(), 2);
        assert_eq!(result.error, Some(ErrorKind::Unknown));
        assert_eq!(engine.calls()[1].profile.concurrent_fragments, 1);
        assert_eq!(
            result.attempts.last().unwrap().outcome,
            AttemptOutcome::Fatal(ErrorKind::Unknown)
        );
    }

    #[tokio::test]
    async fn test_in_flight_counter_returns_to_zero() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _engine, _sink) = orchestrator([Ok(())], true);
        let active = orchestrator.active_downloads();
        let request = DownloadRequest::new("https://example.com/v", dir.path());

        let _ = orchestrator
            .download(&request, &CancellationToken::new())
            .await;

        assert_eq!(active.count(), 0);
    }

    #[test]
    fn test_in_flight_guard_counts() {
        let active = ActiveDownloads::new();
        let first = active.begin();
        let second = active.begin();
        assert_eq!(active.count(), 2);
        drop(first);
        assert_eq!(active.count(), 1);
        drop(second);
        assert_eq!(active.count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_request_has_no_error_kind() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, engine, _sink) = orchestrator([Ok(())], true);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let request = DownloadRequest::new("https://example.com/v", dir.path())
            .with_mode(DownloadMode::Speed);

        let result = orchestrator.download(&request, &cancel).await;

        assert!(result.cancelled);
        assert!(!result.success);
        assert_eq!(result.error, None);
        assert!(result.hints.is_empty());
        assert_eq!(engine.call_count(), 0);
    }

    #[tokio::test]
    async fn test_failure_hints_are_reported() {
        let dir = TempDir::new().unwrap();
        let (orchestrator, _engine, sink) =
            orchestrator([Err("[Errno 13] Permission denied: 'out'")], true);
        let request = DownloadRequest::new("https://example.com/v", dir.path());

        let result = orchestrator
            .download(&request, &CancellationToken::new())
            .await;

        assert_eq!(result.error, Some(ErrorKind::Permission));
        assert!(sink.has(Severity::Info, "permissions"));
    }
}
