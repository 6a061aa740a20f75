//! The configuration-escalation retry ladder.
//!
//! [`AttemptController`] drives the fetch engine through a small state machine:
//!
//! ```text
//! Attempting(n) ──ok──────────────────────────────▶ Success
//!      │
//!      └─fail─▶ classify ──Fragment/Network, n < max──▶ Escalating(n→n+1) ──sleep──▶ Attempting(n+1)
//!                  │      ──Unknown, first time───────▶ Escalating(n→n+1, safe profile)
//!                  │      ──Filesystem/Permission/Validation──▶ Fatal
//!                  │      ──Unknown after safe retry──▶ Fatal
//!                  └───── anything else once n ≥ max ──▶ ExhaustedToFallback
//! ```
//!
//! The loop carries `(attempt index, layered profile)` explicitly; every
//! attempt is appended to an [`AttemptRecord`] log. The cancellation token is
//! checked before each attempt and raced against every engine call and
//! backoff sleep.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::ErrorKind;
use crate::engine::{FetchEngine, FetchTarget};
use crate::profile::{ConfigProfile, LayeredProfile, ProfileLayer};
use crate::status::{Severity, StatusSink};

/// Maximum jitter added to backoff sleeps (500ms).
pub const MAX_JITTER: Duration = Duration::from_millis(500);

/// Result of one engine invocation, as recorded in the attempt log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    /// Failed, but the ladder or fallback chain continued.
    Retryable(ErrorKind),
    /// Failed and ended the request.
    Fatal(ErrorKind),
}

/// One entry of the append-only attempt log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 1-based attempt index across the ladder and fallback chain.
    pub attempt: u32,
    /// Name of the ladder step or fallback strategy.
    pub strategy: String,
    /// Effective profile used for this attempt.
    pub profile: ConfigProfile,
    pub outcome: AttemptOutcome,
}

/// Ladder states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderState {
    Attempting(u32),
    Escalating {
        from: u32,
        to: u32,
        layer: ProfileLayer,
    },
    Success,
    ExhaustedToFallback,
    Fatal(ErrorKind),
    Cancelled,
}

/// Terminal outcome of the ladder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LadderOutcome {
    /// An attempt succeeded with this profile.
    Success { profile: ConfigProfile },
    /// The budget ran out on retryable failures; the fallback chain should run.
    ExhaustedToFallback { last_error: ErrorKind, message: String },
    /// A failure no retry can fix.
    Fatal { kind: ErrorKind, message: String },
    /// The cancellation token fired.
    Cancelled,
}

/// Everything the ladder did for one request.
#[derive(Debug, Clone)]
pub struct LadderReport {
    pub outcome: LadderOutcome,
    pub attempts: Vec<AttemptRecord>,
    /// The profile stack at the point the ladder stopped.
    pub final_profile: LayeredProfile,
}

/// Decides the state that follows a failed attempt.
///
/// `safe_retry_used` is true once the single conservative retry for an
/// unclassified failure has been spent.
#[must_use]
pub fn next_state_after_failure(
    kind: ErrorKind,
    attempt: u32,
    max_attempts: u32,
    safe_retry_used: bool,
) -> LadderState {
    match kind {
        kind if kind.is_fatal() => LadderState::Fatal(kind),
        ErrorKind::Unknown if safe_retry_used => LadderState::Fatal(ErrorKind::Unknown),
        ErrorKind::Unknown => LadderState::Escalating {
            from: attempt,
            to: attempt + 1,
            layer: ProfileLayer::SafeFallback,
        },
        _ if attempt < max_attempts => LadderState::Escalating {
            from: attempt,
            to: attempt + 1,
            layer: ProfileLayer::Escalation,
        },
        _ => LadderState::ExhaustedToFallback,
    }
}

/// Drives the retry ladder for one request.
pub struct AttemptController<'a> {
    engine: &'a dyn FetchEngine,
    sink: &'a dyn StatusSink,
    cancel: &'a CancellationToken,
    max_jitter: Duration,
}

impl<'a> AttemptController<'a> {
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
            max_jitter: MAX_JITTER,
        }
    }

    /// Overrides the maximum jitter added to backoff sleeps.
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Runs the ladder until success, a fatal error, exhaustion or cancellation.
    ///
    /// At most `max_attempts` engine invocations are made on retryable
    /// failures; an unclassified failure may add one conservative retry beyond
    /// that budget.
    #[instrument(skip(self, target, profile), fields(url = %target.url))]
    pub async fn run(
        &self,
        target: &FetchTarget<'_>,
        profile: LayeredProfile,
        max_attempts: u32,
    ) -> LadderReport {
        let max_attempts = max_attempts.max(1);
        let mut layered = profile;
        let mut attempts = Vec::new();
        let mut safe_retry_used = false;
        let mut last_failure: Option<(ErrorKind, String)> = None;
        let mut state = LadderState::Attempting(1);

        let outcome = loop {
            debug!(?state, "ladder state");
            state = match state {
                LadderState::Attempting(n) => {
                    if self.cancel.is_cancelled() {
                        LadderState::Cancelled
                    } else {
                        let effective = layered.effective();
                        let job = target.job(&effective, self.sink);
                        self.sink.report(
                            &format!(
                                "Attempt {n}/{max_attempts} for {} ({})",
                                target.url, effective.name
                            ),
                            Severity::Info,
                        );

                        let result = tokio::select! {
                            biased;
                            () = self.cancel.cancelled() => None,
                            result = self.engine.fetch(&job) => Some(result),
                        };

                        match result {
                            None => LadderState::Cancelled,
                            Some(Ok(())) => {
                                attempts.push(AttemptRecord {
                                    attempt: n,
                                    strategy: effective.name.clone(),
                                    profile: effective,
                                    outcome: AttemptOutcome::Success,
                                });
                                LadderState::Success
                            }
                            Some(Err(failure)) => {
                                let kind = failure.kind();
                                let next = next_state_after_failure(
                                    kind,
                                    n,
                                    max_attempts,
                                    safe_retry_used,
                                );
                                warn!(attempt = n, %kind, error = %failure, "attempt failed");
                                attempts.push(AttemptRecord {
                                    attempt: n,
                                    strategy: effective.name.clone(),
                                    profile: effective,
                                    outcome: match next {
                                        LadderState::Fatal(kind) => AttemptOutcome::Fatal(kind),
                                        _ => AttemptOutcome::Retryable(kind),
                                    },
                                });
                                last_failure = Some((kind, failure.message));
                                next
                            }
                        }
                    }
                }

                LadderState::Escalating { from, to, layer } => {
                    if layer == ProfileLayer::SafeFallback {
                        safe_retry_used = true;
                    }
                    layered = layered.push(layer);
                    let next_profile = layered.effective();
                    let delay = next_profile.retry_sleep + self.jitter();

                    let reason = last_failure.as_ref().map_or(ErrorKind::Unknown, |(k, _)| *k);
                    self.sink.report(
                        &format!(
                            "Attempt {from} failed ({reason}); retrying with {} fragment(s) in {:.1}s",
                            next_profile.concurrent_fragments,
                            delay.as_secs_f64()
                        ),
                        Severity::Warning,
                    );
                    debug!(from, to, ?layer, delay_ms = delay.as_millis(), "escalating profile");

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => LadderState::Cancelled,
                        () = tokio::time::sleep(delay) => LadderState::Attempting(to),
                    }
                }

                LadderState::Success => {
                    let profile = layered.effective();
                    info!(profile = %profile.name, attempts = attempts.len(), "download succeeded");
                    self.sink
                        .report(&format!("Downloaded {}", target.url), Severity::Success);
                    break LadderOutcome::Success { profile };
                }

                LadderState::ExhaustedToFallback => {
                    let (last_error, message) = last_failure
                        .take()
                        .unwrap_or((ErrorKind::Unknown, String::new()));
                    self.sink.report(
                        &format!("All {max_attempts} attempt(s) failed; trying alternative strategies"),
                        Severity::Warning,
                    );
                    break LadderOutcome::ExhaustedToFallback { last_error, message };
                }

                LadderState::Fatal(kind) => {
                    let message = last_failure
                        .take()
                        .map(|(_, message)| message)
                        .unwrap_or_default();
                    self.sink
                        .report(&format!("Download failed ({kind}): {message}"), Severity::Error);
                    break LadderOutcome::Fatal { kind, message };
                }

                LadderState::Cancelled => {
                    self.sink
                        .report(&format!("Cancelled {}", target.url), Severity::Warning);
                    break LadderOutcome::Cancelled;
                }
            };
        };

        LadderReport {
            outcome,
            attempts,
            final_profile: layered,
        }
    }

    fn jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }
}
