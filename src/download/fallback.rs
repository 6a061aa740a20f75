//! Alternative strategies tried after the retry ladder is exhausted.
//!
//! Each strategy is a complete, independent engine invocation with its own
//! profile; none of them continue from the ladder's escalated profile.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::{AttemptOutcome, AttemptRecord, ErrorKind};
use crate::engine::{FetchEngine, FetchTarget};
use crate::profile::{ConfigProfile, SINGLE_FILE_FORMAT};
use crate::status::{Severity, StatusSink};

/// A named, self-contained fallback strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeStrategy {
    pub name: &'static str,
    pub profile: ConfigProfile,
}

impl AlternativeStrategy {
    /// Single-stream mp4 at concurrency 1.
    #[must_use]
    pub fn simple() -> Self {
        Self::single_stream("simple", SINGLE_FILE_FORMAT, 3, Duration::from_secs(2))
    }

    /// Best audio track only.
    #[must_use]
    pub fn audio_only() -> Self {
        let mut strategy = Self::single_stream(
            "audio-only",
            "bestaudio[ext=m4a]/bestaudio",
            3,
            Duration::from_secs(2),
        );
        strategy.profile.merge_output_format = None;
        strategy
    }

    /// Worst available format, no certificate validation, engine errors ignored.
    #[must_use]
    pub fn minimal() -> Self {
        let mut strategy =
            Self::single_stream("minimal", "worst[ext=mp4]/worst", 5, Duration::from_secs(3));
        strategy.profile.check_certificate = false;
        strategy.profile.ignore_errors = true;
        strategy
    }

    fn single_stream(
        name: &'static str,
        format: &str,
        fragment_retries: u32,
        retry_sleep: Duration,
    ) -> Self {
        Self {
            name,
            profile: ConfigProfile {
                name: format!("fallback:{name}"),
                concurrent_fragments: 1,
                fragment_retries,
                retry_sleep,
                format: format.to_string(),
                prefer_merger: false,
                skip_unavailable_fragments: true,
                ..ConfigProfile::balanced()
            },
        }
    }
}

/// Terminal outcome of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOutcome {
    /// This strategy succeeded.
    Success { strategy: &'static str },
    /// Every strategy was tried, or one failed in a way no format change can fix.
    Exhausted {
        last_error: Option<ErrorKind>,
        message: Option<String>,
    },
    Cancelled,
}

/// What the chain did.
#[derive(Debug, Clone)]
pub struct ChainReport {
    pub outcome: ChainOutcome,
    pub attempts: Vec<AttemptRecord>,
}

/// Ordered list of fallback strategies.
#[derive(Debug, Clone)]
pub struct AlternativeStrategyChain {
    strategies: Vec<AlternativeStrategy>,
}

impl Default for AlternativeStrategyChain {
    fn default() -> Self {
        Self::new()
    }
}

impl AlternativeStrategyChain {
    /// The standard chain: simple, audio-only, minimal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            strategies: vec![
                AlternativeStrategy::simple(),
                AlternativeStrategy::audio_only(),
                AlternativeStrategy::minimal(),
            ],
        }
    }

    #[must_use]
    pub fn with_strategies(strategies: Vec<AlternativeStrategy>) -> Self {
        Self { strategies }
    }

    #[must_use]
    pub fn strategies(&self) -> &[AlternativeStrategy] {
        &self.strategies
    }

    /// Tries each strategy in order until one succeeds.
    ///
    /// `first_attempt` is the index recorded for the first strategy so the
    /// log continues where the ladder stopped.
    #[instrument(skip_all, fields(url = %target.url))]
    pub async fn run(
        &self,
        engine: &dyn FetchEngine,
        target: &FetchTarget<'_>,
        sink: &dyn StatusSink,
        cancel: &CancellationToken,
        first_attempt: u32,
    ) -> ChainReport {
        let mut attempts = Vec::new();
        let mut last: Option<(ErrorKind, String)> = None;

        for (index, strategy) in (first_attempt..).zip(&self.strategies) {
            if cancel.is_cancelled() {
                return ChainReport {
                    outcome: ChainOutcome::Cancelled,
                    attempts,
                };
            }

            sink.report(
                &format!("Trying alternative strategy '{}'", strategy.name),
                Severity::Info,
            );
            let job = target.job(&strategy.profile, sink);
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = engine.fetch(&job) => Some(result),
            };

            match result {
                None => {
                    return ChainReport {
                        outcome: ChainOutcome::Cancelled,
                        attempts,
                    };
                }
                Some(Ok(())) => {
                    info!(strategy = strategy.name, "alternative strategy succeeded");
                    sink.report(
                        &format!("Downloaded {} using '{}'", target.url, strategy.name),
                        Severity::Success,
                    );
                    attempts.push(AttemptRecord {
                        attempt: index,
                        strategy: strategy.name.to_string(),
                        profile: strategy.profile.clone(),
                        outcome: AttemptOutcome::Success,
                    });
                    return ChainReport {
                        outcome: ChainOutcome::Success {
                            strategy: strategy.name,
                        },
                        attempts,
                    };
                }
                Some(Err(failure)) => {
                    let kind = failure.kind();
                    warn!(strategy = strategy.name, %kind, error = %failure, "alternative strategy failed");
                    sink.report(
                        &format!("Strategy '{}' failed ({kind})", strategy.name),
                        Severity::Warning,
                    );
                    let stop = kind.is_fatal();
                    attempts.push(AttemptRecord {
                        attempt: index,
                        strategy: strategy.name.to_string(),
                        profile: strategy.profile.clone(),
                        outcome: if stop {
                            AttemptOutcome::Fatal(kind)
                        } else {
                            AttemptOutcome::Retryable(kind)
                        },
                    });
                    last = Some((kind, failure.message));
                    if stop {
                        break;
                    }
                }
            }
        }

        let (last_error, message) = last.map_or((None, None), |(kind, message)| {
            (Some(kind), Some(message))
        });
        ChainReport {
            outcome: ChainOutcome::Exhausted {
                last_error,
                message,
            },
            attempts,
        }
    }
}
