//! Engine-driven downloads: the retry ladder and the fallback chain.
//!
//! # Features
//!
//! - Error classification at the engine boundary ([`classify_engine_message`])
//! - Profile escalation between attempts with backoff and jitter
//! - One conservative retry for unclassified failures
//! - Fixed fallback chain (simple, audio-only, minimal) after exhaustion
//! - Cancellation honoured before every attempt and during every sleep
//! - Removal of abandoned `.part` files before a request starts
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use mediadl_core::download::{AttemptController, LadderOutcome};
//! use mediadl_core::engine::{FetchTarget, OutputName, YtDlpEngine};
//! use mediadl_core::profile::{ConfigProfile, LayeredProfile};
//! use mediadl_core::status::TracingSink;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let engine = YtDlpEngine::new();
//! let cancel = CancellationToken::new();
//! let url = "https://www.youtube.com/watch?v=abc";
//! let target = FetchTarget {
//!     url,
//!     output_dir: Path::new("./downloads"),
//!     output_name: OutputName::EngineDefault,
//!     credentials: None,
//! };
//! let report = AttemptController::new(&engine, &TracingSink, &cancel)
//!     .run(&target, LayeredProfile::for_request(ConfigProfile::balanced(), url), 3)
//!     .await;
//! if let LadderOutcome::Success { profile } = report.outcome {
//!     println!("downloaded with {}", profile.name);
//! }
//! # }
//! ```

mod cleanup;
mod error;
mod fallback;
mod retry;

pub use cleanup::{STALE_AFTER, is_partial_file_name, remove_stale_partials};
pub use error::{ErrorKind, RequestError, classify_engine_message};
pub use fallback::{AlternativeStrategy, AlternativeStrategyChain, ChainOutcome, ChainReport};
pub use retry::{
    AttemptController, AttemptOutcome, AttemptRecord, LadderOutcome, LadderReport, LadderState,
    MAX_JITTER, next_state_after_failure,
};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, SomeError>` explicitly in function signatures.
