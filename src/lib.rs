//! mediadl core library
//!
//! Adaptive downloading of remote media and cloud-hosted files. The actual
//! transfer is delegated to an external fetch engine (`yt-dlp`) or to a plain
//! HTTP client; this crate decides how to ask for a file when the first
//! attempt fails, and where to ask when the URL is an opaque sharing link.
//!
//! # Architecture
//!
//! - [`orchestrator`] - request validation, routing and result assembly
//! - [`profile`] - engine tuning profiles, stability heuristics and layering
//! - [`download`] - error taxonomy, the retry ladder and the fallback chain
//! - [`resolver`] - cloud sharing link candidates, probing and page scraping
//! - [`engine`] - the fetch engine seam and the `yt-dlp` implementation
//! - [`auth`] - cookie files and cookie jars
//! - [`failure`] - actionable hints for failed downloads
//! - [`status`] - one-way status reporting

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod download;
pub mod engine;
pub mod failure;
pub mod orchestrator;
pub mod profile;
pub mod request;
pub mod resolver;
pub mod status;

mod user_agent;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use auth::{CookieFileSupplier, Credential, CredentialError, CredentialSet, CredentialSupplier};
pub use download::{AttemptOutcome, AttemptRecord, ErrorKind, RequestError, classify_engine_message};
pub use engine::{EngineFailure, FetchEngine, FetchJob, YtDlpEngine};
pub use failure::{FailureHint, hints_for};
pub use orchestrator::{ActiveDownloads, DownloadResult, Orchestrator, Route};
pub use profile::{ConfigProfile, DownloadMode, LayeredProfile, select_profile};
pub use request::{DEFAULT_MAX_ATTEMPTS, DownloadRequest, normalize_source_url};
pub use resolver::{CloudLinkResolver, ResolutionOutcome, is_cloud_sharing_link};
pub use status::{ChannelSink, NullSink, Severity, StatusSink, TracingSink};
