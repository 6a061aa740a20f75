//! The external fetch engine seam.
//!
//! A [`FetchEngine`] performs one complete transfer for a URL using a resolved
//! [`ConfigProfile`]. Engines report failure only through a message string;
//! [`EngineFailure::kind`] is the single place that string is turned into an
//! [`ErrorKind`].

mod ytdlp;

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::CredentialSet;
use crate::download::{ErrorKind, classify_engine_message};
use crate::profile::ConfigProfile;
use crate::status::StatusSink;

pub use ytdlp::{DEFAULT_OUTPUT_TEMPLATE, YtDlpEngine};

/// How the engine should name the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputName<'a> {
    /// Let the engine derive the name from the media title.
    EngineDefault,
    /// Write to this exact filename inside the output directory.
    Fixed(&'a str),
}

/// Everything an engine needs for one invocation.
#[derive(Clone, Copy)]
pub struct FetchJob<'a> {
    pub url: &'a str,
    pub output_dir: &'a Path,
    pub output_name: OutputName<'a>,
    pub profile: &'a ConfigProfile,
    pub credentials: Option<&'a CredentialSet>,
    pub sink: &'a dyn StatusSink,
}

impl std::fmt::Debug for FetchJob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchJob")
            .field("url", &self.url)
            .field("output_dir", &self.output_dir)
            .field("output_name", &self.output_name)
            .field("profile", &self.profile.name)
            .field("credentials", &self.credentials.map(CredentialSet::len))
            .finish_non_exhaustive()
    }
}

/// The per-request part of a [`FetchJob`]: what to fetch and where to put it.
///
/// The ladder and the fallback chain pair one target with a different profile
/// on every invocation.
#[derive(Debug, Clone, Copy)]
pub struct FetchTarget<'a> {
    pub url: &'a str,
    pub output_dir: &'a Path,
    pub output_name: OutputName<'a>,
    pub credentials: Option<&'a CredentialSet>,
}

impl<'a> FetchTarget<'a> {
    /// Pairs this target with a profile and a sink.
    #[must_use]
    pub fn job<'b>(&self, profile: &'b ConfigProfile, sink: &'b dyn StatusSink) -> FetchJob<'b>
    where
        'a: 'b,
    {
        FetchJob {
            url: self.url,
            output_dir: self.output_dir,
            output_name: self.output_name,
            profile,
            credentials: self.credentials,
            sink,
        }
    }
}

/// A failed engine invocation. The message is the only signal available.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineFailure {
    pub message: String,
}

impl EngineFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Classifies the failure message.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        classify_engine_message(&self.message)
    }
}

/// A media-download capability.
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Performs the transfer described by `job`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineFailure`] carrying the engine's error text.
    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), EngineFailure>;
}
