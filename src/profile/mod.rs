//! Download tuning profiles.
//!
//! A [`ConfigProfile`] is plain data describing how the fetch engine should be
//! driven: concurrency, retry counts, backoff, timeouts and format selection.
//! Profiles are never mutated in place. Tightening a profile (for a fragile
//! host, after a failed attempt, or as a last resort) always derives a new
//! value, so every profile used during a download can be reconstructed from
//! its base and the [`ProfileLayer`]s applied on top of it.
//!
//! # Modes
//!
//! | Mode | Concurrency | Chunk | Format | Needs merger |
//! |------|-------------|-------|--------|--------------|
//! | `balanced` | 4 | 10 MiB | best single-file mp4 | no |
//! | `speed` | 6 | 20 MiB | best single-file mp4 | no |
//! | `quality` | 3 | 10 MiB | 1080p+ video + audio | yes |
//! | `speed+quality` | 8 | 30 MiB | 1080p+ video + audio | yes |

mod layers;
mod stability;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::status::{Severity, StatusSink};

pub use layers::{LayeredProfile, ProfileLayer};
pub use stability::{FRAGILE_HOSTS, adjust_for_stability, is_fragile_host};

const MIB: u64 = 1024 * 1024;

/// Single-file mp4 with a fallback to whatever is best.
pub const SINGLE_FILE_FORMAT: &str = "best[ext=mp4]/best";

/// Separate high-resolution video and audio streams; requires a merger.
pub const HIGH_QUALITY_FORMAT: &str = "bestvideo[height>=1080][ext=mp4]+bestaudio[ext=m4a]/bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// Fragment-retry value applied by escalation.
pub const ESCALATED_FRAGMENT_RETRIES: u32 = 10;
/// Backoff applied by escalation.
pub const ESCALATED_RETRY_SLEEP: Duration = Duration::from_secs(3);
/// File-access retry value applied by escalation.
pub const ESCALATED_FILE_ACCESS_RETRIES: u32 = 8;

/// Requested trade-off between speed and quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DownloadMode {
    #[default]
    Balanced,
    Speed,
    Quality,
    SpeedQuality,
}

impl DownloadMode {
    /// All declared modes.
    pub const ALL: [Self; 4] = [
        Self::Balanced,
        Self::Speed,
        Self::Quality,
        Self::SpeedQuality,
    ];

    /// Whether this mode selects separate video/audio streams that must be merged.
    #[must_use]
    pub fn requires_merge(self) -> bool {
        matches!(self, Self::Quality | Self::SpeedQuality)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Balanced => "balanced",
            Self::Speed => "speed",
            Self::Quality => "quality",
            Self::SpeedQuality => "speed+quality",
        }
    }
}

impl fmt::Display for DownloadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadMode {
    type Err = std::convert::Infallible;

    /// Parses a mode name. Unknown names fail closed to [`DownloadMode::Balanced`].
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', '-', ' '], "+");
        let mode = match normalized.as_str() {
            "speed" | "fast" => Self::Speed,
            "quality" | "hq" => Self::Quality,
            "speed+quality" | "speedquality" | "quality+speed" => Self::SpeedQuality,
            "balanced" => Self::Balanced,
            other => {
                debug!(mode = other, "unknown download mode, using balanced");
                Self::Balanced
            }
        };
        Ok(mode)
    }
}

/// Tuning parameters handed to the fetch engine for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigProfile {
    /// Profile name, extended with a suffix for every derived layer.
    pub name: String,
    /// Number of fragments fetched in parallel.
    pub concurrent_fragments: u32,
    /// Whole-request retries inside the engine.
    pub retries: u32,
    /// Per-fragment retries inside the engine.
    pub fragment_retries: u32,
    /// Retries for transient local file access errors.
    pub file_access_retries: u32,
    /// Retries for the metadata extraction step.
    pub extractor_retries: u32,
    /// Backoff between engine-level retries and between ladder attempts.
    pub retry_sleep: Duration,
    /// Per network call timeout.
    pub socket_timeout: Duration,
    /// HTTP range chunk size in bytes.
    pub http_chunk_size: u64,
    /// Engine format-selection expression.
    pub format: String,
    /// Container used when separate streams are merged.
    pub merge_output_format: Option<String>,
    /// Prefer the external merger over the engine's native muxing.
    pub prefer_merger: bool,
    /// Skip fragments that stay unavailable instead of aborting.
    pub skip_unavailable_fragments: bool,
    /// Validate TLS certificates.
    pub check_certificate: bool,
    /// Let the engine continue past per-item errors.
    pub ignore_errors: bool,
}

impl ConfigProfile {
    /// Default profile: single-file mp4, moderate concurrency.
    #[must_use]
    pub fn balanced() -> Self {
        Self {
            name: "balanced".to_string(),
            concurrent_fragments: 4,
            retries: 3,
            fragment_retries: 3,
            file_access_retries: 5,
            extractor_retries: 3,
            retry_sleep: Duration::from_secs(2),
            socket_timeout: Duration::from_secs(30),
            http_chunk_size: 10 * MIB,
            format: SINGLE_FILE_FORMAT.to_string(),
            merge_output_format: Some("mp4".to_string()),
            prefer_merger: false,
            skip_unavailable_fragments: true,
            check_certificate: true,
            ignore_errors: false,
        }
    }

    /// Higher concurrency and larger chunks than balanced.
    #[must_use]
    pub fn speed() -> Self {
        Self {
            name: "speed".to_string(),
            concurrent_fragments: 6,
            http_chunk_size: 20 * MIB,
            ..Self::balanced()
        }
    }

    /// 1080p+ video merged with the best audio track.
    #[must_use]
    pub fn quality() -> Self {
        Self {
            name: "quality".to_string(),
            concurrent_fragments: 3,
            retries: 5,
            fragment_retries: 5,
            extractor_retries: 5,
            format: HIGH_QUALITY_FORMAT.to_string(),
            prefer_merger: true,
            ..Self::balanced()
        }
    }

    /// Quality format selection with the most aggressive transfer settings.
    #[must_use]
    pub fn speed_quality() -> Self {
        Self {
            name: "speed+quality".to_string(),
            concurrent_fragments: 8,
            http_chunk_size: 30 * MIB,
            socket_timeout: Duration::from_secs(20),
            ..Self::quality()
        }
    }

    /// Derives a more conservative profile after a fragment or network failure.
    ///
    /// Concurrency is halved (never below 1); fragment retries, backoff and
    /// file-access retries are raised to fixed floors but never lowered.
    #[must_use]
    pub fn escalated(&self) -> Self {
        Self {
            name: format!("{}+escalated", self.name),
            concurrent_fragments: (self.concurrent_fragments / 2).max(1),
            fragment_retries: self.fragment_retries.max(ESCALATED_FRAGMENT_RETRIES),
            retry_sleep: self.retry_sleep.max(ESCALATED_RETRY_SLEEP),
            file_access_retries: self.file_access_retries.max(ESCALATED_FILE_ACCESS_RETRIES),
            skip_unavailable_fragments: true,
            ..self.clone()
        }
    }

    /// Derives the maximally conservative profile used for a single retry after
    /// an unclassified failure.
    #[must_use]
    pub fn safe_fallback(&self) -> Self {
        Self {
            name: format!("{}+safe", self.name),
            concurrent_fragments: 1,
            retries: self.retries.max(10),
            fragment_retries: self.fragment_retries.max(15),
            file_access_retries: self.file_access_retries.max(10),
            retry_sleep: self.retry_sleep.max(Duration::from_secs(5)),
            socket_timeout: self.socket_timeout.max(Duration::from_secs(60)),
            skip_unavailable_fragments: true,
            ..self.clone()
        }
    }

    /// Last-resort engine profile for cloud sharing links nothing else could fetch.
    #[must_use]
    pub fn resolver_fallback() -> Self {
        Self {
            name: "resolver-fallback".to_string(),
            retries: 10,
            extractor_retries: 10,
            socket_timeout: Duration::from_secs(120),
            ignore_errors: true,
            ..Self::balanced()
        }
    }
}

impl Default for ConfigProfile {
    fn default() -> Self {
        Self::balanced()
    }
}

/// Maps a requested mode and merger availability to a base profile.
///
/// Modes that need a merger degrade to [`ConfigProfile::balanced`] when none is
/// available, and the degradation is reported as a warning on `sink`.
#[instrument(level = "debug", skip(sink))]
pub fn select_profile(
    mode: DownloadMode,
    merge_capable: bool,
    sink: &dyn StatusSink,
) -> ConfigProfile {
    if mode.requires_merge() && !merge_capable {
        sink.report(
            &format!("{mode} mode needs a stream merger (ffmpeg), which is unavailable; using balanced settings"),
            Severity::Warning,
        );
        return ConfigProfile::balanced();
    }

    match mode {
        DownloadMode::Balanced => ConfigProfile::balanced(),
        DownloadMode::Speed => ConfigProfile::speed(),
        DownloadMode::Quality => ConfigProfile::quality(),
        DownloadMode::SpeedQuality => ConfigProfile::speed_quality(),
    }
}
