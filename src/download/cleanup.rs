//! Removal of leftover partial files from interrupted downloads.
//!
//! Only files older than [`STALE_AFTER`] are touched, so a transfer still
//! running in the same directory keeps its `.part` file.

use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Partial files untouched for longer than this are considered abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Final extensions written by the engine and the resolver while a transfer runs.
const PARTIAL_EXTENSIONS: &[&str] = &["part", "ytdl", "tmp", "temp"];

/// True for names that only ever belong to an unfinished download.
///
/// Looks at the text after the last dot: `part`, `ytdl`, `tmp`, `temp`,
/// `part-Frag<n>` and `frag<n>`/`fragment<n>`.
#[must_use]
pub fn is_partial_file_name(name: &str) -> bool {
    let Some((_, extension)) = name.rsplit_once('.') else {
        return false;
    };
    let extension = extension.to_ascii_lowercase();
    if PARTIAL_EXTENSIONS.contains(&extension.as_str()) || extension.starts_with("part-frag") {
        return true;
    }
    extension
        .strip_prefix("frag")
        .map(|rest| rest.strip_prefix("ment").unwrap_or(rest))
        .is_some_and(|digits| digits.chars().all(|c| c.is_ascii_digit()))
}

/// Deletes partial files in `dir` whose last modification is older than `max_age`.
///
/// Subdirectories are not descended into. Unreadable entries are skipped and a
/// failed removal is logged, never returned. Returns the number of files removed.
pub async fn remove_stale_partials(dir: &Path, max_age: Duration) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            debug!(dir = %dir.display(), %error, "skipping stale file cleanup");
            return 0;
        }
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        if !is_partial_file_name(&name.to_string_lossy()) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let stale = metadata.is_file()
            && metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .is_some_and(|age| age > max_age);
        if !stale {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed stale partial file");
                removed += 1;
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "could not remove stale partial file");
            }
        }
    }

    if removed > 0 {
        info!(dir = %dir.display(), removed, "cleaned up stale partial files");
    }
    removed
}
