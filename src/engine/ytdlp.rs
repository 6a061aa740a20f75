//! `yt-dlp` subprocess engine.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, instrument};
use url::Url;

use super::{EngineFailure, FetchEngine, FetchJob, OutputName};
use crate::status::Severity;

/// Output template used when the engine names the file itself.
pub const DEFAULT_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Filenames longer than this are trimmed by the engine.
const TRIM_FILENAME_LENGTH: u32 = 120;

/// Stderr lines kept for the failure message when no `ERROR:` line is printed.
const STDERR_TAIL_LINES: usize = 5;

/// Common install locations checked before falling back to `PATH`.
const COMMON_LOCATIONS: &[&str] = &[
    "/opt/homebrew/bin/yt-dlp",
    "/usr/local/bin/yt-dlp",
    "/usr/bin/yt-dlp",
];

/// Runs `yt-dlp` as a child process, one process per fetch.
#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
}

impl YtDlpEngine {
    /// Uses the first `yt-dlp` found in a common location, else relies on `PATH`.
    #[must_use]
    pub fn new() -> Self {
        let program = COMMON_LOCATIONS
            .iter()
            .map(Path::new)
            .find(|path| path.exists())
            .map_or_else(|| PathBuf::from("yt-dlp"), Path::to_path_buf);
        Self { program }
    }

    /// Uses an explicit executable path.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Translates a job into `yt-dlp` command-line arguments.
pub(crate) fn build_args(job: &FetchJob<'_>) -> Vec<String> {
    let profile = job.profile;
    let mut args: Vec<String> = vec![
        "--newline".into(),
        "--no-playlist".into(),
        "--continue".into(),
        "--trim-filenames".into(),
        TRIM_FILENAME_LENGTH.to_string(),
        "--format".into(),
        profile.format.clone(),
        "--concurrent-fragments".into(),
        profile.concurrent_fragments.to_string(),
        "--retries".into(),
        profile.retries.to_string(),
        "--fragment-retries".into(),
        profile.fragment_retries.to_string(),
        "--file-access-retries".into(),
        profile.file_access_retries.to_string(),
        "--extractor-retries".into(),
        profile.extractor_retries.to_string(),
        "--retry-sleep".into(),
        profile.retry_sleep.as_secs().to_string(),
        "--socket-timeout".into(),
        profile.socket_timeout.as_secs().to_string(),
        "--http-chunk-size".into(),
        profile.http_chunk_size.to_string(),
    ];

    if profile.prefer_merger
        && let Some(container) = &profile.merge_output_format
    {
        args.push("--merge-output-format".into());
        args.push(container.clone());
    }
    args.push(if profile.skip_unavailable_fragments {
        "--skip-unavailable-fragments".into()
    } else {
        "--abort-on-unavailable-fragments".into()
    });
    if !profile.check_certificate {
        args.push("--no-check-certificates".into());
    }
    if profile.ignore_errors {
        args.push("--ignore-errors".into());
    }

    // yt-dlp only reads Netscape cookie files; everything else goes in a header.
    if let Some(credentials) = job.credentials {
        if let Some(path) = credentials.netscape_file() {
            args.push("--cookies".into());
            args.push(path.display().to_string());
        } else if let Some(header) = Url::parse(job.url)
            .ok()
            .and_then(|url| url.host_str().and_then(|host| credentials.cookie_header_for(host)))
        {
            args.push("--add-header".into());
            args.push(format!("Cookie:{header}"));
        }
    }

    args.push("--paths".into());
    args.push(job.output_dir.display().to_string());
    args.push("--output".into());
    args.push(match job.output_name {
        OutputName::EngineDefault => DEFAULT_OUTPUT_TEMPLATE.to_string(),
        // Literal percent signs would otherwise be read as template fields.
        OutputName::Fixed(name) => name.replace('%', "%%"),
    });

    args.push("--".into());
    args.push(job.url.to_string());
    args
}

/// Extracts the percentage from a `[download]  42.3% of ...` progress line.
pub(crate) fn parse_progress_percent(line: &str) -> Option<f64> {
    let rest = line.strip_prefix("[download]")?.trim_start();
    let (number, _) = rest.split_once('%')?;
    number.trim().parse().ok()
}

/// Describes a failed spawn without echoing the OS error text, which would
/// otherwise read as a filesystem or permission problem with the output.
fn launch_failure_message(program: &Path, error: &std::io::Error) -> String {
    let reason = match error.kind() {
        std::io::ErrorKind::NotFound => "was not found",
        std::io::ErrorKind::PermissionDenied => "is not executable",
        _ => "could not be launched",
    };
    format!(
        "yt-dlp executable {reason}: {} (install yt-dlp or pass --ytdlp)",
        program.display()
    )
}

/// Builds the failure message from captured stderr.
fn failure_message(stderr: &[String], status: std::process::ExitStatus) -> String {
    let errors: Vec<&str> = stderr
        .iter()
        .map(String::as_str)
        .filter(|line| line.starts_with("ERROR:"))
        .collect();
    if !errors.is_empty() {
        return errors.join("\n");
    }

    let tail_start = stderr.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = stderr[tail_start..].join("\n");
    if tail.trim().is_empty() {
        format!("yt-dlp exited with {status}")
    } else {
        tail
    }
}

#[async_trait]
impl FetchEngine for YtDlpEngine {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    #[instrument(skip(self, job), fields(url = %job.url, profile = %job.profile.name))]
    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), EngineFailure> {
        let args = build_args(job);
        debug!(program = %self.program.display(), ?args, "spawning yt-dlp");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                debug!(error = %e, "yt-dlp spawn failed");
                EngineFailure::new(launch_failure_message(&self.program, &e))
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let progress = async {
            let Some(stdout) = stdout else { return };
            let mut lines = BufReader::new(stdout).lines();
            let mut last_reported: Option<u32> = None;
            while let Ok(Some(line)) = lines.next_line().await {
                let Some(percent) = parse_progress_percent(&line) else {
                    continue;
                };
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let whole = percent.clamp(0.0, 100.0) as u32;
                if last_reported != Some(whole) {
                    last_reported = Some(whole);
                    job.sink
                        .report(&format!("{}: {percent:.1}%", job.url), Severity::Progress);
                }
            }
        };

        let errors = async {
            let mut captured = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    captured.push(line);
                }
            }
            captured
        };

        let ((), stderr_lines, status) = tokio::join!(progress, errors, child.wait());
        let status = status.map_err(|e| EngineFailure::new(format!("yt-dlp process failed: {e}")))?;

        if status.success() {
            info!(url = %job.url, "yt-dlp download complete");
            Ok(())
        } else {
            Err(EngineFailure::new(failure_message(&stderr_lines, status)))
        }
    }
}
