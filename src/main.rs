//! CLI entry point for mediadl.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::{ExitCode, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mediadl_core::{
    CookieFileSupplier, CredentialSet, CredentialSupplier, DEFAULT_MAX_ATTEMPTS, DownloadMode,
    DownloadRequest, DownloadResult, FetchEngine, Orchestrator, StatusSink, TracingSink,
    YtDlpEngine,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use app_config::{FileConfig, load_config};
use cli::Args;
use progress::SpinnerSink;

/// Effective settings after merging CLI flags over the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RunSettings {
    output_dir: PathBuf,
    mode: DownloadMode,
    max_attempts: u32,
    cookies_file: Option<PathBuf>,
    ytdlp_path: Option<PathBuf>,
    /// `None` means probe for ffmpeg.
    merge_capable: Option<bool>,
}

impl RunSettings {
    fn merge(args: &Args, file: &FileConfig) -> Self {
        let mode = args
            .mode
            .as_deref()
            .map(|raw| raw.parse::<DownloadMode>().unwrap_or_default())
            .or(file.mode)
            .unwrap_or_default();

        let merge_capable = if args.no_merge {
            Some(false)
        } else {
            file.merge_capable
        };

        Self {
            output_dir: args
                .output_dir
                .clone()
                .or_else(|| file.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            mode,
            max_attempts: args
                .max_attempts
                .or(file.max_attempts)
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            cookies_file: args.cookies.clone().or_else(|| file.cookies_file.clone()),
            ytdlp_path: args.ytdlp.clone().or_else(|| file.ytdlp_path.clone()),
            merge_capable,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_config(args.config.as_deref())?;
    if loaded.loaded_from_file {
        debug!(path = ?loaded.path, "loaded config file");
    }
    let settings = RunSettings::merge(&args, &loaded.config);
    debug!(?settings, "effective settings");

    let input_text = if !args.urls.is_empty() {
        args.urls.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: mediadl 'https://www.youtube.com/watch?v=...'");
        return Ok(ExitCode::SUCCESS);
    };

    let urls = collect_urls(&input_text);
    if urls.is_empty() {
        info!("No URLs found in input");
        return Ok(ExitCode::SUCCESS);
    }

    let credentials = match &settings.cookies_file {
        Some(path) => Some(
            CookieFileSupplier
                .load(path)
                .with_context(|| format!("Failed to load cookies from '{}'", path.display()))?,
        ),
        None => None,
    };

    let merge_capable = match settings.merge_capable {
        Some(value) => value,
        None => ffmpeg_available().await,
    };
    if !merge_capable {
        debug!("ffmpeg not available, merged formats disabled");
    }

    let engine: Arc<dyn FetchEngine> = Arc::new(
        settings
            .ytdlp_path
            .clone()
            .map_or_else(YtDlpEngine::new, YtDlpEngine::with_program),
    );

    let spinner = (!args.quiet && io::stderr().is_terminal()).then(|| Arc::new(SpinnerSink::new()));
    let sink: Arc<dyn StatusSink> = match &spinner {
        Some(spinner) => Arc::clone(spinner) as Arc<dyn StatusSink>,
        None => Arc::new(TracingSink),
    };

    let orchestrator = Arc::new(Orchestrator::new(engine, sink, merge_capable));
    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    info!(urls = urls.len(), mode = %settings.mode, "starting downloads");

    let mut tasks = JoinSet::new();
    for url in urls {
        let request = build_request(&url, &settings, credentials.as_ref());
        let orchestrator = Arc::clone(&orchestrator);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let result = orchestrator.download(&request, &cancel).await;
            (url, result)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(entry) => results.push(entry),
            Err(error) => warn!(%error, "download task panicked"),
        }
    }

    if let Some(spinner) = &spinner {
        spinner.finish();
    }

    let failed = print_summary(&results);
    if failed > 0 || results.is_empty() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// One URL per line; blank lines and `#` comments are ignored.
fn collect_urls(input: &str) -> Vec<String> {
    input
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

fn build_request(
    url: &str,
    settings: &RunSettings,
    credentials: Option<&CredentialSet>,
) -> DownloadRequest {
    let request = DownloadRequest::new(url, settings.output_dir.clone())
        .with_mode(settings.mode)
        .with_max_attempts(settings.max_attempts);
    match credentials {
        Some(credentials) => request.with_credentials(credentials.clone()),
        None => request,
    }
}

async fn ffmpeg_available() -> bool {
    tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .is_ok_and(|status| status.success())
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling downloads");
            cancel.cancel();
        }
    });
}

/// Prints one line per request and returns the number of failures.
fn print_summary(results: &[(String, DownloadResult)]) -> usize {
    let mut failed = 0;
    for (url, result) in results {
        if result.success {
            let strategy = result.strategy.as_deref().unwrap_or("default");
            match &result.output {
                Some(path) => println!("OK      {url} ({strategy}) -> {}", path.display()),
                None => println!("OK      {url} ({strategy})"),
            }
        } else if result.cancelled {
            failed += 1;
            println!("CANCEL  {url}");
        } else {
            failed += 1;
            let kind = result
                .error
                .map_or_else(|| "unknown".to_string(), |kind| kind.to_string());
            let message = result.message.as_deref().unwrap_or("download failed");
            println!("FAILED  {url} [{kind}] {message}");
            for hint in &result.hints {
                println!("        - {}: {}", hint.what, hint.fix);
            }
        }
    }
    info!(
        total = results.len(),
        succeeded = results.len() - failed,
        failed,
        "downloads finished"
    );
    failed
}
