//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download videos and cloud-shared files, adapting when attempts fail.
///
/// Media URLs go through yt-dlp with a retry ladder that escalates and then
/// falls back to safer settings. Cloud sharing links are resolved to a direct
/// file download first.
#[derive(Parser, Debug)]
#[command(name = "mediadl")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download (reads stdin when omitted)
    #[arg(value_name = "URLS")]
    pub urls: Vec<String>,

    /// Directory downloaded files are written to [default: current directory]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Download mode: balanced, speed, quality or speed+quality
    #[arg(short = 'm', long)]
    pub mode: Option<String>,

    /// Retry ladder attempt budget (1-20) [default: 3]
    #[arg(short = 'a', long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: Option<u32>,

    /// Cookie file (Netscape cookies.txt or JSON export)
    #[arg(long, value_name = "FILE")]
    pub cookies: Option<PathBuf>,

    /// Path to the yt-dlp executable
    #[arg(long, value_name = "PATH")]
    pub ytdlp: Option<PathBuf>,

    /// Treat ffmpeg as unavailable and skip the probe
    #[arg(long)]
    pub no_merge: bool,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["mediadl"]).unwrap();
        assert!(args.urls.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.no_merge);
        assert!(args.mode.is_none());
        assert!(args.max_attempts.is_none());
        assert!(args.output_dir.is_none());
    }

    #[test]
    fn test_cli_positional_urls_collected_in_order() {
        let args =
            Args::try_parse_from(["mediadl", "https://a.example/1", "https://b.example/2"])
                .unwrap();
        assert_eq!(args.urls, vec!["https://a.example/1", "https://b.example/2"]);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["mediadl", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["mediadl", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["mediadl", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["mediadl", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["mediadl", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["mediadl", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Download Option Tests ====================

    #[test]
    fn test_cli_mode_and_output_dir_flags() {
        let args = Args::try_parse_from([
            "mediadl",
            "-m",
            "speed+quality",
            "-o",
            "/tmp/videos",
            "https://example.com/watch?v=1",
        ])
        .unwrap();
        assert_eq!(args.mode.as_deref(), Some("speed+quality"));
        assert_eq!(args.output_dir, Some(PathBuf::from("/tmp/videos")));
    }

    #[test]
    fn test_cli_max_attempts_bounds() {
        let args = Args::try_parse_from(["mediadl", "-a", "1"]).unwrap();
        assert_eq!(args.max_attempts, Some(1));
        let args = Args::try_parse_from(["mediadl", "--max-attempts", "20"]).unwrap();
        assert_eq!(args.max_attempts, Some(20));

        for invalid in ["0", "21"] {
            let err = Args::try_parse_from(["mediadl", "-a", invalid]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_engine_and_cookie_flags() {
        let args = Args::try_parse_from([
            "mediadl",
            "--cookies",
            "cookies.txt",
            "--ytdlp",
            "/opt/yt-dlp",
            "--no-merge",
            "--config",
            "alt.toml",
        ])
        .unwrap();
        assert_eq!(args.cookies, Some(PathBuf::from("cookies.txt")));
        assert_eq!(args.ytdlp, Some(PathBuf::from("/opt/yt-dlp")));
        assert!(args.no_merge);
        assert_eq!(args.config, Some(PathBuf::from("alt.toml")));
    }
}
