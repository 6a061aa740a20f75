//! User-facing guidance for terminal download failures.

use crate::download::ErrorKind;
use crate::orchestrator::Route;

/// One piece of actionable advice attached to a failed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureHint {
    pub what: &'static str,
    pub fix: &'static str,
}

impl FailureHint {
    const fn new(what: &'static str, fix: &'static str) -> Self {
        Self { what, fix }
    }
}

const UNSTABLE_TRANSFER: FailureHint = FailureHint::new(
    "The transfer kept failing mid-stream",
    "Retry with a lower mode (`-m balanced`) and check that the connection is stable.",
);

const OUTPUT_NOT_WRITABLE: FailureHint = FailureHint::new(
    "The output file could not be written",
    "Check that the output directory exists, is writable and has free space.",
);

const PERMISSION_DENIED: FailureHint = FailureHint::new(
    "Access to the output location was denied",
    "Check the folder permissions or choose another output directory with `-o`.",
);

const BAD_URL: FailureHint = FailureHint::new(
    "The URL could not be used",
    "Check that the URL is complete and points to a supported page.",
);

const UNCLASSIFIED: FailureHint = FailureHint::new(
    "The download failed for an unrecognised reason",
    "Update yt-dlp (`yt-dlp -U`) and rerun with `-v` to see the full engine output.",
);

/// Extra advice for sharing links that could not be resolved.
const CLOUD_LINK_HINTS: [FailureHint; 5] = [
    FailureHint::new(
        "The sharing link may need a browser session",
        "Open the link in a browser to confirm it loads.",
    ),
    FailureHint::new(
        "The file may require sign-in",
        "Sign in, re-export your cookies file and pass it with `--cookies`.",
    ),
    FailureHint::new(
        "Sharing links can expire",
        "Verify the link has not expired or ask the owner for a new one.",
    ),
    FailureHint::new(
        "The link may not be shared with you",
        "Check the sharing permissions (anyone with the link vs. specific people).",
    ),
    FailureHint::new(
        "Automatic resolution is not possible for every link",
        "Download the file manually from the browser.",
    ),
];

/// Hints for a terminal failure of `kind` on `route`.
///
/// Always returns at least one hint.
#[must_use]
pub fn hints_for(kind: ErrorKind, route: Route) -> Vec<FailureHint> {
    let primary = match kind {
        ErrorKind::Fragment | ErrorKind::Network => UNSTABLE_TRANSFER,
        ErrorKind::Filesystem => OUTPUT_NOT_WRITABLE,
        ErrorKind::Permission => PERMISSION_DENIED,
        ErrorKind::Validation => BAD_URL,
        ErrorKind::Unknown => UNCLASSIFIED,
    };

    let mut hints = vec![primary];
    if route == Route::CloudLink && !matches!(kind, ErrorKind::Filesystem | ErrorKind::Permission)
    {
        hints.extend(CLOUD_LINK_HINTS);
    }
    hints
}
