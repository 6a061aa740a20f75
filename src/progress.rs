//! Spinner rendering for status messages.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mediadl_core::{Severity, StatusSink};

/// Renders progress on a single spinner line and prints everything else above it.
#[derive(Debug)]
pub(crate) struct SpinnerSink {
    spinner: ProgressBar,
}

impl SpinnerSink {
    pub(crate) fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));
        Self { spinner }
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl StatusSink for SpinnerSink {
    fn report(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Progress => self.spinner.set_message(message.to_string()),
            other => self.spinner.println(format_line(message, other)),
        }
    }
}

fn format_line(message: &str, severity: Severity) -> String {
    let marker = match severity {
        Severity::Success => "✓",
        Severity::Warning => "!",
        Severity::Error => "✗",
        Severity::Info | Severity::Progress => "·",
    };
    format!("{marker} {message}")
}
