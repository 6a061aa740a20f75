//! One-way status reporting for download progress and outcomes.
//!
//! Every component reports through a [`StatusSink`]. Sinks are fire-and-forget:
//! they return nothing and must not block the caller for any meaningful time,
//! since they are invoked from whichever task happens to be running the request.

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Severity tag attached to every status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// General information about what is happening.
    Info,
    /// Byte or percentage progress of an active transfer.
    Progress,
    /// A download completed.
    Success,
    /// Degradation or recoverable failure.
    Warning,
    /// Terminal failure or actionable guidance.
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Info => "info",
            Self::Progress => "progress",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(tag)
    }
}

/// Receiver of `(message, severity)` pairs.
pub trait StatusSink: Send + Sync {
    /// Reports a status message. Must not block.
    fn report(&self, message: &str, severity: Severity);
}

impl<F> StatusSink for F
where
    F: Fn(&str, Severity) + Send + Sync,
{
    fn report(&self, message: &str, severity: Severity) {
        self(message, severity);
    }
}

/// Sink that forwards messages to `tracing` at a level matching the severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatusSink for TracingSink {
    fn report(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Progress => debug!(target: "mediadl::status", %severity, "{message}"),
            Severity::Info | Severity::Success => {
                info!(target: "mediadl::status", %severity, "{message}");
            }
            Severity::Warning => warn!(target: "mediadl::status", %severity, "{message}"),
            Severity::Error => error!(target: "mediadl::status", %severity, "{message}"),
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl StatusSink for NullSink {
    fn report(&self, _message: &str, _severity: Severity) {}
}

/// A status message captured by [`ChannelSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub message: String,
    pub severity: Severity,
}

/// Sink that pushes events into an unbounded channel for a UI task to drain.
///
/// Sends never block; if the receiver is gone the event is dropped.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSink {
    /// Creates a sink together with the receiving half of its channel.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl StatusSink for ChannelSink {
    fn report(&self, message: &str, severity: Severity) {
        // Receiver dropped means nobody is listening anymore.
        let _ = self.tx.send(StatusEvent {
            message: message.to_string(),
            severity,
        });
    }
}
