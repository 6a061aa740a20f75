//! Shared helpers for unit tests.

pub mod socket_guard;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::engine::{EngineFailure, FetchEngine, FetchJob, OutputName};
use crate::profile::ConfigProfile;
use crate::status::{Severity, StatusSink};

/// One observed engine invocation.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub output_name: Option<String>,
    pub profile: ConfigProfile,
}

/// Engine that replays scripted results in order and records every call.
///
/// Once the script runs out every further call fails with an unknown error.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<(), String>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedEngine {
    pub fn new(script: impl IntoIterator<Item = Result<(), &'static str>>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|step| step.map_err(str::to_string))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl FetchEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), EngineFailure> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                url: job.url.to_string(),
                output_name: match job.output_name {
                    OutputName::EngineDefault => None,
                    OutputName::Fixed(name) => Some(name.to_string()),
                },
                profile: job.profile.clone(),
            });
        let step = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err("scripted engine ran out of responses".to_string()));
        step.map_err(EngineFailure::new)
    }
}

/// Sink that keeps every message for later assertions.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Severity)>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<(String, Severity)> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn has(&self, severity: Severity, needle: &str) -> bool {
        self.events()
            .iter()
            .any(|(message, s)| *s == severity && message.contains(needle))
    }
}

impl StatusSink for RecordingSink {
    fn report(&self, message: &str, severity: Severity) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((message.to_string(), severity));
    }
}
