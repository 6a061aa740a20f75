//! Shared helpers for integration tests: a scripted engine and a recording sink.
//!
//! Both can write into a shared [`Journal`] so tests can assert the relative
//! order of status messages and engine invocations.

#![allow(dead_code)]

pub mod socket_guard;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mediadl_core::engine::OutputName;
use mediadl_core::{ConfigProfile, EngineFailure, FetchEngine, FetchJob, Severity, StatusSink};

/// Interleaved log of engine calls (`engine:<profile>`) and sink messages (`<severity>:<message>`).
pub type Journal = Arc<Mutex<Vec<String>>>;

#[must_use]
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub url: String,
    pub output_name: Option<String>,
    pub profile: ConfigProfile,
}

/// Replays scripted results in order; unscripted calls fail with an unknown error.
///
/// With [`ScriptedEngine::with_output`], successful calls that name their
/// output file also write it, as a real engine would.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<(), String>>>,
    calls: Mutex<Vec<RecordedCall>>,
    journal: Option<Journal>,
    output: Option<Vec<u8>>,
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
            journal: None,
            output: None,
        }
    }

    #[must_use]
    pub fn with_output(mut self, bytes: &[u8]) -> Self {
        self.output = Some(bytes.to_vec());
        self
    }

    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FetchEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch(&self, job: &FetchJob<'_>) -> Result<(), EngineFailure> {
        if let Some(journal) = &self.journal {
            journal
                .lock()
                .unwrap()
                .push(format!("engine:{}", job.profile.name));
        }
        self.calls.lock().unwrap().push(RecordedCall {
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
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err("scripted engine ran out of responses".to_string()));
        if step.is_ok()
            && let (Some(bytes), OutputName::Fixed(name)) = (&self.output, job.output_name)
        {
            std::fs::write(job.output_dir.join(name), bytes).unwrap();
        }
        step.map_err(EngineFailure::new)
    }
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(String, Severity)>>,
    journal: Option<Journal>,
}

impl RecordingSink {
    #[must_use]
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            journal: Some(journal),
        }
    }

    pub fn events(&self) -> Vec<(String, Severity)> {
        self.events.lock().unwrap().clone()
    }

    pub fn has(&self, severity: Severity, needle: &str) -> bool {
        self.events()
            .iter()
            .any(|(message, s)| *s == severity && message.contains(needle))
    }
}

impl StatusSink for RecordingSink {
    fn report(&self, message: &str, severity: Severity) {
        if let Some(journal) = &self.journal {
            journal
                .lock()
                .unwrap()
                .push(format!("{severity}:{message}"));
        }
        self.events
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
    }
}
