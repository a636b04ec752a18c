//! The logging capability shared by every pipeline stage.
//!
//! Stages depend on [`PipelineLogger`] rather than on `tracing` directly so
//! that embedding callers can capture events ([`RecordingLogger`]) or
//! silence them ([`NoopLogger`]).

use std::error::Error as StdError;

use parking_lot::Mutex;

/// Four-operation logging interface used by the pipeline.
pub trait PipelineLogger: Send + Sync {
    /// A stage-level milestone (`encode`, `segment`, `manifest`, ...).
    fn stage(&self, stage: &str, message: &str);
    /// Something that concerns a single variant.
    fn variant(&self, label: &str, message: &str);
    /// A failure, attributed to a stage.
    fn error(&self, stage: &str, error: &dyn StdError);
    /// Completion percentage (0..=100) for a variant, or `overall`.
    fn progress(&self, label: &str, percent: f64);
}

/// Forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl PipelineLogger for TracingLogger {
    fn stage(&self, stage: &str, message: &str) {
        tracing::info!("[{stage}] {message}");
    }

    fn variant(&self, label: &str, message: &str) {
        tracing::info!("[{label}] {message}");
    }

    fn error(&self, stage: &str, error: &dyn StdError) {
        tracing::error!("[{stage}] {error}");
    }

    fn progress(&self, label: &str, percent: f64) {
        tracing::info!("[{label}] [{percent:.0}%]");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl PipelineLogger for NoopLogger {
    fn stage(&self, _stage: &str, _message: &str) {}
    fn variant(&self, _label: &str, _message: &str) {}
    fn error(&self, _stage: &str, _error: &dyn StdError) {}
    fn progress(&self, _label: &str, _percent: f64) {}
}

/// A captured logger event.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEvent {
    Stage { stage: String, message: String },
    Variant { label: String, message: String },
    Error { stage: String, message: String },
    Progress { label: String, percent: f64 },
}

/// Keeps every event in memory, in arrival order.
#[derive(Debug, Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events so far.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().clone()
    }

    /// `(stage, message)` of every recorded error.
    pub fn errors(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LogEvent::Error { stage, message } => Some((stage.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    /// Percentages reported under `label`, in order.
    pub fn progress_for(&self, label: &str) -> Vec<f64> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LogEvent::Progress { label: l, percent } if l == label => Some(*percent),
                _ => None,
            })
            .collect()
    }

    /// Messages logged for a variant label.
    pub fn variant_messages(&self, label: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                LogEvent::Variant { label: l, message } if l == label => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: LogEvent) {
        self.events.lock().push(event);
    }
}

impl PipelineLogger for RecordingLogger {
    fn stage(&self, stage: &str, message: &str) {
        self.push(LogEvent::Stage {
            stage: stage.into(),
            message: message.into(),
        });
    }

    fn variant(&self, label: &str, message: &str) {
        self.push(LogEvent::Variant {
            label: label.into(),
            message: message.into(),
        });
    }

    fn error(&self, stage: &str, error: &dyn StdError) {
        self.push(LogEvent::Error {
            stage: stage.into(),
            message: error.to_string(),
        });
    }

    fn progress(&self, label: &str, percent: f64) {
        self.push(LogEvent::Progress {
            label: label.into(),
            percent,
        });
    }
}
