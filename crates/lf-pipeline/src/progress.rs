//! Aggregate progress across concurrently running variants.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::logger::PipelineLogger;

/// Label under which the averaged figure is reported.
pub const OVERALL_LABEL: &str = "overall";

/// Label to percent map written by workers and sampled by the reporter.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    entries: Mutex<BTreeMap<String, f64>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variant at 0%.
    pub fn track(&self, label: &str) {
        self.entries.lock().entry(label.to_string()).or_insert(0.0);
    }

    pub fn update(&self, label: &str, percent: f64) {
        self.entries
            .lock()
            .insert(label.to_string(), percent.clamp(0.0, 100.0));
    }

    /// Stop tracking a variant that will make no further progress.
    pub fn forget(&self, label: &str) {
        self.entries.lock().remove(label);
    }

    /// Mean across tracked variants, or `None` before any is tracked.
    pub fn average(&self) -> Option<f64> {
        let entries = self.entries.lock();
        if entries.is_empty() {
            return None;
        }
        Some(entries.values().sum::<f64>() / entries.len() as f64)
    }
}

/// Spawn a task that logs the board's average every `interval` until `done`
/// is cancelled.
pub fn spawn_reporter(
    board: Arc<ProgressBoard>,
    logger: Arc<dyn PipelineLogger>,
    interval: Duration,
    done: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + interval;
        let mut ticker = tokio::time::interval_at(start, interval);
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(avg) = board.average() {
                        logger.progress(OVERALL_LABEL, avg);
                    }
                }
            }
        }
    })
}
