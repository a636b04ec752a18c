//! Execution context shared by the concurrent stages of a run.

use std::sync::Arc;
use std::time::Duration;

use lf_av::{ToolRegistry, ENCODE_TIMEOUT, SEGMENT_TIMEOUT};
use lf_core::config::ToolsConfig;
use tokio_util::sync::CancellationToken;

use crate::logger::{PipelineLogger, TracingLogger};

/// Default cadence for per-variant and aggregate progress reports.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Context passed to every stage.
#[derive(Clone)]
pub struct RunContext {
    /// Tool registry for looking up external tool paths.
    pub tools: Arc<ToolRegistry>,
    /// Sink for stage, variant, error, and progress events.
    pub logger: Arc<dyn PipelineLogger>,
    /// Cancelling kills in-flight subprocesses; workers that have not
    /// started record a cancellation failure instead of running.
    pub cancellation: CancellationToken,
    /// Minimum spacing between progress reports.
    pub progress_interval: Duration,
    /// Limit for a single variant's encode before ffmpeg is killed.
    pub encode_timeout: Duration,
    /// Limit for a single variant's segmenting pass.
    pub segment_timeout: Duration,
}

impl RunContext {
    /// Create a new context logging through `tracing`.
    pub fn new(tools: Arc<ToolRegistry>) -> Self {
        Self {
            tools,
            logger: Arc::new(TracingLogger),
            cancellation: CancellationToken::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            encode_timeout: ENCODE_TIMEOUT,
            segment_timeout: SEGMENT_TIMEOUT,
        }
    }

    /// Builder: route events to a different logger.
    pub fn with_logger(mut self, logger: Arc<dyn PipelineLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// Builder: attach a cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Builder: change the progress cadence.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Builder: change the per-variant encode limit.
    pub fn with_encode_timeout(mut self, timeout: Duration) -> Self {
        self.encode_timeout = timeout;
        self
    }

    /// Builder: change the per-variant segmenting limit.
    pub fn with_segment_timeout(mut self, timeout: Duration) -> Self {
        self.segment_timeout = timeout;
        self
    }

    /// Builder: apply the timeout overrides a profile sets under `tools`.
    pub fn with_tool_limits(mut self, config: &ToolsConfig) -> Self {
        if let Some(secs) = config.encode_timeout_secs {
            self.encode_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = config.segment_timeout_secs {
            self.segment_timeout = Duration::from_secs(secs);
        }
        self
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("tools", &self.tools)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("progress_interval", &self.progress_interval)
            .field("encode_timeout", &self.encode_timeout)
            .field("segment_timeout", &self.segment_timeout)
            .finish_non_exhaustive()
    }
}
