//! Error types for the ladderforge crates.
//!
//! Stage-level failures are returned as [`Error`]. Failures of a single
//! variant inside a concurrent stage never propagate as the call's own error;
//! they are captured as [`StageError`] records carrying enough context
//! (stage, operation, paths, argv, exit code) to replay the failing command.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unified error type covering all failure modes in ladderforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A profile field is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input failed validation (empty ladder, no manifests, bad label).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool could not be spawned, timed out, or its pipes broke.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// An external tool ran to completion with a non-zero exit status.
    #[error("Tool error [{tool}]: exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| format!("code {c}")))]
    ToolExit {
        /// Name of the tool that failed.
        tool: String,
        /// Exit code, or `None` when the process was killed by a signal.
        code: Option<i32>,
        /// Tail of the captured diagnostic output.
        stderr: String,
    },

    /// Media probing failed.
    #[error("Probe error: {0}")]
    Probe(String),

    /// Structured output from a tool or an existing manifest was malformed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// No catalog preset qualifies and the catalog has no usable default.
    #[error("No suitable rendition: {0}")]
    NoSuitableRendition(String),

    /// Writing or reading a manifest failed.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// A concurrent stage left nothing to publish. Carries every per-variant
    /// failure of the run so far.
    #[error("Every variant failed to {operation} ({} failures)", .failures.len())]
    AllVariantsFailed {
        /// The stage operation no variant got through, e.g. `encode`.
        operation: String,
        failures: Vec<StageError>,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Execution,
    Filesystem,
    Parse,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Configuration,
            Error::Validation(_) | Error::NoSuitableRendition(_) => ErrorKind::Validation,
            Error::Io { .. } => ErrorKind::Filesystem,
            Error::Tool { .. }
            | Error::ToolExit { .. }
            | Error::AllVariantsFailed { .. }
            | Error::Cancelled
            | Error::Internal(_) => ErrorKind::Execution,
            Error::Probe(_) | Error::Parse(_) | Error::Manifest(_) => ErrorKind::Parse,
        }
    }

    /// Whether re-running the same operation could plausibly succeed.
    ///
    /// Configuration and validation errors, including a catalog with no
    /// usable default, are terminal.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Io { .. } | Error::Tool { .. } | Error::ToolExit { .. }
        )
    }

    /// The external tool's exit code, if this error carries one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::ToolExit { code, .. } => *code,
            _ => None,
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

// ---------------------------------------------------------------------------
// Per-variant stage errors
// ---------------------------------------------------------------------------

/// The pipeline stage a [`StageError`] was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Validation,
    Filesystem,
    Execution,
    Segment,
    Manifest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Validation => "validation",
            Stage::Filesystem => "filesystem",
            Stage::Execution => "execution",
            Stage::Segment => "segment",
            Stage::Manifest => "manifest",
        };
        f.write_str(s)
    }
}

/// A failure isolated to a single variant.
#[derive(Debug, thiserror::Error)]
#[error("[{stage}] {operation} failed ({} -> {}): {message}", .input.display(), .output.display())]
pub struct StageError {
    pub stage: Stage,
    /// Operation within the stage, e.g. `transcode`, `copy`, `mkdir`.
    pub operation: String,
    pub input: PathBuf,
    pub output: PathBuf,
    /// Attempted argv, program first. Empty for non-subprocess failures.
    pub command: Vec<String>,
    pub exit_code: Option<i32>,
    pub message: String,
    #[source]
    pub source: Option<Error>,
}

impl StageError {
    pub fn new(
        stage: Stage,
        operation: impl Into<String>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            operation: operation.into(),
            input: input.into(),
            output: output.into(),
            command: Vec::new(),
            exit_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// Builder: record the attempted command line.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Builder: wrap the underlying cause, lifting its exit code if any.
    pub fn with_source(mut self, source: Error) -> Self {
        if self.exit_code.is_none() {
            self.exit_code = source.exit_code();
        }
        self.source = Some(source);
        self
    }

    /// The attempted command as a single shell-like line.
    pub fn command_line(&self) -> String {
        self.command
            .iter()
            .map(|a| {
                if a.is_empty() || a.contains(char::is_whitespace) {
                    format!("'{a}'")
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_variants_failed_keeps_each_failure() {
        let failure = StageError::new(Stage::Segment, "segment", "a.mp4", "a/a.m3u8", "boom")
            .with_command(vec!["ffmpeg".into(), "-i".into(), "a.mp4".into()])
            .with_source(Error::ToolExit {
                tool: "ffmpeg".into(),
                code: Some(3),
                stderr: "boom".into(),
            });
        let err = Error::AllVariantsFailed {
            operation: "segment".into(),
            failures: vec![failure],
        };
        assert_eq!(err.to_string(), "Every variant failed to segment (1 failures)");
        assert_eq!(err.kind(), ErrorKind::Execution);
        let Error::AllVariantsFailed { failures, .. } = err else {
            unreachable!()
        };
        assert_eq!(failures[0].exit_code, Some(3));
        assert_eq!(failures[0].command_line(), "ffmpeg -i a.mp4");
    }

    #[test]
    fn config_display() {
        let err = Error::Config("video_codec is required".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: video_codec is required"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!err.is_retriable());
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "failed to spawn: not found");
        assert_eq!(
            err.to_string(),
            "Tool error [ffmpeg]: failed to spawn: not found"
        );
        assert_eq!(err.kind(), ErrorKind::Execution);
    }

    #[test]
    fn tool_exit_carries_code() {
        let err = Error::ToolExit {
            tool: "ffmpeg".into(),
            code: Some(1),
            stderr: "Invalid argument".into(),
        };
        assert_eq!(
            err.to_string(),
            "Tool error [ffmpeg]: exited with code 1: Invalid argument"
        );
        assert_eq!(err.exit_code(), Some(1));
        assert!(err.is_retriable());
    }

    #[test]
    fn tool_exit_by_signal() {
        let err = Error::ToolExit {
            tool: "ffmpeg".into(),
            code: None,
            stderr: String::new(),
        };
        assert!(err.to_string().contains("exited with signal"));
    }

    #[test]
    fn no_suitable_rendition_is_terminal() {
        let err = Error::NoSuitableRendition("catalog has no default".into());
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retriable());
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.kind(), ErrorKind::Filesystem);
    }

    #[test]
    fn stage_error_lifts_exit_code() {
        let err = StageError::new(
            Stage::Execution,
            "transcode",
            "/in/movie.mp4",
            "/out/movie_720p_3000k.mp4",
            "ffmpeg failed",
        )
        .with_command(vec!["ffmpeg".into(), "-i".into(), "/in/movie.mp4".into()])
        .with_source(Error::ToolExit {
            tool: "ffmpeg".into(),
            code: Some(183),
            stderr: String::new(),
        });

        assert_eq!(err.exit_code, Some(183));
        assert_eq!(err.command_line(), "ffmpeg -i /in/movie.mp4");
        assert_eq!(
            err.to_string(),
            "[execution] transcode failed (/in/movie.mp4 -> /out/movie_720p_3000k.mp4): ffmpeg failed"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn command_line_quotes_whitespace() {
        let err = StageError::new(Stage::Segment, "segment", "a", "b", "x")
            .with_command(vec!["ffmpeg".into(), "/my movies/a.mp4".into()]);
        assert_eq!(err.command_line(), "ffmpeg '/my movies/a.mp4'");
    }

    #[test]
    fn stage_display_lowercase() {
        assert_eq!(Stage::Filesystem.to_string(), "filesystem");
        assert_eq!(Stage::Segment.to_string(), "segment");
    }
}
