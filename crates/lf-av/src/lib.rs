//! # lf-av
//!
//! External media tool plumbing for the ladderforge pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   cancellation, and line-by-line stderr streaming.
//! - **Descriptor extraction** ([`FfprobeProber`]) -- map ffprobe JSON into
//!   [`lf_core::MediaDescriptor`], including keyframe timestamps.
//! - **Argument builders** ([`encode`], [`segment`]) -- ffmpeg invocations
//!   for scaling a rendition and slicing it into HLS or DASH segments.
//! - **Progress parsing** ([`progress`]) -- turn ffmpeg diagnostic lines into
//!   completion percentages.

pub mod command;
pub mod encode;
pub mod probe;
pub mod progress;
pub mod segment;
pub mod tools;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use encode::{EncodeSpec, HwAccel, ENCODE_TIMEOUT};
pub use probe::FfprobeProber;
pub use progress::{ProgressParser, Throttle};
pub use segment::{effective_segment_duration, SegmentSpec, SEGMENT_TIMEOUT};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
