//! # lf-pipeline
//!
//! Orchestration of the adaptive-bitrate packaging pipeline.
//!
//! This crate provides:
//!
//! - **Decision engine** ([`decision`]) -- pick an initial rendition for a
//!   client and adjust it as bandwidth and playback stability change.
//! - **Variant filter** ([`filter`]) -- drop unknown, upscaling, and duplicate
//!   rungs of a requested ladder.
//! - **[`dispatch`]** -- encode every allowed variant concurrently, isolating
//!   failures and aggregating live progress.
//! - **[`segment`]** -- slice each produced variant into HLS or DASH segments.
//! - **Manifests** ([`manifest`]) -- synthesize or reconcile the top-level
//!   manifest in canonical resolution order.
//! - **[`run_pipeline`]** -- the end-to-end batch run tying the stages
//!   together.
//! - **[`PipelineLogger`]** -- the logging capability every stage reports
//!   through.

pub mod context;
pub mod decision;
pub mod dispatch;
pub mod filter;
pub mod logger;
pub mod manifest;
pub mod pipeline;
pub mod progress;
pub mod result;
pub mod segment;

// Re-export key types at the crate root.
pub use context::RunContext;
pub use decision::{adjust, select_candidates, select_initial, ClientContext, Decision, DeviceClass};
pub use dispatch::dispatch;
pub use filter::filter_variants;
pub use logger::{LogEvent, NoopLogger, PipelineLogger, RecordingLogger, TracingLogger};
pub use manifest::{generate_master, reconcile, synthesize, ManifestEntry};
pub use pipeline::{run_pipeline, run_stages, PipelineReport};
pub use result::{PipelineResult, ProducedVariant, ResultAccumulator, SegmentResult};
pub use segment::segment;
