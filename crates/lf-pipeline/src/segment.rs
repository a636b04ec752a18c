//! Concurrent segmentation of encoded variants into HLS or DASH.

use std::path::PathBuf;
use std::sync::Arc;

use lf_av::{effective_segment_duration, SegmentSpec, ToolCommand};
use lf_core::{Error, MediaDescriptor, Result, Stage, StageError, StreamFormat};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::logger::PipelineLogger;
use crate::result::{PipelineResult, ProducedVariant, ResultAccumulator, SegmentResult};

const STAGE: &str = "segment";

/// Segment every produced variant of `result` into `<run_dir>/<label>/`.
///
/// The segment length is the profile's value, else the source keyframe
/// interval rounded to whole seconds, else 4 s. Variants fail
/// independently; each failure is recorded in [`SegmentResult::errors`].
///
/// # Errors
///
/// [`Error::Validation`] when `result` holds no variants, [`Error::Tool`]
/// when ffmpeg is unavailable, and [`Error::Cancelled`] on cancellation.
pub async fn segment(
    result: &PipelineResult,
    format: StreamFormat,
    descriptor: &MediaDescriptor,
    ctx: &RunContext,
) -> Result<SegmentResult> {
    if result.variants.is_empty() {
        return Err(Error::Validation("no encoded variants to segment".into()));
    }

    let mut ffmpeg = ctx.tools.command("ffmpeg")?;
    ffmpeg.timeout(ctx.segment_timeout);
    let segment_secs = effective_segment_duration(result.segment_length, descriptor.keyframe_interval);
    ctx.logger.stage(
        STAGE,
        &format!(
            "Segmenting {} variants as {format} with {segment_secs}s segments",
            result.variants.len()
        ),
    );

    let accumulator: Arc<ResultAccumulator<String, PathBuf>> = Arc::new(ResultAccumulator::new());
    let mut tasks = JoinSet::new();
    for variant in &result.variants {
        let job = SegmentJob {
            variant: variant.clone(),
            run_dir: result.output_dir.clone(),
            format,
            segment_secs,
            keyframe_interval: descriptor.keyframe_interval,
            ffmpeg: ffmpeg.clone(),
        };
        tasks.spawn(job.run(
            Arc::clone(&accumulator),
            Arc::clone(&ctx.logger),
            ctx.cancellation.clone(),
        ));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            let err = StageError::new(
                Stage::Segment,
                "join",
                &result.output_dir,
                &result.output_dir,
                format!("segment task aborted: {e}"),
            );
            ctx.logger.error(STAGE, &err);
            accumulator.record_failure(err);
        }
    }

    if ctx.cancellation.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let accumulator = Arc::try_unwrap(accumulator)
        .map_err(|_| Error::Internal("segment accumulator still shared after join".into()))?;
    let (success, mut manifests, errors) = accumulator.into_parts();
    manifests.sort();

    ctx.logger.stage(
        STAGE,
        &format!("{} sub-manifests written, {} failed", manifests.len(), errors.len()),
    );

    Ok(SegmentResult {
        output_dir: result.output_dir.clone(),
        format,
        success,
        manifests,
        errors,
    })
}

struct SegmentJob {
    variant: ProducedVariant,
    run_dir: PathBuf,
    format: StreamFormat,
    segment_secs: u32,
    keyframe_interval: f64,
    ffmpeg: ToolCommand,
}

impl SegmentJob {
    async fn run(
        self,
        accumulator: Arc<ResultAccumulator<String, PathBuf>>,
        logger: Arc<dyn PipelineLogger>,
        cancel: CancellationToken,
    ) {
        let label = self.variant.segment_label();
        let input = self.run_dir.join(&self.variant.output_filename);
        let dir = self.run_dir.join(&label);

        if !accumulator.claim(label.clone()) {
            logger.variant(&label, "Already segmented; skipping");
            return;
        }

        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            let err = StageError::new(Stage::Filesystem, "mkdir", &input, &dir, e.to_string())
                .with_source(e.into());
            logger.error(STAGE, &err);
            accumulator.record_failure(err);
            return;
        }

        let spec = SegmentSpec {
            input: input.clone(),
            output_dir: dir,
            label: label.clone(),
            format: self.format,
            segment_secs: self.segment_secs,
            keyframe_interval: self.keyframe_interval,
        };
        let manifest = spec.manifest_path();

        let mut cmd = self.ffmpeg;
        cmd.args(spec.to_args());
        let argv = cmd.argv();
        tracing::debug!("[{label}] {}", argv.join(" "));

        let outcome = cmd
            .execute_with_stderr_callback(
                |line| tracing::trace!("[{label}] {line}"),
                Some(cancel),
            )
            .await;

        match outcome {
            Ok(_) => {
                logger.variant(&label, &format!("Wrote {}", manifest.display()));
                accumulator.record_success(manifest);
            }
            Err(e) => {
                let err = StageError::new(Stage::Segment, "segment", &input, &manifest, e.to_string())
                    .with_command(argv)
                    .with_source(e);
                logger.error(STAGE, &err);
                accumulator.record_failure(err);
            }
        }
    }
}
