//! Concurrent encode dispatch.
//!
//! Every allowed variant gets its own tokio task. Tasks share nothing but
//! the [`ResultAccumulator`] (deduplication, successes, failures) and the
//! [`ProgressBoard`]; a failing variant is recorded and never stops its
//! siblings.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lf_av::{effective_segment_duration, EncodeSpec, HwAccel, ProgressParser, Throttle, ToolCommand};
use lf_core::config::{Profile, RequestedVariant, VariantKey};
use lf_core::{Error, MediaDescriptor, Result, ScalePolicy, Stage, StageError};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::context::RunContext;
use crate::logger::PipelineLogger;
use crate::progress::{spawn_reporter, ProgressBoard};
use crate::result::{PipelineResult, ProducedVariant, ResultAccumulator};

const STAGE: &str = "encode";

/// Written next to the variants for downstream tooling.
#[derive(Debug, Serialize)]
struct RunMetadata {
    duration: f64,
    segment_length: u32,
}

/// State shared by every encode task of one dispatch.
struct Shared {
    input: PathBuf,
    run_dir: PathBuf,
    slug: String,
    container: String,
    video_codec: String,
    audio_codec: String,
    hw_accel: Option<HwAccel>,
    keyframe_every: u32,
    ffmpeg: ToolCommand,
    descriptor: Arc<MediaDescriptor>,
    accumulator: Arc<ResultAccumulator<VariantKey, ProducedVariant>>,
    board: Arc<ProgressBoard>,
    logger: Arc<dyn PipelineLogger>,
    cancel: CancellationToken,
    progress_interval: Duration,
}

/// Encode `allowed` concurrently into `<output_dir>/<slug>/`.
///
/// Per-variant failures land in [`PipelineResult::errors`] and clear
/// [`PipelineResult::success`]; the call itself only fails on stage setup
/// problems or cancellation.
///
/// # Errors
///
/// - [`Error::Validation`] if the input file does not exist.
/// - [`Error::Io`] if the run directory cannot be created.
/// - [`Error::Tool`] if ffmpeg is not available.
/// - [`Error::Cancelled`] if the run was cancelled.
pub async fn dispatch(
    profile: &Profile,
    descriptor: Arc<MediaDescriptor>,
    allowed: Vec<RequestedVariant>,
    ctx: &RunContext,
) -> Result<PipelineResult> {
    if !tokio::fs::try_exists(&profile.input_path).await.unwrap_or(false) {
        return Err(Error::Validation(format!(
            "input file not found: {}",
            profile.input_path.display()
        )));
    }

    let run_dir = profile.run_dir();
    tokio::fs::create_dir_all(&run_dir).await?;
    write_metadata(&run_dir, &descriptor, profile.segment_length, ctx.logger.as_ref()).await;

    let mut ffmpeg = ctx.tools.command("ffmpeg")?;
    ffmpeg.timeout(ctx.encode_timeout);
    let hw_accel = HwAccel::resolve(profile.use_hw_accel, profile.hw_accel.as_deref());
    if let Some(hw) = hw_accel {
        ctx.logger.stage(STAGE, &format!("Hardware acceleration: {hw}"));
    }

    let board = Arc::new(ProgressBoard::new());
    let accumulator = Arc::new(ResultAccumulator::new());
    let shared = Arc::new(Shared {
        input: profile.input_path.clone(),
        run_dir: run_dir.clone(),
        slug: profile.slug(),
        container: profile.container.clone(),
        video_codec: profile.video_codec.clone(),
        audio_codec: profile.audio_codec.clone(),
        hw_accel,
        keyframe_every: effective_segment_duration(
            profile.segment_length,
            descriptor.keyframe_interval,
        ),
        ffmpeg,
        descriptor: Arc::clone(&descriptor),
        accumulator: Arc::clone(&accumulator),
        board: Arc::clone(&board),
        logger: Arc::clone(&ctx.logger),
        cancel: ctx.cancellation.clone(),
        progress_interval: ctx.progress_interval,
    });

    ctx.logger.stage(
        STAGE,
        &format!(
            "Encoding {} variants of {} into {}",
            allowed.len(),
            profile.input_path.display(),
            run_dir.display()
        ),
    );

    let done = CancellationToken::new();
    let reporter = spawn_reporter(
        Arc::clone(&board),
        Arc::clone(&ctx.logger),
        ctx.progress_interval,
        done.clone(),
    );

    let mut tasks = JoinSet::new();
    for variant in allowed {
        tasks.spawn(encode_variant(Arc::clone(&shared), variant));
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            let err = StageError::new(
                Stage::Execution,
                "join",
                &profile.input_path,
                &run_dir,
                format!("encode task aborted: {e}"),
            );
            ctx.logger.error(STAGE, &err);
            accumulator.record_failure(err);
        }
    }

    done.cancel();
    if let Err(e) = reporter.await {
        tracing::debug!("Progress reporter ended abnormally: {e}");
    }
    drop(shared);

    if ctx.cancellation.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let accumulator = Arc::try_unwrap(accumulator)
        .map_err(|_| Error::Internal("encode accumulator still shared after join".into()))?;
    let (success, variants, errors) = accumulator.into_parts();

    ctx.logger.stage(
        STAGE,
        &format!("{} variants encoded, {} failed", variants.len(), errors.len()),
    );

    Ok(PipelineResult {
        input_path: profile.input_path.clone(),
        output_dir: run_dir,
        duration: descriptor.duration,
        segment_length: profile.segment_length,
        success,
        variants,
        errors,
    })
}

async fn write_metadata(
    run_dir: &std::path::Path,
    descriptor: &MediaDescriptor,
    segment_length: u32,
    logger: &dyn PipelineLogger,
) {
    let metadata = RunMetadata {
        duration: descriptor.duration,
        segment_length,
    };
    let path = run_dir.join("metadata.json");
    let written = match serde_json::to_vec_pretty(&metadata) {
        Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(Error::from),
        Err(e) => Err(Error::Internal(format!("serialize run metadata: {e}"))),
    };
    if let Err(e) = written {
        logger.error(STAGE, &e);
    }
}

async fn encode_variant(shared: Arc<Shared>, variant: RequestedVariant) {
    let key = variant.key();
    let label = key.to_string();
    let logger = shared.logger.as_ref();

    if !shared.accumulator.claim(key.clone()) {
        logger.variant(&label, "Duplicate variant; skipping");
        return;
    }

    let filename = format!(
        "{}_{}_{}.{}",
        shared.slug, key.label, variant.bitrate, shared.container
    );
    let output = shared.run_dir.join(&filename);

    if shared.cancel.is_cancelled() {
        let err = StageError::new(
            Stage::Execution,
            "transcode",
            &shared.input,
            &output,
            "cancelled before start",
        )
        .with_source(Error::Cancelled);
        shared.accumulator.record_failure(err);
        return;
    }

    let source = (shared.descriptor.width, shared.descriptor.height);
    let (width, height, scale_policy) = match variant.rendition() {
        Some(r) if r.dimensions() == source => (r.width(), r.height(), ScalePolicy::Passthrough),
        Some(r) => (r.width(), r.height(), ScalePolicy::Auto),
        None => {
            logger.variant(
                &label,
                &format!(
                    "Unknown resolution '{}'; encoding at source size {}x{}",
                    variant.resolution, source.0, source.1
                ),
            );
            (source.0, source.1, ScalePolicy::Skip)
        }
    };

    shared.board.track(&label);
    let outcome = match scale_policy {
        ScalePolicy::Passthrough => {
            logger.variant(&label, "Source matches target; copying");
            copy_source(&shared, &output).await
        }
        ScalePolicy::Auto | ScalePolicy::Skip => {
            let spec = EncodeSpec {
                input: shared.input.clone(),
                output: output.clone(),
                video_codec: shared.video_codec.clone(),
                audio_codec: shared.audio_codec.clone(),
                bitrate: variant.bitrate,
                scale_height: (scale_policy == ScalePolicy::Auto).then_some(height),
                hw_accel: shared.hw_accel,
                keyframe_every: Some(shared.keyframe_every),
            };
            logger.variant(&label, &format!("Encoding {width}x{height} with {}", spec.encoder()));
            transcode(&shared, &label, spec).await
        }
    };

    match outcome {
        Ok(()) => {
            shared.board.update(&label, 100.0);
            logger.progress(&label, 100.0);
            logger.variant(&label, &format!("Wrote {filename}"));
            shared.accumulator.record_success(ProducedVariant {
                label: key.label,
                width,
                height,
                bitrate: variant.bitrate,
                scale_policy,
                output_filename: filename,
            });
        }
        Err(err) => {
            shared.board.forget(&label);
            logger.error(STAGE, &err);
            shared.accumulator.record_failure(err);
        }
    }
}

async fn copy_source(shared: &Shared, output: &std::path::Path) -> std::result::Result<(), StageError> {
    tokio::fs::copy(&shared.input, output)
        .await
        .map(|_| ())
        .map_err(|e| {
            StageError::new(Stage::Filesystem, "copy", &shared.input, output, e.to_string())
                .with_source(e.into())
        })
}

async fn transcode(shared: &Shared, label: &str, spec: EncodeSpec) -> std::result::Result<(), StageError> {
    let mut cmd = shared.ffmpeg.clone();
    cmd.args(spec.to_args());
    let argv = cmd.argv();
    tracing::debug!("[{label}] {}", argv.join(" "));

    let mut parser = ProgressParser::new(shared.descriptor.duration);
    let mut throttle = Throttle::new(shared.progress_interval);
    let board = shared.board.as_ref();
    let logger = shared.logger.as_ref();

    let result = cmd
        .execute_with_stderr_callback(
            |line| {
                if let Some(pct) = parser.feed(line) {
                    board.update(label, pct);
                    if throttle.ready(Instant::now(), pct >= 100.0) {
                        logger.progress(label, pct);
                    }
                }
            },
            Some(shared.cancel.clone()),
        )
        .await;

    result.map(|_| ()).map_err(|e| {
        StageError::new(Stage::Execution, "transcode", &spec.input, &spec.output, e.to_string())
            .with_command(argv)
            .with_source(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::RecordingLogger;
    use lf_av::ToolRegistry;
    use lf_core::Bitrate;

    fn variant(label: &str, kbps: u32) -> RequestedVariant {
        RequestedVariant::new(label, Bitrate::from_kbps(kbps).unwrap())
    }

    fn profile(input: PathBuf, output_dir: PathBuf) -> Profile {
        let json = serde_json::json!({
            "input_path": input,
            "output_dir": output_dir,
            "video_codec": "libx264",
            "segment_length": 4,
        });
        Profile::from_json(&json.to_string()).unwrap()
    }

    fn descriptor(width: u32, height: u32) -> Arc<MediaDescriptor> {
        Arc::new(MediaDescriptor {
            width,
            height,
            duration: 10.0,
            ..MediaDescriptor::default()
        })
    }

    fn context(ffmpeg: &str, log: Arc<RecordingLogger>) -> RunContext {
        let mut tools = ToolRegistry::default();
        tools.insert("ffmpeg", PathBuf::from(ffmpeg));
        RunContext::new(Arc::new(tools))
            .with_logger(log)
            .with_progress_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn missing_input_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let p = profile(dir.path().join("absent.mp4"), dir.path().join("out"));
        let ctx = context("/nonexistent/ffmpeg", Arc::new(RecordingLogger::new()));
        let err = dispatch(&p, descriptor(1920, 1080), vec![variant("720p", 3000)], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn passthrough_copies_source() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"not really video").unwrap();
        let p = profile(input, dir.path().join("out"));
        let log = Arc::new(RecordingLogger::new());
        let ctx = context("/nonexistent/ffmpeg", log.clone());

        let result = dispatch(&p, descriptor(1280, 720), vec![variant("720p", 3000)], &ctx)
            .await
            .unwrap();

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.variants.len(), 1);
        let produced = &result.variants[0];
        assert_eq!(produced.scale_policy, ScalePolicy::Passthrough);
        assert_eq!(produced.output_filename, "clip_720p_3000k.mp4");
        let copied = std::fs::read(dir.path().join("out/clip").join(&produced.output_filename)).unwrap();
        assert_eq!(copied, b"not really video");

        let metadata: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("out/clip/metadata.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata["segment_length"], 4);
        assert_eq!(log.progress_for("720p_3000k").last(), Some(&100.0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_encoder_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"x").unwrap();
        let p = profile(input, dir.path().join("out"));
        let log = Arc::new(RecordingLogger::new());
        let ctx = context("/bin/false", log.clone());

        let result = dispatch(
            &p,
            descriptor(1920, 1080),
            vec![variant("1080p", 5000), variant("720p", 3000), variant("480p", 1500)],
            &ctx,
        )
        .await
        .unwrap();

        assert!(!result.success);
        assert_eq!(result.variants.len(), 1);
        assert_eq!(result.variants[0].scale_policy, ScalePolicy::Passthrough);
        assert_eq!(result.errors.len(), 2);
        for err in &result.errors {
            assert_eq!(err.stage, Stage::Execution);
            assert_eq!(err.operation, "transcode");
            assert_eq!(err.exit_code, Some(1));
            assert_eq!(err.command.first().map(String::as_str), Some("/bin/false"));
            assert!(err.command.iter().any(|a| a == "-b:v"));
        }
        assert_eq!(log.errors().len(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn duplicates_and_unknown_labels() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"x").unwrap();
        let p = profile(input, dir.path().join("out"));
        let log = Arc::new(RecordingLogger::new());
        let ctx = context("/bin/true", log.clone());

        let result = dispatch(
            &p,
            descriptor(1920, 1080),
            vec![variant("720p", 3000), variant("720P", 3000), variant("999p", 800)],
            &ctx,
        )
        .await
        .unwrap();

        assert!(result.success);
        assert_eq!(result.variants.len(), 2);
        let unknown = result
            .variants
            .iter()
            .find(|v| v.label == "999p")
            .unwrap();
        assert_eq!(unknown.scale_policy, ScalePolicy::Skip);
        assert_eq!((unknown.width, unknown.height), (1920, 1080));
        assert!(log
            .variant_messages("720p_3000k")
            .iter()
            .any(|m| m.contains("Duplicate")));
    }

    /// An encoder that sleeps, then writes its output file.
    #[cfg(unix)]
    fn slow_encoder(dir: &std::path::Path, secs: f32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("slow-ffmpeg");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep {secs}\nfor last; do :; done\n: > \"$last\"\n"),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    #[tokio::test(start_paused = true)]
    async fn encode_outlasts_five_minutes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("feature.mp4");
        std::fs::write(&input, b"x").unwrap();
        let p = profile(input, dir.path().join("out"));
        let script = slow_encoder(dir.path(), 1.0);
        let ctx = context(script.to_str().unwrap(), Arc::new(RecordingLogger::new()))
            .with_progress_interval(Duration::from_secs(2));
        let source = Arc::new(MediaDescriptor {
            width: 1920,
            height: 1080,
            duration: 7200.0,
            ..MediaDescriptor::default()
        });

        // Keep the runtime busy so the paused clock only moves when told to,
        // then jump it past five minutes while ffmpeg is still running.
        let work = dispatch(&p, source, vec![variant("720p", 3000)], &ctx);
        tokio::pin!(work);
        let started = std::time::Instant::now();
        let mut jumped = false;
        let result = loop {
            tokio::select! {
                biased;
                r = &mut work => break r.unwrap(),
                _ = tokio::task::yield_now() => {
                    if !jumped && started.elapsed() > std::time::Duration::from_millis(300) {
                        tokio::time::advance(Duration::from_secs(301)).await;
                        jumped = true;
                    }
                }
            }
        };

        assert!(jumped);
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.variants.len(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn configured_encode_timeout_kills_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"x").unwrap();
        let p = profile(input, dir.path().join("out"));
        let script = slow_encoder(dir.path(), 5.0);
        let ctx = context(script.to_str().unwrap(), Arc::new(RecordingLogger::new()))
            .with_encode_timeout(Duration::from_millis(200));

        let result = dispatch(&p, descriptor(1920, 1080), vec![variant("720p", 3000)], &ctx)
            .await
            .unwrap();

        assert!(!result.success);
        let err = &result.errors[0];
        assert_eq!(err.stage, Stage::Execution);
        assert_eq!(err.exit_code, None);
        assert!(err.message.contains("timed out"), "{}", err.message);
    }

    #[tokio::test]
    async fn cancelled_run_reports_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"x").unwrap();
        let p = profile(input, dir.path().join("out"));
        let ctx = context("/nonexistent/ffmpeg", Arc::new(RecordingLogger::new()));
        ctx.cancellation.cancel();

        let err = dispatch(&p, descriptor(1920, 1080), vec![variant("720p", 3000)], &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
