//! End-to-end batch run: probe, decide, filter, encode, segment, publish.

use std::path::PathBuf;
use std::sync::Arc;

use lf_av::FfprobeProber;
use lf_core::config::Profile;
use lf_core::{Catalog, Error, MediaDescriptor, Result, StageError};

use crate::context::RunContext;
use crate::decision::{select_initial, ClientContext, Decision};
use crate::dispatch::dispatch;
use crate::filter::filter_variants;
use crate::manifest::generate_master;
use crate::segment::segment;

/// Summary of a completed run.
#[derive(Debug)]
pub struct PipelineReport {
    pub input_path: PathBuf,
    pub master_manifest: PathBuf,
    /// Starting rendition suggested for the client, when one could be chosen.
    pub initial_decision: Option<Decision>,
    /// Variants encoded successfully.
    pub produced: usize,
    /// Sub-manifests referenced by the master.
    pub manifests: usize,
    /// Per-variant failures from both the encode and segment stages.
    pub errors: Vec<StageError>,
}

impl PipelineReport {
    /// True when no variant failed at any stage.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Probe `profile.input_path` and run every stage against it.
///
/// # Errors
///
/// Any stage-level failure: a missing input, a failed probe, an empty
/// filtered ladder, or a master that cannot be written. When every variant
/// fails to encode, or every encoded variant fails to segment, the result is
/// [`Error::AllVariantsFailed`] carrying each per-variant failure.
pub async fn run_pipeline(
    profile: &Profile,
    ctx: &RunContext,
    client: Option<&ClientContext>,
) -> Result<PipelineReport> {
    profile.validate()?;
    for warning in profile.warnings() {
        ctx.logger.stage("config", &warning);
    }
    if !tokio::fs::try_exists(&profile.input_path).await.unwrap_or(false) {
        return Err(Error::Validation(format!(
            "input file not found: {}",
            profile.input_path.display()
        )));
    }

    let prober = FfprobeProber::from_registry(&ctx.tools)?;
    let descriptor = prober.describe(&profile.input_path).await?;
    ctx.logger.stage(
        "probe",
        &format!(
            "{} {} {:.1}s, {} kbps, keyframe interval {:.2}s",
            descriptor.resolution(),
            descriptor.video_codec,
            descriptor.duration,
            descriptor.bitrate_kbps,
            descriptor.keyframe_interval
        ),
    );

    run_stages(profile, descriptor, ctx, client).await
}

/// Run the stages after probing, against an already extracted descriptor.
pub async fn run_stages(
    profile: &Profile,
    descriptor: MediaDescriptor,
    ctx: &RunContext,
    client: Option<&ClientContext>,
) -> Result<PipelineReport> {
    let logger = ctx.logger.as_ref();
    for warning in &descriptor.warnings {
        logger.stage("probe", &format!("warning: {warning}"));
    }

    let catalog = Catalog::standard();
    let initial_decision = match select_initial(&catalog, descriptor.width, descriptor.height, client) {
        Ok(decision) => {
            logger.stage("decision", &decision.summary());
            Some(decision)
        }
        Err(e) => {
            logger.error("decision", &e);
            None
        }
    };

    let allowed = filter_variants(&profile.variants, descriptor.height, &catalog, logger)?;

    let descriptor = Arc::new(descriptor);
    let encoded = dispatch(profile, Arc::clone(&descriptor), allowed, ctx).await?;
    if encoded.variants.is_empty() {
        return Err(Error::AllVariantsFailed {
            operation: "encode".into(),
            failures: encoded.errors,
        });
    }

    let segments = segment(&encoded, profile.stream_format, &descriptor, ctx).await?;
    if segments.manifests.is_empty() {
        let mut failures = encoded.errors;
        failures.extend(segments.errors);
        return Err(Error::AllVariantsFailed {
            operation: "segment".into(),
            failures,
        });
    }
    let master_manifest = generate_master(&segments, profile.preserve_manifest)?;
    logger.stage("manifest", &format!("Master manifest: {}", master_manifest.display()));

    let produced = encoded.variants.len();
    let manifests = segments.manifests.len();
    let mut errors = encoded.errors;
    errors.extend(segments.errors);

    Ok(PipelineReport {
        input_path: profile.input_path.clone(),
        master_manifest,
        initial_decision,
        produced,
        manifests,
        errors,
    })
}
