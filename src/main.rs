mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use lf_av::{FfprobeProber, ToolRegistry};
use lf_core::config::{Profile, ToolsConfig};
use lf_core::{Catalog, StageError, StreamFormat};
use lf_pipeline::{
    adjust, run_pipeline, select_candidates, select_initial, ClientContext, RunContext,
};
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "ladderforge=debug,lf_pipeline=debug,lf_av=debug,lf_core=info".to_string()
        } else {
            "ladderforge=info,lf_pipeline=info,lf_av=warn,lf_core=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            profile,
            format,
            preserve,
            bandwidth,
            device,
        } => {
            let client = ClientContext {
                bandwidth_kbps: bandwidth,
                device: device.unwrap_or_default(),
                ..ClientContext::default()
            };
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_profile(&profile, format, preserve, &client))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json))
        }
        Commands::Select {
            width,
            height,
            bandwidth,
            prefer_upscale,
            device,
            candidates,
            no_low_res,
            json,
        } => {
            let ctx = ClientContext {
                bandwidth_kbps: bandwidth,
                prefer_upscale,
                device: device.unwrap_or_default(),
                allow_low_res: !no_low_res,
                ..ClientContext::default()
            };
            select(width, height, &ctx, candidates, json)
        }
        Commands::Adjust {
            current,
            bandwidth,
            failures,
            manual_override,
            no_adaptive,
        } => {
            let ctx = ClientContext {
                bandwidth_kbps: bandwidth,
                recent_failures: failures,
                manual_override,
                adaptive: !no_adaptive,
                ..ClientContext::default()
            };
            adjust_rendition(&current, &ctx)
        }
        Commands::CheckTools => check_tools(),
        Commands::Validate { profile } => validate_profile(&profile),
        Commands::Version => {
            println!("ladderforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run_profile(
    path: &Path,
    format: Option<StreamFormat>,
    preserve: bool,
    client: &ClientContext,
) -> Result<()> {
    let mut profile = Profile::load(path)
        .with_context(|| format!("failed to load profile {}", path.display()))?;
    if let Some(format) = format {
        profile.stream_format = format;
    }
    profile.preserve_manifest |= preserve;

    let tools = Arc::new(ToolRegistry::discover(&profile.tools));
    let cancel = CancellationToken::new();
    let ctx = RunContext::new(tools)
        .with_tool_limits(&profile.tools)
        .with_cancellation(cancel.clone());

    // First Ctrl-C cancels in-flight encodes; the run then returns Cancelled
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; cancelling in-flight work");
            cancel.cancel();
        }
    });

    let report = match run_pipeline(&profile, &ctx, Some(client)).await {
        Ok(report) => report,
        Err(lf_core::Error::AllVariantsFailed { operation, failures }) => {
            print_failures(&failures);
            anyhow::bail!("every variant failed to {operation}; no master manifest was written")
        }
        Err(e) => return Err(e.into()),
    };

    println!("Input: {}", report.input_path.display());
    if let Some(ref decision) = report.initial_decision {
        println!("Initial rendition: {}", decision.summary());
    }
    println!("Variants encoded: {}", report.produced);
    println!("Sub-manifests: {}", report.manifests);
    println!("Master manifest: {}", report.master_manifest.display());

    if report.success() {
        return Ok(());
    }

    print_failures(&report.errors);
    anyhow::bail!(
        "{} variant(s) failed; the master lists only the successful ones",
        report.errors.len()
    )
}

fn print_failures(failures: &[StageError]) {
    println!("\nFailures: {}", failures.len());
    for err in failures {
        println!("  {err}");
        if let Some(code) = err.exit_code {
            println!("      exit code: {code}");
        }
        if !err.command.is_empty() {
            println!("      command: {}", err.command_line());
        }
    }
}

async fn probe_file(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let tools = ToolRegistry::discover(&ToolsConfig::default());
    let prober = FfprobeProber::from_registry(&tools)?;
    let descriptor = prober.describe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!(
        "Video: {} {} {:.3} fps",
        descriptor.video_codec,
        descriptor.resolution(),
        descriptor.frame_rate
    );
    if !descriptor.audio_codec.is_empty() {
        println!("Audio: {}", descriptor.audio_codec);
    }
    let secs = descriptor.duration as u64;
    println!(
        "Duration: {:02}:{:02}:{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60
    );
    println!("Bitrate: {} kbps", descriptor.bitrate_kbps);
    if descriptor.has_keyframe_interval() {
        println!(
            "Keyframes: {} (every {:.2}s)",
            descriptor.keyframes.len(),
            descriptor.keyframe_interval
        );
    } else {
        println!("Keyframes: interval undetermined");
    }
    for warning in &descriptor.warnings {
        println!("Warning: {warning}");
    }

    Ok(())
}

fn select(width: u32, height: u32, ctx: &ClientContext, candidates: bool, json: bool) -> Result<()> {
    let catalog = Catalog::standard();

    if candidates {
        let presets = select_candidates(&catalog, width, height, ctx)?;
        if json {
            println!("{}", serde_json::to_string_pretty(&presets)?);
        } else {
            for p in &presets {
                println!("{} {}x{} min {}kbps", p.label(), p.width(), p.height(), p.min_bitrate_kbps);
            }
        }
        return Ok(());
    }

    let decision = select_initial(&catalog, width, height, Some(ctx))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
    } else {
        println!("{}", decision.summary());
    }
    Ok(())
}

fn adjust_rendition(current: &str, ctx: &ClientContext) -> Result<()> {
    let catalog = Catalog::standard();
    let current = catalog
        .find(current)
        .with_context(|| format!("unknown rendition '{current}'"))?;

    let next = adjust(&catalog, current, ctx);
    if next == *current {
        println!("{} (unchanged)", next.label());
    } else {
        println!("{} -> {}", current.label(), next.label());
    }
    Ok(())
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = ToolRegistry::discover(&ToolsConfig::default()).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({})", version.lines().next().unwrap_or(""));
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg and ffprobe to run the pipeline.");
    }

    Ok(())
}

fn validate_profile(path: &Path) -> Result<()> {
    println!("Validating profile: {:?}", path);
    let profile = Profile::load(path)?;

    println!("✓ Profile is valid");
    println!("  Input: {}", profile.input_path.display());
    println!("  Output: {}", profile.run_dir().display());
    println!("  Format: {}", profile.stream_format);
    println!("  Codecs: {} / {}", profile.video_codec, profile.audio_codec);
    println!("  Variants: {}", profile.variants.len());
    for v in &profile.variants {
        println!("    {} @ {}", v.resolution, v.bitrate);
    }

    let warnings = profile.warnings();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for w in &warnings {
            println!("  ! {w}");
        }
    }

    Ok(())
}

