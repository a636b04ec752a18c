use clap::{Parser, Subcommand};
use lf_core::StreamFormat;
use lf_pipeline::DeviceClass;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ladderforge")]
#[command(author, version, about = "Adaptive-bitrate packaging: encode a rendition ladder, segment it, publish HLS or DASH")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full pipeline for a rendition profile
    Run {
        /// Profile file (.json, .yaml, .yml or .toml)
        #[arg(required = true)]
        profile: PathBuf,

        /// Override the profile's stream format (hls or dash)
        #[arg(long)]
        format: Option<StreamFormat>,

        /// Merge into an existing master manifest instead of replacing it
        #[arg(long)]
        preserve: bool,

        /// Client bandwidth estimate in kbps, for the initial rendition hint
        #[arg(long)]
        bandwidth: Option<u32>,

        /// Client device class (mobile, desktop, tv)
        #[arg(long)]
        device: Option<DeviceClass>,
    },

    /// Probe a media file and display its descriptor
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Choose the initial rendition for a source and client
    Select {
        /// Source width in pixels
        #[arg(long)]
        width: u32,

        /// Source height in pixels
        #[arg(long)]
        height: u32,

        /// Client bandwidth estimate in kbps
        #[arg(long)]
        bandwidth: Option<u32>,

        /// Allow renditions larger than the source
        #[arg(long)]
        prefer_upscale: bool,

        /// Client device class (mobile, desktop, tv)
        #[arg(long)]
        device: Option<DeviceClass>,

        /// List every acceptable rendition instead of one
        #[arg(long)]
        candidates: bool,

        /// Exclude 480p and below from the candidate list
        #[arg(long)]
        no_low_res: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-evaluate the current rendition against fresh client signals
    Adjust {
        /// Rendition currently playing, e.g. 720p
        #[arg(long)]
        current: String,

        /// Client bandwidth estimate in kbps
        #[arg(long)]
        bandwidth: Option<u32>,

        /// Recent playback failures
        #[arg(long, default_value = "0")]
        failures: u32,

        /// Rendition forced by the viewer
        #[arg(long = "override")]
        manual_override: Option<String>,

        /// Disable automatic switching
        #[arg(long)]
        no_adaptive: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate a rendition profile
    Validate {
        /// Profile file to validate
        #[arg(required = true)]
        profile: PathBuf,
    },

    /// Display version information
    Version,
}
