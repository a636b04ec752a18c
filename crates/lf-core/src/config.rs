//! Rendition profile and tool configuration.
//!
//! A [`Profile`] is read from JSON, YAML, or TOML (chosen by file extension)
//! and validated before the pipeline starts. Bitrates are parsed into
//! [`Bitrate`] during deserialization, so a malformed ladder fails at load
//! time instead of halfway through a run.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::media::StreamFormat;
use crate::rendition::{normalize_label, Bitrate, Rendition};

/// Hardware acceleration methods understood by the encoder argument builder.
pub const HW_ACCEL_METHODS: &[&str] = &["none", "videotoolbox", "nvenc", "vaapi", "qsv"];

// ---------------------------------------------------------------------------
// Requested variants
// ---------------------------------------------------------------------------

/// One rung of the requested ladder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedVariant {
    /// Resolution label as written in the profile, e.g. `"720p"`.
    pub resolution: String,
    pub bitrate: Bitrate,
}

impl RequestedVariant {
    pub fn new(resolution: impl Into<String>, bitrate: Bitrate) -> Self {
        Self {
            resolution: resolution.into(),
            bitrate,
        }
    }

    /// The catalog tier named by this entry, if the label is known.
    pub fn rendition(&self) -> Option<Rendition> {
        Rendition::from_label(&self.resolution)
    }

    /// Deduplication key: normalized label plus bitrate.
    pub fn key(&self) -> VariantKey {
        VariantKey {
            label: self
                .rendition()
                .map(|r| r.label().to_string())
                .unwrap_or_else(|| normalize_label(&self.resolution)),
            bitrate: self.bitrate,
        }
    }
}

/// Identity of a variant within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantKey {
    pub label: String,
    pub bitrate: Bitrate,
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.label, self.bitrate)
    }
}

fn default_ladder() -> Vec<RequestedVariant> {
    [
        ("1080p", 8000),
        ("1080p", 5000),
        ("720p", 3000),
        ("720p", 2500),
        ("480p", 1500),
        ("360p", 1000),
        ("240p", 500),
        ("144p", 150),
    ]
    .into_iter()
    .filter_map(|(label, kbps)| {
        Bitrate::from_kbps(kbps)
            .ok()
            .map(|b| RequestedVariant::new(label, b))
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A rendition profile: what to encode, where, and how to package it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default = "default_ladder")]
    pub variants: Vec<RequestedVariant>,
    pub video_codec: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_container")]
    pub container: String,
    /// Target segment length in seconds; 0 derives it from keyframes.
    #[serde(default)]
    pub segment_length: u32,
    #[serde(default)]
    pub stream_format: StreamFormat,
    /// Merge into an existing master manifest instead of replacing it.
    #[serde(default)]
    pub preserve_manifest: bool,
    #[serde(default, alias = "use_hwaccel")]
    pub use_hw_accel: bool,
    /// Explicit hardware method; the host default is used when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hw_accel: Option<String>,
    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_audio_codec() -> String {
    "aac".into()
}

fn default_container() -> String {
    "mp4".into()
}

impl Profile {
    /// Load and validate a profile. The format follows the file extension:
    /// `.json`, `.yaml`/`.yml`, or `.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read profile {}: {e}", path.display()))
        })?;

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        let profile = match ext.as_str() {
            "json" => Self::from_json(&contents),
            "yaml" | "yml" => Self::from_yaml(&contents),
            "toml" => Self::from_toml(&contents),
            other => Err(Error::Config(format!(
                "unsupported profile format '{other}' for {}",
                path.display()
            ))),
        }?;

        tracing::debug!(
            "Loaded profile {} ({} variants, format={})",
            path.display(),
            profile.variants.len(),
            profile.stream_format
        );
        Ok(profile)
    }

    /// Deserialize and validate a profile from a JSON string.
    pub fn from_json(s: &str) -> Result<Self> {
        let profile: Self = serde_json::from_str(s)
            .map_err(|e| Error::Config(format!("profile parse error: {e}")))?;
        profile.normalized()
    }

    /// Deserialize and validate a profile from a YAML string.
    pub fn from_yaml(s: &str) -> Result<Self> {
        let profile: Self = serde_yaml::from_str(s)
            .map_err(|e| Error::Config(format!("profile parse error: {e}")))?;
        profile.normalized()
    }

    /// Deserialize and validate a profile from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self> {
        let profile: Self =
            toml::from_str(s).map_err(|e| Error::Config(format!("profile parse error: {e}")))?;
        profile.normalized()
    }

    fn normalized(mut self) -> Result<Self> {
        if self.variants.is_empty() {
            tracing::info!("Profile lists no variants; using the default ladder");
            self.variants = default_ladder();
        }
        self.validate()?;
        Ok(self)
    }

    /// Check required fields. Returns the first fatal problem found.
    pub fn validate(&self) -> Result<()> {
        if self.input_path.as_os_str().is_empty() {
            return Err(Error::Config("input_path is required".into()));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::Config("output_dir is required".into()));
        }
        if self.video_codec.trim().is_empty() {
            return Err(Error::Config("video_codec is required".into()));
        }
        if self.audio_codec.trim().is_empty() {
            return Err(Error::Config("audio_codec must not be empty".into()));
        }
        if self.container.trim().is_empty() {
            return Err(Error::Config("container must not be empty".into()));
        }
        if self.tools.encode_timeout_secs == Some(0) || self.tools.segment_timeout_secs == Some(0) {
            return Err(Error::Config("tool timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Return a list of non-fatal issues.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        for (i, v) in self.variants.iter().enumerate() {
            if v.rendition().is_none() {
                warnings.push(format!(
                    "variants[{i}].resolution '{}' is not a known rendition and will be skipped",
                    v.resolution
                ));
            }
        }

        if let Some(ref hw) = self.hw_accel {
            if !HW_ACCEL_METHODS.contains(&hw.as_str()) {
                warnings.push(format!(
                    "hw_accel '{}' is not a recognized method (valid: {})",
                    hw,
                    HW_ACCEL_METHODS.join(", ")
                ));
            }
            if !self.use_hw_accel {
                warnings.push("hw_accel is set but use_hw_accel is false; it will be ignored".into());
            }
        }

        warnings
    }

    /// Name used for the run's output subdirectory and variant file names:
    /// the input file stem.
    pub fn slug(&self) -> String {
        self.input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "output".to_string())
    }

    /// `<output_dir>/<slug>`, where every artifact of the run is written.
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(self.slug())
    }
}

// ---------------------------------------------------------------------------
// Tools
// ---------------------------------------------------------------------------

/// Paths to external CLI tools. Unset entries are looked up on `PATH`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    /// Per-variant encode limit in seconds. Unset keeps the built-in ceiling.
    pub encode_timeout_secs: Option<u64>,
    /// Per-variant segmenting limit in seconds.
    pub segment_timeout_secs: Option<u64>,
}
