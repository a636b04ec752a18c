//! FFprobe-backed media descriptor extraction.
//!
//! Two invocations are made per source: one for container and stream
//! metadata (`-show_format -show_streams`) and one listing keyframe
//! timestamps of the first video stream. Malformed fields default to zero
//! and are noted in [`MediaDescriptor::warnings`]; only an unreadable
//! top-level document or a source without video fails the probe.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lf_core::{Error, MediaDescriptor};
use serde::Deserialize;
use serde_json::Value;

use crate::command::ToolCommand;
use crate::tools::ToolRegistry;

/// The keyframe listing decodes every video packet header, which scales with
/// source length.
const KEYFRAME_TIMEOUT: Duration = Duration::from_secs(3_600);

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    /// Path to the ffprobe binary.
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    /// Create a new prober using the given ffprobe path.
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }

    /// Create a prober from the registry's ffprobe entry.
    pub fn from_registry(tools: &ToolRegistry) -> lf_core::Result<Self> {
        Ok(Self::new(tools.require("ffprobe")?.path.clone()))
    }

    /// Probe `path` and return its descriptor, keyframes included.
    pub async fn describe(&self, path: &Path) -> lf_core::Result<MediaDescriptor> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.args([
            "-v", "error",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(path.to_string_lossy().as_ref());

        let output = cmd
            .execute()
            .await
            .map_err(|e| Error::Probe(format!("{}: {e}", path.display())))?;
        let mut descriptor = parse_descriptor(&output.stdout)?;

        match self.keyframes(path).await {
            Ok(keyframes) => {
                descriptor = descriptor.with_keyframes(keyframes);
            }
            Err(e) => {
                tracing::warn!("Keyframe probe failed for {}: {e}", path.display());
                descriptor
                    .warnings
                    .push(format!("keyframe probe failed: {e}"));
            }
        }

        tracing::debug!(
            "Described {}: {} {:.2}s {}kbps {:.3}fps keyframe_interval={:.2}s",
            path.display(),
            descriptor.resolution(),
            descriptor.duration,
            descriptor.bitrate_kbps,
            descriptor.frame_rate,
            descriptor.keyframe_interval
        );
        Ok(descriptor)
    }

    /// List keyframe timestamps (seconds) of the first video stream.
    pub async fn keyframes(&self, path: &Path) -> lf_core::Result<Vec<f64>> {
        let output = self.keyframes_command(path).execute().await?;
        parse_keyframes(&output.stdout)
    }

    fn keyframes_command(&self, path: &Path) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.timeout(KEYFRAME_TIMEOUT);
        cmd.args([
            "-v", "error",
            "-select_streams", "v:0",
            "-skip_frame", "nokey",
            "-show_entries", "frame=key_frame,pts_time,best_effort_timestamp_time",
            "-print_format", "json",
        ]);
        cmd.arg(path.to_string_lossy().as_ref());
        cmd
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<Value>,
    bit_rate: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    bit_rate: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFrames {
    #[serde(default)]
    frames: Vec<FfprobeFrame>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFrame {
    key_frame: Option<u8>,
    pts_time: Option<Value>,
    best_effort_timestamp_time: Option<Value>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Map `-show_format -show_streams` JSON into a descriptor (keyframes empty).
pub fn parse_descriptor(json: &str) -> lf_core::Result<MediaDescriptor> {
    let output: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe JSON parse error: {e}")))?;

    let mut d = MediaDescriptor::default();

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| Error::Probe("no video stream found".into()))?;

    d.width = video.width.unwrap_or(0);
    d.height = video.height.unwrap_or(0);
    if d.width == 0 || d.height == 0 {
        d.warnings.push("video dimensions unavailable".into());
    }
    d.video_codec = video.codec_name.clone().unwrap_or_default();

    d.frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .filter(|r| *r > 0.0)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_frame_rate))
        .unwrap_or_else(|| {
            d.warnings.push("frame rate unavailable".into());
            0.0
        });

    match output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
    {
        Some(audio) => d.audio_codec = audio.codec_name.clone().unwrap_or_default(),
        None => d.warnings.push("no audio stream found".into()),
    }

    let format = output.format.as_ref();

    d.duration = format
        .and_then(|f| f.duration.as_ref())
        .and_then(value_as_f64)
        .unwrap_or_else(|| {
            d.warnings.push("duration unavailable".into());
            0.0
        });

    // Container bitrate first, then the richest stream.
    let format_bitrate = format.and_then(|f| f.bit_rate.as_ref()).and_then(value_as_f64);
    let stream_bitrate = output
        .streams
        .iter()
        .filter_map(|s| s.bit_rate.as_ref().and_then(value_as_f64))
        .reduce(f64::max);
    d.bitrate_kbps = match format_bitrate.or(stream_bitrate) {
        Some(bps) if bps > 0.0 => (bps / 1000.0) as u64,
        _ => {
            d.warnings.push("bitrate unavailable".into());
            0
        }
    };

    Ok(d)
}

/// Extract keyframe timestamps from `-show_entries frame=...` JSON.
pub fn parse_keyframes(json: &str) -> lf_core::Result<Vec<f64>> {
    let output: FfprobeFrames = serde_json::from_str(json)
        .map_err(|e| Error::Probe(format!("ffprobe frames JSON parse error: {e}")))?;

    Ok(output
        .frames
        .iter()
        .filter(|f| f.key_frame.map_or(true, |k| k == 1))
        .filter_map(|f| {
            f.pts_time
                .as_ref()
                .and_then(value_as_f64)
                .or_else(|| f.best_effort_timestamp_time.as_ref().and_then(value_as_f64))
        })
        .collect())
}

/// ffprobe emits most numbers as strings; accept either form.
fn value_as_f64(v: &Value) -> Option<f64> {
    let parsed = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn parse_frame_rate(rate_str: &str) -> Option<f64> {
    let parts: Vec<&str> = rate_str.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den != 0.0 {
            return Some(num / den);
        }
        return None;
    }
    rate_str.parse().ok()
}
