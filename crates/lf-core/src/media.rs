//! Media-domain types shared across the pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ---------------------------------------------------------------------------
// MediaDescriptor
// ---------------------------------------------------------------------------

/// Structured description of a source file, produced once per run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub width: u32,
    pub height: u32,
    /// Duration in seconds.
    pub duration: f64,
    pub video_codec: String,
    pub audio_codec: String,
    /// Overall bitrate in kbps.
    pub bitrate_kbps: u64,
    /// Average frame rate in frames per second.
    pub frame_rate: f64,
    /// Mean spacing between keyframes in seconds; 0 when undetermined.
    pub keyframe_interval: f64,
    /// Keyframe presentation timestamps, ascending.
    #[serde(default)]
    pub keyframes: Vec<f64>,
    /// Non-fatal problems encountered while extracting the fields above.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MediaDescriptor {
    /// Attach keyframe timestamps and derive the mean interval from them.
    ///
    /// Fewer than two keyframes leaves the interval at 0.
    pub fn with_keyframes(mut self, mut keyframes: Vec<f64>) -> Self {
        keyframes.retain(|t| t.is_finite());
        keyframes.sort_by(f64::total_cmp);
        self.keyframe_interval = mean_spacing(&keyframes);
        self.keyframes = keyframes;
        self
    }

    pub fn has_keyframe_interval(&self) -> bool {
        self.keyframe_interval > 0.0
    }

    /// `WIDTHxHEIGHT` of the source.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

fn mean_spacing(timestamps: &[f64]) -> f64 {
    match (timestamps.first(), timestamps.last()) {
        (Some(first), Some(last)) if timestamps.len() >= 2 => {
            (last - first) / (timestamps.len() - 1) as f64
        }
        _ => 0.0,
    }
}

// ---------------------------------------------------------------------------
// StreamFormat
// ---------------------------------------------------------------------------

/// Packaging format for segments and manifests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Hls,
    Dash,
}

impl StreamFormat {
    /// Manifest file extension, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            StreamFormat::Hls => "m3u8",
            StreamFormat::Dash => "mpd",
        }
    }

    /// File name of the top-level manifest.
    pub fn master_file_name(self) -> String {
        format!("master.{}", self.extension())
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StreamFormat::Hls => "hls",
            StreamFormat::Dash => "dash",
        };
        f.write_str(s)
    }
}

impl FromStr for StreamFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hls" | "m3u8" => Ok(StreamFormat::Hls),
            "dash" | "mpd" => Ok(StreamFormat::Dash),
            other => Err(Error::Config(format!("unknown stream format '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ScalePolicy
// ---------------------------------------------------------------------------

/// How a produced variant's picture size was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalePolicy {
    /// Encoded with a scale filter to the tier's height.
    Auto,
    /// Source already matched the tier; copied byte-for-byte.
    Passthrough,
    /// Label was not in the catalog; encoded at source size without scaling.
    Skip,
}

impl fmt::Display for ScalePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalePolicy::Auto => "auto",
            ScalePolicy::Passthrough => "passthrough",
            ScalePolicy::Skip => "skip",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyframe_interval_from_timestamps() {
        let d = MediaDescriptor::default().with_keyframes(vec![6.4, 0.0, 3.2, 9.6]);
        assert_eq!(d.keyframes, vec![0.0, 3.2, 6.4, 9.6]);
        assert!((d.keyframe_interval - 3.2).abs() < 1e-9);
        assert!(d.has_keyframe_interval());
    }

    #[test]
    fn single_keyframe_has_no_interval() {
        let d = MediaDescriptor::default().with_keyframes(vec![0.0]);
        assert_eq!(d.keyframe_interval, 0.0);
        assert!(!d.has_keyframe_interval());
    }

    #[test]
    fn stream_format_parsing() {
        assert_eq!("HLS".parse::<StreamFormat>().unwrap(), StreamFormat::Hls);
        assert_eq!("mpd".parse::<StreamFormat>().unwrap(), StreamFormat::Dash);
        assert!("smooth".parse::<StreamFormat>().is_err());
        assert_eq!(StreamFormat::Dash.master_file_name(), "master.mpd");
    }

    #[test]
    fn scale_policy_serde() {
        let json = serde_json::to_string(&ScalePolicy::Passthrough).unwrap();
        assert_eq!(json, "\"passthrough\"");
        assert_eq!(ScalePolicy::Skip.to_string(), "skip");
    }
}
