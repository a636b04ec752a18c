//! ffmpeg argument construction for encoding one rendition.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use lf_core::Bitrate;

/// Ceiling for one rendition encode. Full-length sources routinely run for
/// hours in software.
pub const ENCODE_TIMEOUT: Duration = Duration::from_secs(86_400);

/// Hardware acceleration backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwAccel {
    VideoToolbox,
    Nvenc,
    Vaapi,
    Qsv,
}

impl HwAccel {
    /// Parse a configured method name. `"none"` and unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "videotoolbox" => Some(HwAccel::VideoToolbox),
            "nvenc" | "cuda" => Some(HwAccel::Nvenc),
            "vaapi" => Some(HwAccel::Vaapi),
            "qsv" => Some(HwAccel::Qsv),
            _ => None,
        }
    }

    /// The backend that is always present on this platform, if any.
    pub fn host_default() -> Option<Self> {
        if cfg!(target_os = "macos") {
            Some(HwAccel::VideoToolbox)
        } else {
            None
        }
    }

    /// Pick the backend for a run: an explicit method wins, otherwise the
    /// host default. Disabled acceleration always yields `None`.
    pub fn resolve(enabled: bool, method: Option<&str>) -> Option<Self> {
        if !enabled {
            return None;
        }
        match method {
            Some(name) => Self::from_name(name),
            None => Self::host_default(),
        }
    }

    /// Flags that must appear before `-i`.
    pub fn input_args(self) -> &'static [&'static str] {
        match self {
            HwAccel::VideoToolbox => &["-hwaccel", "videotoolbox"],
            HwAccel::Nvenc => &["-hwaccel", "cuda"],
            HwAccel::Vaapi => &["-hwaccel", "vaapi", "-hwaccel_output_format", "vaapi"],
            HwAccel::Qsv => &["-hwaccel", "qsv"],
        }
    }

    /// Hardware encoder replacing a software `codec`, if this backend has one.
    pub fn encoder_for(self, codec: &str) -> Option<&'static str> {
        let family = match codec.trim().to_ascii_lowercase().as_str() {
            "h264" | "libx264" | "avc" => "h264",
            "hevc" | "h265" | "libx265" => "hevc",
            _ => return None,
        };
        let encoder = match (self, family) {
            (HwAccel::VideoToolbox, "h264") => "h264_videotoolbox",
            (HwAccel::VideoToolbox, _) => "hevc_videotoolbox",
            (HwAccel::Nvenc, "h264") => "h264_nvenc",
            (HwAccel::Nvenc, _) => "hevc_nvenc",
            (HwAccel::Vaapi, "h264") => "h264_vaapi",
            (HwAccel::Vaapi, _) => "hevc_vaapi",
            (HwAccel::Qsv, "h264") => "h264_qsv",
            (HwAccel::Qsv, _) => "hevc_qsv",
        };
        Some(encoder)
    }
}

impl fmt::Display for HwAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HwAccel::VideoToolbox => "videotoolbox",
            HwAccel::Nvenc => "nvenc",
            HwAccel::Vaapi => "vaapi",
            HwAccel::Qsv => "qsv",
        };
        f.write_str(s)
    }
}

/// Everything needed to encode one rendition.
#[derive(Debug, Clone)]
pub struct EncodeSpec {
    pub input: PathBuf,
    pub output: PathBuf,
    pub video_codec: String,
    pub audio_codec: String,
    pub bitrate: Bitrate,
    /// Target height; `None` encodes at source size.
    pub scale_height: Option<u32>,
    pub hw_accel: Option<HwAccel>,
    /// Force a keyframe every this many seconds, so later segmenting can cut
    /// on aligned boundaries across renditions.
    pub keyframe_every: Option<u32>,
}

impl EncodeSpec {
    /// The video encoder actually used, after hardware substitution.
    pub fn encoder(&self) -> String {
        self.hw_accel
            .and_then(|hw| hw.encoder_for(&self.video_codec))
            .map(str::to_string)
            .unwrap_or_else(|| self.video_codec.clone())
    }

    /// Whether hardware acceleration applies to this codec.
    pub fn uses_hw(&self) -> bool {
        self.hw_accel
            .is_some_and(|hw| hw.encoder_for(&self.video_codec).is_some())
    }

    /// ffmpeg arguments (program excluded). Progress is reported as
    /// key/value lines on stderr.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-progress", "pipe:2", "-nostats"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let hw = self.hw_accel.filter(|_| self.uses_hw());

        // Hardware acceleration flags must appear before -i.
        if let Some(hw) = hw {
            args.extend(hw.input_args().iter().map(|s| s.to_string()));
        }

        args.push("-i".into());
        args.push(self.input.to_string_lossy().to_string());

        if let Some(h) = self.scale_height {
            let filter = match hw {
                Some(HwAccel::Vaapi) => format!("scale_vaapi=w=-2:h={h}"),
                _ => format!("scale=-2:{h}"),
            };
            args.extend(["-vf".to_string(), filter]);
        }

        let bitrate = self.bitrate.to_string();
        let bufsize = format!("{}k", u64::from(self.bitrate.kbps()) * 2);
        args.extend([
            "-c:v".to_string(),
            self.encoder(),
            "-b:v".to_string(),
            bitrate.clone(),
            "-maxrate".to_string(),
            bitrate,
            "-bufsize".to_string(),
            bufsize,
        ]);

        if let Some(secs) = self.keyframe_every {
            args.extend([
                "-force_key_frames".to_string(),
                format!("expr:gte(t,n_forced*{secs})"),
            ]);
        }

        args.extend(["-c:a".to_string(), self.audio_codec.clone()]);
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EncodeSpec {
        EncodeSpec {
            input: PathBuf::from("/in/movie.mp4"),
            output: PathBuf::from("/out/movie_720p_3000k.mp4"),
            video_codec: "libx264".into(),
            audio_codec: "aac".into(),
            bitrate: "3000k".parse().unwrap(),
            scale_height: Some(720),
            hw_accel: None,
            keyframe_every: None,
        }
    }

    #[test]
    fn software_encode_args() {
        let args = sample().to_args();
        assert_eq!(
            args,
            vec![
                "-y", "-progress", "pipe:2", "-nostats",
                "-i", "/in/movie.mp4",
                "-vf", "scale=-2:720",
                "-c:v", "libx264",
                "-b:v", "3000k", "-maxrate", "3000k", "-bufsize", "6000k",
                "-c:a", "aac",
                "/out/movie_720p_3000k.mp4",
            ]
        );
    }

    #[test]
    fn unscaled_encode_omits_filter() {
        let mut s = sample();
        s.scale_height = None;
        assert!(!s.to_args().contains(&"-vf".to_string()));
    }

    #[test]
    fn keyframe_forcing() {
        let mut s = sample();
        s.keyframe_every = Some(4);
        let args = s.to_args();
        let pos = args.iter().position(|a| a == "-force_key_frames").unwrap();
        assert_eq!(args[pos + 1], "expr:gte(t,n_forced*4)");
    }

    #[test]
    fn nvenc_substitution() {
        let mut s = sample();
        s.hw_accel = Some(HwAccel::Nvenc);
        let args = s.to_args();
        assert_eq!(&args[4..6], &["-hwaccel", "cuda"]);
        assert!(args.contains(&"h264_nvenc".to_string()));
        assert_eq!(s.encoder(), "h264_nvenc");
    }

    #[test]
    fn vaapi_uses_hw_scaler() {
        let mut s = sample();
        s.video_codec = "hevc".into();
        s.hw_accel = Some(HwAccel::Vaapi);
        let args = s.to_args();
        assert!(args.contains(&"scale_vaapi=w=-2:h=720".to_string()));
        assert!(args.contains(&"hevc_vaapi".to_string()));
    }

    #[test]
    fn unsupported_codec_stays_software() {
        let mut s = sample();
        s.video_codec = "libvpx-vp9".into();
        s.hw_accel = Some(HwAccel::Qsv);
        assert!(!s.uses_hw());
        let args = s.to_args();
        assert!(!args.contains(&"-hwaccel".to_string()));
        assert!(args.contains(&"libvpx-vp9".to_string()));
    }

    #[test]
    fn resolve_rules() {
        assert_eq!(HwAccel::resolve(false, Some("nvenc")), None);
        assert_eq!(HwAccel::resolve(true, Some("nvenc")), Some(HwAccel::Nvenc));
        assert_eq!(HwAccel::resolve(true, Some("none")), None);
        assert_eq!(HwAccel::resolve(true, None), HwAccel::host_default());
    }
}
