//! ffmpeg argument construction for slicing an encoded rendition into
//! HLS or DASH segments with `-c copy`.

use std::path::PathBuf;
use std::time::Duration;

use lf_core::StreamFormat;

/// Segment length used when neither the profile nor the source provides one.
pub const DEFAULT_SEGMENT_SECS: u32 = 4;

/// Ceiling for segmenting one rendition. Stream copy is I/O bound.
pub const SEGMENT_TIMEOUT: Duration = Duration::from_secs(3_600);

/// Effective segment duration in whole seconds.
///
/// A configured length wins. Otherwise the measured keyframe interval is
/// rounded half-up (3.2 becomes 3, 3.5 becomes 4) with a floor of 1 second.
/// Without either, [`DEFAULT_SEGMENT_SECS`] applies.
pub fn effective_segment_duration(configured: u32, keyframe_interval: f64) -> u32 {
    if configured > 0 {
        return configured;
    }
    if keyframe_interval.is_finite() && keyframe_interval > 0.0 {
        return ((keyframe_interval + 0.5).floor() as u32).max(1);
    }
    DEFAULT_SEGMENT_SECS
}

/// Everything needed to segment one rendition.
#[derive(Debug, Clone)]
pub struct SegmentSpec {
    pub input: PathBuf,
    /// Per-rendition directory receiving segments and the sub-manifest.
    pub output_dir: PathBuf,
    /// Rendition label; names the sub-manifest `<label>.<ext>`.
    pub label: String,
    pub format: StreamFormat,
    pub segment_secs: u32,
    /// Measured keyframe interval; adds a keyframe-alignment hint when > 0.
    pub keyframe_interval: f64,
}

impl SegmentSpec {
    /// Path of the sub-manifest this invocation writes.
    pub fn manifest_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.label, self.format.extension()))
    }

    /// ffmpeg arguments (program excluded).
    pub fn to_args(&self) -> Vec<String> {
        let seg = self.segment_secs.to_string();
        let mut args: Vec<String> = vec![
            "-y".into(),
            "-i".into(),
            self.input.to_string_lossy().to_string(),
            "-c".into(),
            "copy".into(),
        ];

        match self.format {
            StreamFormat::Hls => {
                args.extend([
                    "-f".to_string(),
                    "hls".to_string(),
                    "-hls_time".to_string(),
                    seg,
                    "-hls_playlist_type".to_string(),
                    "vod".to_string(),
                    "-hls_segment_filename".to_string(),
                    self.output_dir
                        .join("segment_%03d.ts")
                        .to_string_lossy()
                        .to_string(),
                ]);
            }
            StreamFormat::Dash => {
                args.extend([
                    "-f".to_string(),
                    "dash".to_string(),
                    "-seg_duration".to_string(),
                    seg,
                    "-use_timeline".to_string(),
                    "1".to_string(),
                    "-use_template".to_string(),
                    "1".to_string(),
                    "-init_seg_name".to_string(),
                    "init-$RepresentationID$.m4s".to_string(),
                    "-media_seg_name".to_string(),
                    "chunk-$RepresentationID$-$Number%05d$.m4s".to_string(),
                ]);
            }
        }

        if self.keyframe_interval.is_finite() && self.keyframe_interval > 0.0 {
            args.extend([
                "-force_key_frames".to_string(),
                format!("expr:gte(t,n_forced*{:.2})", self.keyframe_interval),
            ]);
        }

        args.push(self.manifest_path().to_string_lossy().to_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(format: StreamFormat) -> SegmentSpec {
        SegmentSpec {
            input: PathBuf::from("/out/movie/movie_720p_3000k.mp4"),
            output_dir: PathBuf::from("/out/movie/720p_3000k"),
            label: "720p_3000k".into(),
            format,
            segment_secs: 4,
            keyframe_interval: 0.0,
        }
    }

    #[test]
    fn duration_rounding() {
        assert_eq!(effective_segment_duration(0, 3.2), 3);
        assert_eq!(effective_segment_duration(0, 3.5), 4);
        assert_eq!(effective_segment_duration(0, 2.49), 2);
        assert_eq!(effective_segment_duration(0, 0.2), 1);
        assert_eq!(effective_segment_duration(0, 0.0), DEFAULT_SEGMENT_SECS);
        assert_eq!(effective_segment_duration(6, 3.2), 6);
    }

    #[test]
    fn hls_args() {
        let s = sample(StreamFormat::Hls);
        assert_eq!(
            s.to_args(),
            vec![
                "-y", "-i", "/out/movie/movie_720p_3000k.mp4",
                "-c", "copy", "-f", "hls",
                "-hls_time", "4",
                "-hls_playlist_type", "vod",
                "-hls_segment_filename", "/out/movie/720p_3000k/segment_%03d.ts",
                "/out/movie/720p_3000k/720p_3000k.m3u8",
            ]
        );
    }

    #[test]
    fn dash_args_with_keyframe_hint() {
        let mut s = sample(StreamFormat::Dash);
        s.keyframe_interval = 2.002;
        let args = s.to_args();
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "dash"));
        assert!(args.windows(2).any(|w| w[0] == "-seg_duration" && w[1] == "4"));
        assert!(args
            .windows(2)
            .any(|w| w[0] == "-force_key_frames" && w[1] == "expr:gte(t,n_forced*2.00)"));
        assert_eq!(
            args.last().unwrap(),
            "/out/movie/720p_3000k/720p_3000k.mpd"
        );
    }
}
