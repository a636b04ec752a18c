//! HLS master playlists.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use lf_core::{Error, Result};
use regex::Regex;

use super::ManifestEntry;

const STREAM_INF: &str = "#EXT-X-STREAM-INF:";

static ATTRIBUTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Z0-9-]+)=("[^"]*"|[^,]*)"#).expect("invalid attribute regex")
});

pub(super) fn render(entries: &[ManifestEntry]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for entry in entries {
        let _ = write!(out, "{STREAM_INF}BANDWIDTH={}", entry.bandwidth);
        if !entry.resolution.is_empty() {
            let _ = write!(out, ",RESOLUTION={}", entry.resolution);
        }
        let _ = writeln!(out, "\n{}", entry.url);
    }
    out
}

/// Parse the variant streams of a master playlist.
///
/// A `#EXT-X-STREAM-INF` tag without a usable `BANDWIDTH` or without a URI
/// line after it is skipped with a warning.
pub(super) fn parse(contents: &str) -> Result<Vec<ManifestEntry>> {
    let mut lines = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty());

    if lines.next() != Some("#EXTM3U") {
        return Err(Error::Parse("HLS master does not start with #EXTM3U".into()));
    }

    let mut entries = Vec::new();
    let mut pending: Option<(u64, String)> = None;

    for line in lines {
        if let Some(attrs) = line.strip_prefix(STREAM_INF) {
            if pending.is_some() {
                tracing::warn!("Skipping #EXT-X-STREAM-INF without a URI");
            }
            pending = parse_stream_inf(attrs);
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Some((bandwidth, resolution)) = pending.take() {
            let label = Path::new(line)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| line.to_string());
            entries.push(ManifestEntry {
                label,
                bandwidth,
                resolution,
                url: line.to_string(),
            });
        }
    }

    Ok(entries)
}

fn parse_stream_inf(attrs: &str) -> Option<(u64, String)> {
    let mut bandwidth = None;
    let mut resolution = String::new();
    for caps in ATTRIBUTE_RE.captures_iter(attrs) {
        let value = caps[2].trim_matches('"');
        match &caps[1] {
            "BANDWIDTH" => bandwidth = value.parse::<u64>().ok(),
            "RESOLUTION" => resolution = value.to_string(),
            _ => {}
        }
    }
    if bandwidth.is_none() {
        tracing::warn!("Skipping #EXT-X-STREAM-INF with no usable BANDWIDTH: {attrs}");
    }
    bandwidth.map(|b| (b, resolution))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_foreign_attributes() {
        let body = "#EXTM3U\n\
#EXT-X-VERSION:6\n\
#EXT-X-INDEPENDENT-SEGMENTS\n\
#EXT-X-STREAM-INF:BANDWIDTH=2800000,CODECS=\"avc1.4d401f,mp4a.40.2\",RESOLUTION=1280x720\n\
720p_2800k/720p_2800k.m3u8\n\
#EXT-X-STREAM-INF:RESOLUTION=640x360\n\
broken/broken.m3u8\n\
#EXT-X-STREAM-INF:BANDWIDTH=400000\n\
\n\
240p/240p.m3u8\n";
        let entries = parse(body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].label, "720p_2800k");
        assert_eq!(entries[0].resolution, "1280x720");
        assert_eq!(entries[0].bandwidth, 2_800_000);
        assert_eq!(entries[1].label, "240p");
        assert!(entries[1].resolution.is_empty());
    }

    #[test]
    fn missing_header_is_parse_error() {
        assert!(matches!(parse(""), Err(Error::Parse(_))));
        assert!(matches!(parse("<MPD/>"), Err(Error::Parse(_))));
    }

    #[test]
    fn render_omits_unknown_resolution() {
        let entry = ManifestEntry {
            label: "extra".into(),
            bandwidth: 1_000_000,
            resolution: String::new(),
            url: "extra/extra.m3u8".into(),
        };
        assert_eq!(
            render(&[entry]),
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=1000000\nextra/extra.m3u8\n"
        );
    }
}
