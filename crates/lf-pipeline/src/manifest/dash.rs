//! DASH master MPDs.
//!
//! The master is a static MPD whose Representations point at the
//! per-variant MPDs via `BaseURL`. Each Representation gets its own
//! AdaptationSet, matching how the segmenter writes one MPD per variant.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::LazyLock;

use lf_core::{Error, Result};
use regex::Regex;

use super::ManifestEntry;

static REPRESENTATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<Representation\b([^>]*)>(.*?)</Representation>")
        .expect("invalid representation regex")
});

static ATTRIBUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([A-Za-z:]+)="([^"]*)""#).expect("invalid attribute regex"));

static BASE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<BaseURL>\s*([^<]*?)\s*</BaseURL>").expect("invalid BaseURL regex")
});

pub(super) fn render(entries: &[ManifestEntry]) -> String {
    let mut out = String::from(concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
        "<MPD xmlns=\"urn:mpeg:dash:schema:mpd:2011\" type=\"static\" minBufferTime=\"PT1.5S\" ",
        "profiles=\"urn:mpeg:dash:profile:isoff-on-demand:2011\">\n",
        "  <Period>\n",
    ));

    for entry in entries {
        out.push_str(
            "    <AdaptationSet mimeType=\"video/mp4\" segmentAlignment=\"true\" bitstreamSwitching=\"true\">\n",
        );
        let _ = write!(
            out,
            "      <Representation id=\"{}\" bandwidth=\"{}\"",
            escape(&entry.label),
            entry.bandwidth
        );
        if let Some((w, h)) = entry.dimensions() {
            let _ = write!(out, " width=\"{w}\" height=\"{h}\"");
        }
        out.push_str(">\n");
        let _ = writeln!(out, "        <BaseURL>{}</BaseURL>", escape(&entry.url));
        out.push_str("      </Representation>\n");
        out.push_str("    </AdaptationSet>\n");
    }

    out.push_str("  </Period>\n</MPD>\n");
    out
}

/// Parse the Representations of a master MPD.
///
/// Representations without a numeric `bandwidth` are skipped with a
/// warning. The label is the `id` attribute, falling back to the BaseURL
/// stem.
pub(super) fn parse(contents: &str) -> Result<Vec<ManifestEntry>> {
    if !contents.contains("<MPD") {
        return Err(Error::Parse("DASH master has no <MPD> element".into()));
    }

    let mut entries = Vec::new();
    for caps in REPRESENTATION_RE.captures_iter(contents) {
        let attrs: HashMap<&str, String> = ATTRIBUTE_RE
            .captures_iter(&caps[1])
            .filter_map(|a| {
                let name = a.get(1)?.as_str();
                Some((name, unescape(a.get(2)?.as_str())))
            })
            .collect();

        let Some(bandwidth) = attrs.get("bandwidth").and_then(|b| b.parse::<u64>().ok()) else {
            tracing::warn!("Skipping Representation with no usable bandwidth");
            continue;
        };
        let url = BASE_URL_RE
            .captures(&caps[2])
            .map(|u| unescape(&u[1]))
            .unwrap_or_default();
        let label = attrs
            .get("id")
            .filter(|id| !id.is_empty())
            .cloned()
            .or_else(|| {
                Path::new(&url)
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
            })
            .unwrap_or_default();
        if label.is_empty() {
            tracing::warn!("Skipping Representation with neither id nor BaseURL");
            continue;
        }

        let resolution = match (attrs.get("width"), attrs.get("height")) {
            (Some(w), Some(h)) => format!("{w}x{h}"),
            _ => String::new(),
        };
        entries.push(ManifestEntry {
            label,
            bandwidth,
            resolution,
            url,
        });
    }

    Ok(entries)
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn unescape(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
