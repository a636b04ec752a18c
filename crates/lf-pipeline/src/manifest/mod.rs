//! Top-level manifest synthesis and reconciliation.
//!
//! Every sub-manifest produced by the segmenter becomes one
//! [`ManifestEntry`]. A fresh run renders the entries directly; a run with
//! `preserve_manifest` set first parses the existing master and merges the
//! new entries into it. Either way the output is sorted canonically
//! (ascending resolution, then bandwidth, then label) so that rendering the
//! same set of entries always yields the same bytes.

mod dash;
mod hls;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use lf_core::{Bitrate, Error, Rendition, Result, StreamFormat};

use crate::result::SegmentResult;

/// Bandwidth assumed for labels that carry neither a bitrate nor a known
/// resolution.
pub const FALLBACK_BANDWIDTH: u64 = 1_000_000;

/// One variant line (HLS) or Representation (DASH) in a master manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// `<res>_<bitrate>` label, e.g. `720p_3000k`.
    pub label: String,
    /// Peak bandwidth in bits per second.
    pub bandwidth: u64,
    /// `WIDTHxHEIGHT`, empty when the label names no known resolution.
    pub resolution: String,
    /// Sub-manifest location relative to the master.
    pub url: String,
}

impl ManifestEntry {
    /// Build the entry for a variant label.
    pub fn from_label(label: &str, format: StreamFormat) -> Self {
        Self {
            label: label.to_string(),
            bandwidth: label_bandwidth(label),
            resolution: label_rendition(label)
                .map(Rendition::resolution_string)
                .unwrap_or_default(),
            url: format!("{label}/{label}.{}", format.extension()),
        }
    }

    /// Build the entry for a sub-manifest path; its stem is the label.
    pub fn from_sub_manifest(path: &Path, format: StreamFormat) -> Option<Self> {
        let label = path.file_stem()?.to_string_lossy();
        if label.is_empty() {
            return None;
        }
        Some(Self::from_label(&label, format))
    }

    pub fn rendition(&self) -> Option<Rendition> {
        label_rendition(&self.label)
    }

    /// `(width, height)` parsed from [`resolution`](Self::resolution).
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let (w, h) = self.resolution.split_once('x')?;
        Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
    }

    fn sort_key(&self) -> (u32, u64, &str) {
        let height = self
            .rendition()
            .map(Rendition::height)
            .or_else(|| self.dimensions().map(|(_, h)| h))
            .unwrap_or(u32::MAX);
        (height, self.bandwidth, self.label.as_str())
    }
}

/// The resolution named by the first `_`-separated part of a label.
fn label_rendition(label: &str) -> Option<Rendition> {
    label.split('_').next().and_then(Rendition::from_label)
}

/// Bits per second for a label: its bitrate part when present, else the
/// nominal figure for its resolution, else [`FALLBACK_BANDWIDTH`].
pub fn label_bandwidth(label: &str) -> u64 {
    let from_bitrate = label
        .split_once('_')
        .and_then(|(_, rest)| rest.rsplit('_').next())
        .and_then(|part| part.parse::<Bitrate>().ok())
        .map(Bitrate::bits_per_second);

    from_bitrate
        .or_else(|| label_rendition(label).map(Rendition::nominal_bandwidth))
        .unwrap_or(FALLBACK_BANDWIDTH)
}

/// Sort into canonical order: ascending height (unknown last), then
/// bandwidth, then label.
pub fn sort_canonical(entries: &mut [ManifestEntry]) {
    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
}

/// Merge `fresh` into `existing` by label, fresh entries winning, and sort
/// the result canonically.
pub fn merge(existing: Vec<ManifestEntry>, fresh: Vec<ManifestEntry>) -> Vec<ManifestEntry> {
    let mut by_label: BTreeMap<String, ManifestEntry> = BTreeMap::new();
    for entry in existing.into_iter().chain(fresh) {
        by_label.insert(entry.label.clone(), entry);
    }
    let mut merged: Vec<ManifestEntry> = by_label.into_values().collect();
    sort_canonical(&mut merged);
    merged
}

/// Render entries in the given format. Entries are emitted in the order
/// given.
pub fn render(format: StreamFormat, entries: &[ManifestEntry]) -> String {
    match format {
        StreamFormat::Hls => hls::render(entries),
        StreamFormat::Dash => dash::render(entries),
    }
}

/// Parse a master manifest in the given format.
///
/// # Errors
///
/// [`Error::Parse`] when the document is not a master of that format.
pub fn parse(format: StreamFormat, contents: &str) -> Result<Vec<ManifestEntry>> {
    match format {
        StreamFormat::Hls => hls::parse(contents),
        StreamFormat::Dash => dash::parse(contents),
    }
}

fn fresh_entries(segments: &SegmentResult) -> Result<Vec<ManifestEntry>> {
    if segments.manifests.is_empty() {
        return Err(Error::Validation(
            "no sub-manifests to aggregate into a master manifest".into(),
        ));
    }
    let entries: Vec<ManifestEntry> = segments
        .manifests
        .iter()
        .filter_map(|path| {
            let entry = ManifestEntry::from_sub_manifest(path, segments.format);
            if entry.is_none() {
                tracing::warn!("Ignoring sub-manifest without a label: {}", path.display());
            }
            entry
        })
        .collect();
    // Dedup by label in case a label was segmented twice.
    Ok(merge(Vec::new(), entries))
}

fn master_path(segments: &SegmentResult) -> PathBuf {
    segments
        .output_dir
        .join(segments.format.master_file_name())
}

/// Write a master manifest for `segments`, replacing any existing one.
///
/// # Errors
///
/// [`Error::Validation`] when there are no sub-manifests; [`Error::Io`]
/// when the master cannot be written.
pub fn synthesize(segments: &SegmentResult) -> Result<PathBuf> {
    let entries = fresh_entries(segments)?;
    let path = master_path(segments);
    write_atomic(&path, &render(segments.format, &entries))?;
    tracing::info!(
        "Wrote {} master with {} variants: {}",
        segments.format,
        entries.len(),
        path.display()
    );
    Ok(path)
}

/// Merge `segments` into the existing master manifest, keeping variants it
/// already lists. Falls back to [`synthesize`] when there is no master yet.
///
/// # Errors
///
/// As [`synthesize`], plus [`Error::Parse`] when the existing master cannot
/// be parsed.
pub fn reconcile(segments: &SegmentResult) -> Result<PathBuf> {
    let path = master_path(segments);
    let existing = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("No existing master at {}; synthesizing", path.display());
            return synthesize(segments);
        }
        Err(e) => return Err(e.into()),
    };

    let prior = parse(segments.format, &existing)?;
    let prior_count = prior.len();
    let merged = merge(prior, fresh_entries(segments)?);
    write_atomic(&path, &render(segments.format, &merged))?;
    tracing::info!(
        "Reconciled {} master: {} existing, {} total: {}",
        segments.format,
        prior_count,
        merged.len(),
        path.display()
    );
    Ok(path)
}

/// Produce the master manifest, reconciling with an existing one when
/// `preserve` is set.
pub fn generate_master(segments: &SegmentResult, preserve: bool) -> Result<PathBuf> {
    if preserve {
        reconcile(segments)
    } else {
        synthesize(segments)
    }
}

/// Write through a temporary file in the destination directory and rename
/// it into place, so readers never observe a partial master.
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| Error::from(e.error))?;
    Ok(())
}
