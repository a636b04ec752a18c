//! Stage results and the shared accumulator concurrent workers report into.

use std::collections::HashSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use lf_core::config::VariantKey;
use lf_core::{Bitrate, Rendition, ScalePolicy, StageError, StreamFormat};
use parking_lot::Mutex;
use serde::Serialize;

/// A successfully encoded variant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProducedVariant {
    /// Catalog label, or the normalized requested label when unknown.
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: Bitrate,
    pub scale_policy: ScalePolicy,
    /// File name within the run directory.
    pub output_filename: String,
}

impl ProducedVariant {
    pub fn key(&self) -> VariantKey {
        VariantKey {
            label: self.label.clone(),
            bitrate: self.bitrate,
        }
    }

    pub fn rendition(&self) -> Option<Rendition> {
        Rendition::from_label(&self.label)
    }

    /// Label used for this variant's segment directory and sub-manifest.
    pub fn segment_label(&self) -> String {
        label_from_filename(&self.output_filename)
    }
}

/// `<slug>_<res>_<bitrate>.<ext>` yields `<res>_<bitrate>`; names without two
/// trailing `_` parts yield their stem.
pub fn label_from_filename(filename: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());

    let mut parts = stem.rsplitn(3, '_');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(bitrate), Some(res), Some(_slug)) if !res.is_empty() => format!("{res}_{bitrate}"),
        _ => stem,
    }
}

/// Outcome of the encode stage.
#[derive(Debug)]
pub struct PipelineResult {
    pub input_path: PathBuf,
    /// Run directory holding every produced variant.
    pub output_dir: PathBuf,
    /// Source duration in seconds.
    pub duration: f64,
    /// Segment length requested by the profile; 0 when unconfigured.
    pub segment_length: u32,
    /// False if any variant failed.
    pub success: bool,
    pub variants: Vec<ProducedVariant>,
    pub errors: Vec<StageError>,
}

/// Outcome of the segment stage.
#[derive(Debug)]
pub struct SegmentResult {
    pub output_dir: PathBuf,
    pub format: StreamFormat,
    pub success: bool,
    /// Sub-manifest paths, one per successfully segmented variant.
    pub manifests: Vec<PathBuf>,
    pub errors: Vec<StageError>,
}

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AccState<K, T> {
    claimed: HashSet<K>,
    successes: Vec<T>,
    errors: Vec<StageError>,
    success: bool,
}

/// Collects results from concurrent workers.
///
/// Every method takes the lock for a single check, insert, or flip and
/// releases it before returning; callers never hold it across an await.
#[derive(Debug)]
pub struct ResultAccumulator<K, T> {
    state: Mutex<AccState<K, T>>,
}

impl<K: Hash + Eq, T> Default for ResultAccumulator<K, T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(AccState {
                claimed: HashSet::new(),
                successes: Vec::new(),
                errors: Vec::new(),
                success: true,
            }),
        }
    }
}

impl<K: Hash + Eq, T> ResultAccumulator<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for the calling worker. Returns false if another worker
    /// already holds it.
    pub fn claim(&self, key: K) -> bool {
        self.state.lock().claimed.insert(key)
    }

    pub fn record_success(&self, item: T) {
        self.state.lock().successes.push(item);
    }

    /// Record a failure and clear the aggregate success flag.
    pub fn record_failure(&self, error: StageError) {
        let mut state = self.state.lock();
        state.errors.push(error);
        state.success = false;
    }

    pub fn success(&self) -> bool {
        self.state.lock().success
    }

    /// Consume the accumulator: `(success, successes, errors)`.
    pub fn into_parts(self) -> (bool, Vec<T>, Vec<StageError>) {
        let state = self.state.into_inner();
        (state.success, state.successes, state.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::Stage;
    use std::sync::Arc;

    #[test]
    fn label_from_variant_filenames() {
        assert_eq!(label_from_filename("movie_720p_3000k.mp4"), "720p_3000k");
        assert_eq!(label_from_filename("my_home_movie_1080p_5000k.mkv"), "1080p_5000k");
        assert_eq!(label_from_filename("720p.mp4"), "720p");
        assert_eq!(label_from_filename("720p_3000k.mp4"), "720p_3000k");
    }

    #[test]
    fn claim_is_exclusive() {
        let acc: ResultAccumulator<&str, u32> = ResultAccumulator::new();
        assert!(acc.claim("720p_3000k"));
        assert!(!acc.claim("720p_3000k"));
        assert!(acc.claim("720p_2500k"));
    }

    #[test]
    fn failure_flips_flag_but_keeps_successes() {
        let acc: ResultAccumulator<u32, u32> = ResultAccumulator::new();
        acc.record_success(1);
        assert!(acc.success());
        acc.record_failure(StageError::new(Stage::Execution, "transcode", "in", "out", "x"));
        acc.record_success(2);
        let (ok, items, errors) = acc.into_parts();
        assert!(!ok);
        assert_eq!(items, vec![1, 2]);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn concurrent_claims_admit_one_winner() {
        let acc: Arc<ResultAccumulator<String, usize>> = Arc::new(ResultAccumulator::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    if acc.claim("1080p_5000k".to_string()) {
                        acc.record_success(i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let acc = Arc::try_unwrap(acc).unwrap();
        let (_, items, _) = acc.into_parts();
        assert_eq!(items.len(), 1);
    }
}
