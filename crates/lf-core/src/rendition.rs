//! Rendition vocabulary: resolution tiers, bitrates, and the preset catalog.
//!
//! Labels such as `"720p"` and bitrates such as `"3000k"` are parsed once at
//! profile load into [`Rendition`] and [`Bitrate`]; everything downstream
//! works with the typed values.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Rendition
// ---------------------------------------------------------------------------

/// A canonical resolution tier.
///
/// Variants are declared in ascending order, so the derived [`Ord`] is the
/// canonical manifest order (144p first, 2160p last).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Rendition {
    P144,
    P240,
    P360,
    P480,
    P720,
    P1080,
    P1440,
    P2160,
}

impl Rendition {
    /// Every tier, lowest first.
    pub const ALL: [Rendition; 8] = [
        Rendition::P144,
        Rendition::P240,
        Rendition::P360,
        Rendition::P480,
        Rendition::P720,
        Rendition::P1080,
        Rendition::P1440,
        Rendition::P2160,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Rendition::P144 => "144p",
            Rendition::P240 => "240p",
            Rendition::P360 => "360p",
            Rendition::P480 => "480p",
            Rendition::P720 => "720p",
            Rendition::P1080 => "1080p",
            Rendition::P1440 => "1440p",
            Rendition::P2160 => "2160p",
        }
    }

    /// Pixel dimensions `(width, height)` of the tier.
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Rendition::P144 => (256, 144),
            Rendition::P240 => (426, 240),
            Rendition::P360 => (640, 360),
            Rendition::P480 => (854, 480),
            Rendition::P720 => (1280, 720),
            Rendition::P1080 => (1920, 1080),
            Rendition::P1440 => (2560, 1440),
            Rendition::P2160 => (3840, 2160),
        }
    }

    pub fn width(self) -> u32 {
        self.dimensions().0
    }

    pub fn height(self) -> u32 {
        self.dimensions().1
    }

    /// `WIDTHxHEIGHT`, as written into manifests.
    pub fn resolution_string(self) -> String {
        let (w, h) = self.dimensions();
        format!("{w}x{h}")
    }

    /// Nominal bandwidth in bits per second, used for manifest entries whose
    /// label carries no bitrate.
    pub fn nominal_bandwidth(self) -> u64 {
        match self {
            Rendition::P144 => 150_000,
            Rendition::P240 => 400_000,
            Rendition::P360 => 800_000,
            Rendition::P480 => 1_400_000,
            Rendition::P720 => 2_800_000,
            Rendition::P1080 => 5_000_000,
            Rendition::P1440 => 8_000_000,
            Rendition::P2160 => 14_000_000,
        }
    }

    /// SD tiers (480p and below).
    pub fn is_low_res(self) -> bool {
        self.height() <= 480
    }

    /// Resolve a label, ignoring case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        let normalized = normalize_label(label);
        Rendition::ALL
            .into_iter()
            .find(|r| r.label() == normalized)
    }
}

/// Lower-case and trim a rendition label.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_ascii_lowercase()
}

impl fmt::Display for Rendition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Rendition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Rendition::from_label(s)
            .ok_or_else(|| Error::Validation(format!("unknown rendition label '{}'", s.trim())))
    }
}

impl TryFrom<String> for Rendition {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Rendition> for String {
    fn from(r: Rendition) -> Self {
        r.label().to_string()
    }
}

// ---------------------------------------------------------------------------
// Bitrate
// ---------------------------------------------------------------------------

/// A video bitrate in kilobits per second.
///
/// Parses `"3000k"`, `"3000kbps"`, `"3000"` (kbps), `"2.5M"` and `"2.5mbps"`.
/// Displays as `"3000k"`, which is also the form passed to ffmpeg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "BitrateRepr", into = "String")]
pub struct Bitrate(u32);

impl Bitrate {
    pub fn from_kbps(kbps: u32) -> Result<Self> {
        if kbps == 0 {
            return Err(Error::Config("bitrate must be greater than zero".into()));
        }
        Ok(Self(kbps))
    }

    pub fn kbps(self) -> u32 {
        self.0
    }

    pub fn bits_per_second(self) -> u64 {
        u64::from(self.0) * 1000
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}k", self.0)
    }
}

impl FromStr for Bitrate {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let invalid = || Error::Config(format!("invalid bitrate '{}'", s.trim()));

        let (number, scale) = if let Some(n) = lower
            .strip_suffix("mbps")
            .or_else(|| lower.strip_suffix('m'))
        {
            (n, 1000.0)
        } else if let Some(n) = lower
            .strip_suffix("kbps")
            .or_else(|| lower.strip_suffix('k'))
        {
            (n, 1.0)
        } else {
            (lower.as_str(), 1.0)
        };

        let value: f64 = number.trim().parse().map_err(|_| invalid())?;
        if !value.is_finite() || value <= 0.0 {
            return Err(invalid());
        }
        let kbps = (value * scale).round();
        if kbps < 1.0 || kbps > f64::from(u32::MAX) {
            return Err(invalid());
        }
        Ok(Self(kbps as u32))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BitrateRepr {
    Text(String),
    Kbps(u32),
}

impl TryFrom<BitrateRepr> for Bitrate {
    type Error = Error;

    fn try_from(repr: BitrateRepr) -> Result<Self> {
        match repr {
            BitrateRepr::Text(s) => s.parse(),
            BitrateRepr::Kbps(n) => Bitrate::from_kbps(n),
        }
    }
}

impl From<Bitrate> for String {
    fn from(b: Bitrate) -> Self {
        b.to_string()
    }
}

// ---------------------------------------------------------------------------
// Presets and catalog
// ---------------------------------------------------------------------------

/// One catalog entry: a tier plus the bandwidth it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionPreset {
    pub rendition: Rendition,
    /// Minimum sustainable bandwidth for this tier, in kbps.
    pub min_bitrate_kbps: u32,
    #[serde(default)]
    pub is_default: bool,
}

impl RenditionPreset {
    pub const fn new(rendition: Rendition, min_bitrate_kbps: u32) -> Self {
        Self {
            rendition,
            min_bitrate_kbps,
            is_default: false,
        }
    }

    pub const fn default_tier(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn label(&self) -> &'static str {
        self.rendition.label()
    }

    pub fn width(&self) -> u32 {
        self.rendition.width()
    }

    pub fn height(&self) -> u32 {
        self.rendition.height()
    }

    /// Whether this preset fits a bandwidth budget. An unknown budget fits.
    pub fn fits_bandwidth(&self, bandwidth_kbps: Option<u32>) -> bool {
        bandwidth_kbps.map_or(true, |bw| self.min_bitrate_kbps <= bw)
    }

    /// Whether encoding a `width`x`height` source to this preset would upscale.
    pub fn upscales(&self, width: u32, height: u32) -> bool {
        self.width() > width || self.height() > height
    }
}

const STANDARD_PRESETS: [RenditionPreset; 8] = [
    RenditionPreset::new(Rendition::P2160, 12_000),
    RenditionPreset::new(Rendition::P1440, 8_000),
    RenditionPreset::new(Rendition::P1080, 5_000).default_tier(),
    RenditionPreset::new(Rendition::P720, 2_500),
    RenditionPreset::new(Rendition::P480, 1_000),
    RenditionPreset::new(Rendition::P360, 600),
    RenditionPreset::new(Rendition::P240, 300),
    RenditionPreset::new(Rendition::P144, 100),
];

/// An ordered table of presets, highest resolution first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    presets: Vec<RenditionPreset>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl Catalog {
    /// The built-in ladder: 2160p down to 144p with 1080p as the default.
    pub fn standard() -> Self {
        Self {
            presets: STANDARD_PRESETS.to_vec(),
        }
    }

    /// Build a catalog from arbitrary presets. Table order is kept as given;
    /// callers are expected to list higher tiers first.
    pub fn new(presets: Vec<RenditionPreset>) -> Self {
        Self { presets }
    }

    pub fn presets(&self) -> &[RenditionPreset] {
        &self.presets
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &RenditionPreset> {
        self.presets.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    pub fn get(&self, rendition: Rendition) -> Option<&RenditionPreset> {
        self.presets.iter().find(|p| p.rendition == rendition)
    }

    /// Resolve a label, ignoring case and surrounding whitespace.
    pub fn find(&self, label: &str) -> Option<&RenditionPreset> {
        Rendition::from_label(label).and_then(|r| self.get(r))
    }

    /// The designated fallback preset, if the table has one.
    pub fn default_preset(&self) -> Option<&RenditionPreset> {
        self.presets.iter().find(|p| p.is_default)
    }

    /// Presets sorted by minimum bitrate, cheapest first. Ties keep table
    /// order.
    pub fn by_min_bitrate(&self) -> Vec<&RenditionPreset> {
        let mut sorted: Vec<&RenditionPreset> = self.presets.iter().collect();
        sorted.sort_by_key(|p| p.min_bitrate_kbps);
        sorted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_parsing_is_lenient() {
        assert_eq!(Rendition::from_label("720p"), Some(Rendition::P720));
        assert_eq!(Rendition::from_label("  1080P "), Some(Rendition::P1080));
        assert_eq!(Rendition::from_label("4k"), None);
        assert!("999p".parse::<Rendition>().is_err());
    }

    #[test]
    fn canonical_order_is_ascending() {
        let mut shuffled = vec![Rendition::P720, Rendition::P144, Rendition::P1080];
        shuffled.sort();
        assert_eq!(
            shuffled,
            vec![Rendition::P144, Rendition::P720, Rendition::P1080]
        );
        assert!(Rendition::ALL.windows(2).all(|w| w[0].height() < w[1].height()));
    }

    #[test]
    fn rendition_serde_uses_labels() {
        let json = serde_json::to_string(&Rendition::P480).unwrap();
        assert_eq!(json, "\"480p\"");
        let back: Rendition = serde_json::from_str("\"480P\"").unwrap();
        assert_eq!(back, Rendition::P480);
    }

    #[test]
    fn bitrate_forms() {
        assert_eq!("3000k".parse::<Bitrate>().unwrap().kbps(), 3000);
        assert_eq!("3000".parse::<Bitrate>().unwrap().kbps(), 3000);
        assert_eq!("3000kbps".parse::<Bitrate>().unwrap().kbps(), 3000);
        assert_eq!("2.5M".parse::<Bitrate>().unwrap().kbps(), 2500);
        assert_eq!(" 8mbps ".parse::<Bitrate>().unwrap().kbps(), 8000);
        assert_eq!("3000k".parse::<Bitrate>().unwrap().bits_per_second(), 3_000_000);
    }

    #[test]
    fn bitrate_rejects_garbage() {
        assert!("".parse::<Bitrate>().is_err());
        assert!("fast".parse::<Bitrate>().is_err());
        assert!("0k".parse::<Bitrate>().is_err());
        assert!("-5k".parse::<Bitrate>().is_err());
        assert!(Bitrate::from_kbps(0).is_err());
    }

    #[test]
    fn bitrate_display_and_serde() {
        let b: Bitrate = "2500k".parse().unwrap();
        assert_eq!(b.to_string(), "2500k");
        let from_number: Bitrate = serde_json::from_str("1500").unwrap();
        assert_eq!(from_number.kbps(), 1500);
        let from_text: Bitrate = serde_json::from_str("\"1.5M\"").unwrap();
        assert_eq!(from_text, from_number);
        assert_eq!(serde_json::to_string(&from_text).unwrap(), "\"1500k\"");
    }

    #[test]
    fn standard_catalog_shape() {
        let catalog = Catalog::standard();
        assert_eq!(catalog.presets().len(), 8);
        assert_eq!(
            catalog.presets().iter().filter(|p| p.is_default).count(),
            1
        );
        assert_eq!(catalog.default_preset().unwrap().label(), "1080p");
        assert!(catalog
            .presets()
            .windows(2)
            .all(|w| w[0].height() > w[1].height()));
    }

    #[test]
    fn catalog_find_is_lenient() {
        let catalog = Catalog::standard();
        let p = catalog.find(" 720P").unwrap();
        assert_eq!((p.width(), p.height()), (1280, 720));
        assert_eq!(p.min_bitrate_kbps, 2500);
        assert!(catalog.find("8k").is_none());
    }

    #[test]
    fn by_min_bitrate_is_ascending() {
        let catalog = Catalog::standard();
        let labels: Vec<&str> = catalog.by_min_bitrate().iter().map(|p| p.label()).collect();
        assert_eq!(
            labels,
            vec!["144p", "240p", "360p", "480p", "720p", "1080p", "1440p", "2160p"]
        );
    }

    #[test]
    fn preset_predicates() {
        let p720 = *Catalog::standard().get(Rendition::P720).unwrap();
        assert!(p720.fits_bandwidth(None));
        assert!(p720.fits_bandwidth(Some(2500)));
        assert!(!p720.fits_bandwidth(Some(2499)));
        assert!(p720.upscales(640, 360));
        assert!(!p720.upscales(1920, 1080));
    }
}
