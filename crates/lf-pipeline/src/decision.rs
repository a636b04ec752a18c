//! Rendition decision engine.
//!
//! [`select_initial`] picks the rendition a client should start with;
//! [`adjust`] moves it up or down as bandwidth and playback stability
//! change. Both are pure: the caller owns the [`ClientContext`] and passes it
//! in on every call.

use std::fmt;
use std::str::FromStr;

use lf_core::{Catalog, Error, RenditionPreset, Result};
use serde::{Deserialize, Serialize};

/// Consecutive playback failures at which [`adjust`] steps down.
pub const INSTABILITY_THRESHOLD: u32 = 3;

/// Bandwidth (kbps) below which a client counts as constrained.
pub const CONSTRAINED_BANDWIDTH_KBPS: u32 = 2500;

// ---------------------------------------------------------------------------
// Client context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Mobile,
    Desktop,
    Tv,
    #[default]
    Unknown,
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceClass::Mobile => "mobile",
            DeviceClass::Desktop => "desktop",
            DeviceClass::Tv => "tv",
            DeviceClass::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for DeviceClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" | "phone" | "tablet" => Ok(DeviceClass::Mobile),
            "desktop" | "web" => Ok(DeviceClass::Desktop),
            "tv" => Ok(DeviceClass::Tv),
            "unknown" | "" => Ok(DeviceClass::Unknown),
            other => Err(Error::Validation(format!("unknown device class '{other}'"))),
        }
    }
}

/// Client signals for a decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientContext {
    pub device: DeviceClass,
    /// Current bandwidth estimate in kbps; `None` or `0` when unknown.
    pub bandwidth_kbps: Option<u32>,
    pub prefer_upscale: bool,
    /// Whether SD tiers (480p and below) are acceptable candidates.
    pub allow_low_res: bool,
    /// Label forced by the viewer, matched case/whitespace-insensitively.
    pub manual_override: Option<String>,
    /// Recent playback failures (stalls, decode errors).
    pub recent_failures: u32,
    pub adaptive: bool,
}

impl Default for ClientContext {
    fn default() -> Self {
        Self {
            device: DeviceClass::Unknown,
            bandwidth_kbps: None,
            prefer_upscale: false,
            allow_low_res: true,
            manual_override: None,
            recent_failures: 0,
            adaptive: true,
        }
    }
}

impl ClientContext {
    pub fn is_mobile(&self) -> bool {
        self.device == DeviceClass::Mobile
    }

    /// The bandwidth estimate, with a zero reading treated as unknown.
    pub fn bandwidth(&self) -> Option<u32> {
        self.bandwidth_kbps.filter(|&bw| bw > 0)
    }

    pub fn is_bandwidth_constrained(&self) -> bool {
        self.bandwidth()
            .is_some_and(|bw| bw < CONSTRAINED_BANDWIDTH_KBPS)
    }

    fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(bw) = self.bandwidth() {
            parts.push(format!("bandwidth {bw}kbps"));
        }
        if self.device != DeviceClass::Unknown {
            parts.push(format!("device {}", self.device));
        }
        if self.prefer_upscale {
            parts.push("upscaling preferred".to_string());
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" ({})", parts.join(", "))
        }
    }
}

/// A chosen preset and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub preset: RenditionPreset,
    pub rationale: String,
}

impl Decision {
    /// One-line description for logs and CLI output.
    pub fn summary(&self) -> String {
        format!(
            "{} ({}x{}, min {}kbps): {}",
            self.preset.label(),
            self.preset.width(),
            self.preset.height(),
            self.preset.min_bitrate_kbps,
            self.rationale
        )
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Choose the initial rendition for a `source_width`x`source_height` source.
///
/// Presets are tried in catalog order, skipping those that would upscale
/// (unless the context prefers upscaling) and those whose minimum bitrate
/// exceeds a known bandwidth. When nothing qualifies the catalog default is
/// used, clamped to the largest preset that fits the source if the default
/// itself would upscale.
///
/// # Errors
///
/// [`Error::NoSuitableRendition`] when the catalog has no default, or when
/// no preset fits the source at all. Both are terminal.
pub fn select_initial(
    catalog: &Catalog,
    source_width: u32,
    source_height: u32,
    ctx: Option<&ClientContext>,
) -> Result<Decision> {
    let default_ctx = ClientContext::default();
    let ctx = ctx.unwrap_or(&default_ctx);
    let context = ctx.describe();

    let chosen = catalog.iter().find(|p| {
        (ctx.prefer_upscale || !p.upscales(source_width, source_height))
            && p.fits_bandwidth(ctx.bandwidth())
    });

    if let Some(p) = chosen {
        return Ok(Decision {
            preset: *p,
            rationale: format!(
                "Selected {} based on source {source_width}x{source_height}{context}",
                p.label()
            ),
        });
    }

    let default = catalog.default_preset().ok_or_else(|| {
        Error::NoSuitableRendition(format!(
            "no preset fits source {source_width}x{source_height}{context} and the catalog has no default"
        ))
    })?;

    if ctx.prefer_upscale || !default.upscales(source_width, source_height) {
        return Ok(Decision {
            preset: *default,
            rationale: format!(
                "No preset satisfied source {source_width}x{source_height}{context}; fell back to default {}",
                default.label()
            ),
        });
    }

    let fitting = catalog
        .iter()
        .filter(|p| !p.upscales(source_width, source_height))
        .max_by_key(|p| p.height())
        .ok_or_else(|| {
            Error::NoSuitableRendition(format!(
                "no preset fits source {source_width}x{source_height}"
            ))
        })?;

    Ok(Decision {
        preset: *fitting,
        rationale: format!(
            "No preset satisfied source {source_width}x{source_height}{context}; fell back to {} (default {} would upscale)",
            fitting.label(),
            default.label()
        ),
    })
}

/// Every preset acceptable for the source and context, in catalog order.
///
/// Unlike [`select_initial`] this also honours
/// [`ClientContext::allow_low_res`].
pub fn select_candidates(
    catalog: &Catalog,
    source_width: u32,
    source_height: u32,
    ctx: &ClientContext,
) -> Result<Vec<RenditionPreset>> {
    let candidates: Vec<RenditionPreset> = catalog
        .iter()
        .filter(|p| ctx.prefer_upscale || !p.upscales(source_width, source_height))
        .filter(|p| ctx.allow_low_res || !p.rendition.is_low_res())
        .filter(|p| p.fits_bandwidth(ctx.bandwidth()))
        .copied()
        .collect();

    if candidates.is_empty() {
        return Err(Error::NoSuitableRendition(format!(
            "no preset fits source {source_width}x{source_height}{}",
            ctx.describe()
        )));
    }
    Ok(candidates)
}

// ---------------------------------------------------------------------------
// Adjustment
// ---------------------------------------------------------------------------

/// Re-evaluate `current` against fresh client signals.
///
/// In priority order: a manual override present in the catalog wins;
/// non-adaptive clients stay put; [`INSTABILITY_THRESHOLD`] or more failures
/// step down to the smallest in-budget preset below `current`; zero failures
/// step up to the cheapest in-budget preset above `current`; anything in
/// between holds. An unknown bandwidth permits stepping down but never up.
/// Never fails: the worst case returns `current`.
pub fn adjust(catalog: &Catalog, current: &RenditionPreset, ctx: &ClientContext) -> RenditionPreset {
    if let Some(label) = ctx.manual_override.as_deref() {
        match catalog.find(label) {
            Some(p) => return *p,
            None => tracing::debug!("Manual override '{label}' not in catalog; ignoring"),
        }
    }

    if !ctx.adaptive {
        return *current;
    }

    if ctx.recent_failures >= INSTABILITY_THRESHOLD {
        return catalog
            .iter()
            .rev()
            .find(|p| p.fits_bandwidth(ctx.bandwidth()) && p.height() < current.height())
            .copied()
            .unwrap_or(*current);
    }

    if ctx.recent_failures == 0 {
        let Some(bw) = ctx.bandwidth() else {
            return *current;
        };
        return catalog
            .by_min_bitrate()
            .into_iter()
            .find(|p| p.min_bitrate_kbps <= bw && p.height() > current.height())
            .copied()
            .unwrap_or(*current);
    }

    *current
}

#[cfg(test)]
mod tests {
    use super::*;
    use lf_core::Rendition;

    fn preset(catalog: &Catalog, label: &str) -> RenditionPreset {
        *catalog.find(label).unwrap()
    }

    fn ctx_bw(bw: u32) -> ClientContext {
        ClientContext {
            bandwidth_kbps: Some(bw),
            ..ClientContext::default()
        }
    }

    #[test]
    fn select_matches_source() {
        let catalog = Catalog::standard();
        let d = select_initial(&catalog, 1920, 1080, None).unwrap();
        assert_eq!(d.preset.label(), "1080p");
        assert_eq!(d.rationale, "Selected 1080p based on source 1920x1080");
    }

    #[test]
    fn select_respects_bandwidth() {
        let catalog = Catalog::standard();
        let d = select_initial(&catalog, 3840, 2160, Some(&ctx_bw(3000))).unwrap();
        assert_eq!(d.preset.label(), "720p");
        assert!(d.rationale.contains("bandwidth 3000kbps"), "{}", d.rationale);
    }

    #[test]
    fn select_upscale_when_preferred() {
        let catalog = Catalog::standard();
        let ctx = ClientContext {
            prefer_upscale: true,
            ..ClientContext::default()
        };
        let d = select_initial(&catalog, 640, 360, Some(&ctx)).unwrap();
        assert_eq!(d.preset.label(), "2160p");
    }

    #[test]
    fn select_never_upscales_without_preference() {
        let catalog = Catalog::standard();
        for h in (144..=2400).step_by(7) {
            let w = h * 16 / 9 + 1;
            for bw in [None, Some(50), Some(700), Some(4000), Some(20_000)] {
                let ctx = ClientContext {
                    bandwidth_kbps: bw,
                    ..ClientContext::default()
                };
                let d = select_initial(&catalog, w, h, Some(&ctx)).unwrap();
                assert!(d.preset.height() <= h, "h={h} bw={bw:?} -> {}", d.preset.label());
            }
        }
    }

    #[test]
    fn fallback_to_default_when_bandwidth_too_low() {
        let catalog = Catalog::standard();
        let d = select_initial(&catalog, 3840, 2160, Some(&ctx_bw(50))).unwrap();
        assert_eq!(d.preset.label(), "1080p");
        assert!(d.rationale.contains("fell back to default 1080p"));
    }

    #[test]
    fn fallback_clamped_to_source() {
        let catalog = Catalog::standard();
        let d = select_initial(&catalog, 854, 480, Some(&ctx_bw(50))).unwrap();
        assert_eq!(d.preset.label(), "480p");
        assert!(d.rationale.contains("would upscale"));
    }

    #[test]
    fn tiny_source_has_no_rendition() {
        let catalog = Catalog::standard();
        let err = select_initial(&catalog, 100, 80, None).unwrap_err();
        assert!(matches!(err, Error::NoSuitableRendition(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn catalog_without_default_is_terminal() {
        let catalog = Catalog::new(vec![RenditionPreset::new(Rendition::P2160, 12_000)]);
        let err = select_initial(&catalog, 1920, 1080, None).unwrap_err();
        assert!(matches!(err, Error::NoSuitableRendition(_)));
    }

    #[test]
    fn candidates_exclude_low_res_when_disallowed() {
        let catalog = Catalog::standard();
        let ctx = ClientContext {
            allow_low_res: false,
            ..ClientContext::default()
        };
        let labels: Vec<&str> = select_candidates(&catalog, 1920, 1080, &ctx)
            .unwrap()
            .iter()
            .map(|p| p.label())
            .collect();
        assert_eq!(labels, vec!["1080p", "720p"]);

        let err = select_candidates(&catalog, 854, 480, &ctx).unwrap_err();
        assert!(matches!(err, Error::NoSuitableRendition(_)));
    }

    #[test]
    fn override_wins() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "1080p");
        for failures in 0..6 {
            for adaptive in [true, false] {
                let ctx = ClientContext {
                    manual_override: Some("  360P ".into()),
                    recent_failures: failures,
                    adaptive,
                    bandwidth_kbps: Some(100_000),
                    ..ClientContext::default()
                };
                assert_eq!(adjust(&catalog, &current, &ctx).label(), "360p");
            }
        }
    }

    #[test]
    fn unknown_override_falls_through() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "720p");
        let ctx = ClientContext {
            manual_override: Some("8k".into()),
            adaptive: false,
            ..ClientContext::default()
        };
        assert_eq!(adjust(&catalog, &current, &ctx), current);
    }

    #[test]
    fn non_adaptive_holds() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "720p");
        let ctx = ClientContext {
            adaptive: false,
            bandwidth_kbps: Some(50_000),
            ..ClientContext::default()
        };
        assert_eq!(adjust(&catalog, &current, &ctx), current);
    }

    #[test]
    fn instability_steps_down() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "1080p");
        let ctx = ClientContext {
            recent_failures: 3,
            bandwidth_kbps: Some(1000),
            ..ClientContext::default()
        };
        let next = adjust(&catalog, &current, &ctx);
        assert!(next.height() < current.height());
        assert!(next.min_bitrate_kbps <= 1000);
        assert_eq!(next.label(), "144p");
    }

    #[test]
    fn instability_at_floor_holds() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "144p");
        let ctx = ClientContext {
            recent_failures: 5,
            ..ClientContext::default()
        };
        assert_eq!(adjust(&catalog, &current, &ctx), current);
    }

    #[test]
    fn stable_steps_up_one_tier() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "480p");
        let next = adjust(&catalog, &current, &ctx_bw(6000));
        assert_eq!(next.label(), "720p");
    }

    #[test]
    fn stable_without_headroom_holds() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "720p");
        assert_eq!(adjust(&catalog, &current, &ctx_bw(4000)), current);
    }

    #[test]
    fn stable_with_unknown_bandwidth_holds() {
        let catalog = Catalog::standard();
        let current = preset(&catalog, "480p");
        assert_eq!(adjust(&catalog, &current, &ClientContext::default()), current);
    }

    #[test]
    fn zero_bandwidth_reading_is_unknown() {
        let catalog = Catalog::standard();
        let ctx = ctx_bw(0);
        assert_eq!(ctx.bandwidth(), None);
        assert!(!ctx.is_bandwidth_constrained());

        let d = select_initial(&catalog, 3840, 2160, Some(&ctx)).unwrap();
        assert_eq!(d.preset.label(), "2160p");
        assert!(!d.rationale.contains("fell back"), "{}", d.rationale);

        let current = preset(&catalog, "480p");
        assert_eq!(adjust(&catalog, &current, &ctx), current);
    }

    #[test]
    fn hysteresis_band_holds() {
        let catalog = Catalog::standard();
        for label in ["144p", "480p", "1080p", "2160p"] {
            let current = preset(&catalog, label);
            for failures in [1, 2] {
                for bw in [None, Some(10), Some(3000), Some(100_000)] {
                    let ctx = ClientContext {
                        recent_failures: failures,
                        bandwidth_kbps: bw,
                        ..ClientContext::default()
                    };
                    assert_eq!(adjust(&catalog, &current, &ctx), current);
                }
            }
        }
    }

    #[test]
    fn adjust_is_deterministic() {
        let catalog = Catalog::standard();
        for label in ["240p", "720p", "1440p"] {
            let current = preset(&catalog, label);
            for failures in 0..5 {
                for bw in [None, Some(500), Some(9000)] {
                    let ctx = ClientContext {
                        recent_failures: failures,
                        bandwidth_kbps: bw,
                        ..ClientContext::default()
                    };
                    let a = adjust(&catalog, &current, &ctx);
                    let b = adjust(&catalog, &current, &ctx);
                    assert_eq!(a, b);
                }
            }
        }
    }

    #[test]
    fn context_helpers() {
        let ctx = ClientContext {
            device: "Phone".parse().unwrap(),
            bandwidth_kbps: Some(1200),
            ..ClientContext::default()
        };
        assert!(ctx.is_mobile());
        assert!(ctx.is_bandwidth_constrained());
        assert!(!ClientContext::default().is_bandwidth_constrained());
        assert!("smartwatch".parse::<DeviceClass>().is_err());
    }
}
