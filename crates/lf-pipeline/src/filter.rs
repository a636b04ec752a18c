//! Trim the requested ladder to what the source can support.

use std::collections::HashSet;

use lf_core::config::RequestedVariant;
use lf_core::{Catalog, Error, Result};

use crate::logger::PipelineLogger;

const STAGE: &str = "filter";

/// Keep the requested variants a `source_height` source can feed.
///
/// Labels missing from `catalog` are dropped, as are variants taller than
/// the source (batch encoding never upscales) and repeats of an earlier
/// (label, bitrate) pair. Request order is preserved.
///
/// # Errors
///
/// [`Error::Validation`] when nothing survives.
pub fn filter_variants(
    requested: &[RequestedVariant],
    source_height: u32,
    catalog: &Catalog,
    logger: &dyn PipelineLogger,
) -> Result<Vec<RequestedVariant>> {
    let mut seen = HashSet::new();
    let mut allowed = Vec::with_capacity(requested.len());

    for variant in requested {
        let key = variant.key();
        let Some(preset) = catalog.find(&variant.resolution) else {
            logger.variant(
                &key.to_string(),
                &format!("Unknown resolution '{}'; skipping", variant.resolution),
            );
            continue;
        };

        if preset.height() > source_height {
            logger.variant(
                &key.to_string(),
                &format!(
                    "{}px exceeds source height {source_height}px; skipping",
                    preset.height()
                ),
            );
            continue;
        }

        if !seen.insert(key.clone()) {
            logger.variant(&key.to_string(), "Duplicate variant; skipping");
            continue;
        }

        allowed.push(variant.clone());
    }

    if allowed.is_empty() {
        return Err(Error::Validation(format!(
            "no requested variant fits a {source_height}px source"
        )));
    }

    logger.stage(
        STAGE,
        &format!("{} of {} requested variants kept", allowed.len(), requested.len()),
    );
    Ok(allowed)
}
