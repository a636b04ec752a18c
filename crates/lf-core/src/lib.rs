//! lf-core: shared types, errors, rendition vocabulary, and profile
//! configuration.
//!
//! This crate is the foundational dependency for the other lf-* crates. It
//! carries no I/O beyond reading profile files: the rendition catalog, the
//! media descriptor model, and the structured error types used to report
//! per-variant failures all live here.

pub mod config;
pub mod error;
pub mod media;
pub mod rendition;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, ErrorKind, Result, Stage, StageError};
pub use media::*;
pub use rendition::{Bitrate, Catalog, Rendition, RenditionPreset};
