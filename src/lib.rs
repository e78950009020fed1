//! Kagami, a real-time virtual try-on engine.
//!
//! Kagami takes a live camera feed, locates facial landmarks every frame, and
//! composites a scaled and rotated product image (e.g. sunglasses) onto the
//! face, degrading gracefully while no face is visible or the overlay asset
//! is still loading.
//!
//! The pipeline: a [`viewport::Viewport`] keeps camera and surface space 1:1
//! and applies the selfie mirror; a [`capture::CaptureSession`] pulls frames
//! and drives a [`detector::Detector`] (any [`landmark::LandmarkModel`]
//! behind it); the [`compositor::Compositor`] places the
//! [`assets::AssetCache`]-resolved overlay onto the [`surface::Surface`].
//!
//! Coordinates are y-down surface pixels throughout. When mirroring is on,
//! frames are flipped once before detection, so every keypoint, angle and
//! offset already lives in mirrored space.

use log::LevelFilter;

pub mod assets;
pub mod capture;
pub mod compositor;
pub mod detector;
pub mod error;
pub mod filter;
pub mod image;
pub mod landmark;
pub mod surface;
pub mod timer;
pub mod viewport;
pub mod webcam;

pub use error::{Error, Result};

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_PKG_NAME")), log_level)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and kagami will
/// log at *trace* level. Otherwise, they will log at *debug* level.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
