//! Overlay placement and compositing.
//!
//! Pure per-frame geometry: given one face's keypoints and a loaded overlay
//! asset, compute where the overlay goes (position, roll angle, scale) and
//! draw it onto the surface. Placement is a function of the current frame's
//! inputs plus the tunable constants in [`PlacementConfig`]; nothing is
//! carried across frames unless smoothing is explicitly enabled.

use nalgebra::{Point2, Rotation2, Vector2};
use serde::{Deserialize, Serialize};

use crate::assets::OverlayAsset;
use crate::filter::{Ema, Filter};
use crate::landmark::FaceEstimate;
use crate::surface::Surface;

/// Display configuration supplied by the host (product page / sliders).
///
/// Immutable per frame; the session re-reads it every iteration, so slider
/// updates take effect on the next frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    /// Overlay asset reference (URL, path, data URI, or raw base64).
    pub asset: String,
    /// User scale multiplier on top of the face-derived scale.
    pub scale: f32,
    /// Overlay opacity in `[0, 1]`; out-of-range values are clamped at draw
    /// time.
    pub opacity: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            asset: String::new(),
            scale: 1.0,
            opacity: 0.9,
        }
    }
}

/// The empirically tuned placement constants, exposed as configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Eye distance (in surface pixels) at which the overlay draws at its
    /// authored size. Calibrated against the reference asset set.
    pub reference_eye_distance: f32,
    /// Fraction of the draw height the anchor drops below the eye line, since
    /// the eye line is not the geometric center of a glasses-shaped asset.
    pub eye_line_drop: f32,
    /// EMA smoothing factor for position/angle/scale. `None` reproduces the
    /// raw per-frame placement.
    pub smoothing: Option<f32>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            reference_eye_distance: 120.0,
            eye_line_drop: 0.12,
            smoothing: None,
        }
    }
}

/// A computed overlay placement for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    /// Overlay center on the surface, in pixels.
    pub center: Point2<f32>,
    /// Clockwise roll of the eye line, in radians.
    pub angle: f32,
    pub width: f32,
    pub height: f32,
    /// Effective opacity, clamped to `[0, 1]`.
    pub opacity: f32,
}

/// Why a frame produced no overlay.
///
/// These are expected, frequent and harmless; the loop logs them at trace
/// level and moves on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSkip {
    /// The estimate is missing one or both eye keypoints.
    MissingEyes,
    /// Keypoints are non-finite or coincident; no usable geometry.
    DegenerateGeometry,
    /// The asset is a cached byte payload, not a drawable image.
    NotDrawable,
}

pub struct Compositor {
    config: PlacementConfig,
    smoother: Option<Smoother>,
}

struct Smoother {
    x: Ema,
    y: Ema,
    angle: Ema,
    scale: Ema,
}

impl Smoother {
    fn new(alpha: f32) -> Self {
        let ema = Ema::new(alpha);
        Self {
            x: ema,
            y: ema,
            angle: ema,
            scale: ema,
        }
    }

    fn reset(&mut self) {
        self.x.reset();
        self.y.reset();
        self.angle.reset();
        self.scale.reset();
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new(PlacementConfig::default())
    }
}

impl Compositor {
    pub fn new(config: PlacementConfig) -> Self {
        let smoother = config.smoothing.map(Smoother::new);
        Self { config, smoother }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    /// Drops accumulated smoothing state.
    ///
    /// Called when the face is lost so the overlay doesn't glide in from its
    /// last known position when a face reappears.
    pub fn reset(&mut self) {
        if let Some(smoother) = &mut self.smoother {
            smoother.reset();
        }
    }

    /// Computes the placement for `face` and `asset` without drawing.
    pub fn plan(
        &mut self,
        face: &FaceEstimate,
        asset: &OverlayAsset,
        options: &RenderOptions,
    ) -> Result<Placement, FrameSkip> {
        let (left, right) = match (face.left_eye(), face.right_eye()) {
            (Some(left), Some(right)) => (left, right),
            _ => return Err(FrameSkip::MissingEyes),
        };
        if !left.is_finite() || !right.is_finite() {
            return Err(FrameSkip::DegenerateGeometry);
        }

        let eye_line = Vector2::new(right.x() - left.x(), right.y() - left.y());
        let eye_distance = eye_line.norm();
        if !(eye_distance > 0.0) {
            return Err(FrameSkip::DegenerateGeometry);
        }

        let sprite = asset.image().ok_or(FrameSkip::NotDrawable)?;

        let mut angle = Rotation2::rotation_between(&Vector2::x(), &eye_line).angle();
        let mut scale = eye_distance / self.config.reference_eye_distance * options.scale;
        let mut center_x = (left.x() + right.x()) / 2.0;
        let mut center_y = (left.y() + right.y()) / 2.0;

        if let Some(smoother) = &mut self.smoother {
            center_x = smoother.x.push(center_x);
            center_y = smoother.y.push(center_y);
            angle = smoother.angle.push(angle);
            scale = smoother.scale.push(scale);
        }

        let width = sprite.width() as f32 * scale;
        let height = sprite.height() as f32 * scale;
        // Drop the anchor below the eye midpoint, in screen space (the
        // translate happens before the rotation).
        let center_y = center_y + self.config.eye_line_drop * height;

        Ok(Placement {
            center: Point2::new(center_x, center_y),
            angle,
            width,
            height,
            opacity: options.opacity.clamp(0.0, 1.0),
        })
    }

    /// Computes the placement and draws the overlay onto `surface`.
    ///
    /// On a skip, no drawing operation is performed at all. Clearing the
    /// surface is the caller's job (once per frame, drawn or not).
    pub fn composite(
        &mut self,
        face: &FaceEstimate,
        asset: &OverlayAsset,
        options: &RenderOptions,
        surface: &mut Surface,
    ) -> Result<Placement, FrameSkip> {
        let placement = self.plan(face, asset, options)?;
        let sprite = asset.image().expect("plan admits drawable assets only");
        surface.draw_sprite(
            sprite,
            (placement.center.x, placement.center.y),
            placement.angle,
            (placement.width, placement.height),
            placement.opacity,
        );
        Ok(placement)
    }
}
