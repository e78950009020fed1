//! The 2D drawing surface the compositor paints onto.
//!
//! The surface holds the overlay layer only, on a transparent background; the
//! host presents it on top of its own video output. Drawing goes through
//! [`Surface::draw_sprite`], which samples the sprite through the inverse of
//! the placement transform and alpha-blends in linear light.

use nalgebra::{Rotation2, Vector2};

use crate::image::{Color, Image};
use crate::viewport::Resolution;

pub struct Surface {
    image: Image,
}

impl Surface {
    /// Creates a cleared surface of the given size.
    pub fn new(resolution: Resolution) -> Self {
        Self {
            image: Image::new(resolution.width(), resolution.height()),
        }
    }

    #[inline]
    pub fn resolution(&self) -> Resolution {
        self.image.resolution()
    }

    /// Read access to the surface contents (snapshots, tests).
    #[inline]
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Clears the surface to fully transparent.
    pub fn clear(&mut self) {
        self.image.clear(Color::NULL);
    }

    /// Reallocates the backing store when the viewport resolution changed.
    ///
    /// The new surface starts out cleared.
    pub fn match_resolution(&mut self, resolution: Resolution) {
        if self.resolution() != resolution {
            log::debug!("surface resize {} -> {}", self.resolution(), resolution);
            self.image = Image::new(resolution.width(), resolution.height());
        }
    }

    /// Serializes the current surface contents as PNG.
    pub fn snapshot_png(&self) -> anyhow::Result<Vec<u8>> {
        self.image.encode_png()
    }

    /// Draws `sprite` centered at `center`, rotated by `angle` radians
    /// (clockwise, y-down), stretched to `size` pixels, with its alpha scaled
    /// by `opacity`.
    ///
    /// Pixels outside the surface are discarded. A degenerate size or a fully
    /// transparent opacity draws nothing.
    pub fn draw_sprite(
        &mut self,
        sprite: &Image,
        center: (f32, f32),
        angle: f32,
        size: (f32, f32),
        opacity: f32,
    ) {
        let (half_w, half_h) = (size.0 / 2.0, size.1 / 2.0);
        if !(half_w > 0.0 && half_h > 0.0) || opacity <= 0.0 {
            return;
        }
        if sprite.width() == 0 || sprite.height() == 0 {
            return;
        }

        // Destination bounding box of the rotated rectangle, clamped to the
        // surface.
        let rot = Rotation2::new(angle);
        let extent_x = (rot * Vector2::new(half_w, 0.0)).x.abs()
            + (rot * Vector2::new(0.0, half_h)).x.abs();
        let extent_y = (rot * Vector2::new(half_w, 0.0)).y.abs()
            + (rot * Vector2::new(0.0, half_h)).y.abs();
        let x_min = ((center.0 - extent_x).floor().max(0.0)) as u32;
        let y_min = ((center.1 - extent_y).floor().max(0.0)) as u32;
        let x_max = ((center.0 + extent_x).ceil() as i64).clamp(0, i64::from(self.image.width()));
        let y_max = ((center.1 + extent_y).ceil() as i64).clamp(0, i64::from(self.image.height()));

        let inv = Rotation2::new(-angle);
        for y in y_min..y_max as u32 {
            for x in x_min..x_max as u32 {
                let delta = Vector2::new(x as f32 + 0.5 - center.0, y as f32 + 0.5 - center.1);
                let local = inv * delta;
                if local.x.abs() > half_w || local.y.abs() > half_h {
                    continue;
                }

                let src_x = ((local.x + half_w) / size.0 * sprite.width() as f32) as u32;
                let src_y = ((local.y + half_h) / size.1 * sprite.height() as f32) as u32;
                let src_x = src_x.min(sprite.width() - 1);
                let src_y = src_y.min(sprite.height() - 1);

                let mut src = sprite.get(src_x, src_y);
                src.0[3] = (f32::from(src.0[3]) * opacity) as u8;
                if src.a() == 0 {
                    continue;
                }

                let blended = blend_alpha(self.image.get(x, y), src);
                self.image.set(x, y, blended);
            }
        }
    }
}

fn blend_alpha(dest: Color, src: Color) -> Color {
    fn blend_channel(dest: f32, src: f32, dest_a: f32, src_a: f32, out_a: f32) -> f32 {
        (src * src_a + dest * dest_a * (1.0 - src_a)) / out_a
    }

    let dest = LinearColor::new(dest);
    let src = LinearColor::new(src);

    let out_a = src.a() + dest.a() * (1.0 - src.a());
    if out_a == 0.0 {
        return Color::NULL;
    }
    let r = blend_channel(dest.r(), src.r(), dest.a(), src.a(), out_a);
    let g = blend_channel(dest.g(), src.g(), dest.a(), src.a(), out_a);
    let b = blend_channel(dest.b(), src.b(), dest.a(), src.a(), out_a);

    LinearColor([r, g, b, out_a]).to_color()
}

/// Color converted from sRGB to linear light; alpha is not gamma-encoded.
struct LinearColor([f32; 4]);

impl LinearColor {
    fn new(color: Color) -> Self {
        fn to_linear(srgb: f32) -> f32 {
            if srgb <= 0.04045 {
                srgb / 12.92
            } else {
                ((srgb + 0.055) / 1.055).powf(2.4)
            }
        }

        let [r, g, b, a] = color.0.map(|c| f32::from(c) / 255.0);
        Self([to_linear(r), to_linear(g), to_linear(b), a])
    }

    fn to_color(&self) -> Color {
        fn to_srgb(linear: f32) -> f32 {
            if linear <= 0.0031308 {
                linear * 12.92
            } else {
                1.055 * linear.powf(1.0 / 2.4) - 0.055
            }
        }

        let [r, g, b, a] = self.0;
        let (r, g, b) = (to_srgb(r), to_srgb(g), to_srgb(b));
        Color([
            (r * 255.0) as u8,
            (g * 255.0) as u8,
            (b * 255.0) as u8,
            (a * 255.0) as u8,
        ])
    }

    fn r(&self) -> f32 {
        self.0[0]
    }

    fn g(&self) -> f32 {
        self.0[1]
    }

    fn b(&self) -> f32 {
        self.0[2]
    }

    fn a(&self) -> f32 {
        self.0[3]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn white_sprite(w: u32, h: u32) -> Image {
        let mut sprite = Image::new(w, h);
        sprite.clear(Color::WHITE);
        sprite
    }

    #[test]
    fn draw_axis_aligned() {
        let mut surface = Surface::new(Resolution::new(16, 16));
        surface.draw_sprite(&white_sprite(4, 2), (8.0, 8.0), 0.0, (8.0, 4.0), 1.0);

        // Pixel centers inside |x-8| < 4, |y-8| < 2 are covered.
        assert_eq!(surface.image().get(8, 8), Color::WHITE);
        assert_eq!(surface.image().get(4, 8), Color::WHITE);
        assert_eq!(surface.image().get(3, 8), Color::NULL);
        assert_eq!(surface.image().get(8, 5), Color::NULL);
    }

    #[test]
    fn draw_rotated_quarter_turn() {
        let mut surface = Surface::new(Resolution::new(16, 16));
        // A wide sprite rotated by 90° covers a tall region instead.
        surface.draw_sprite(
            &white_sprite(4, 2),
            (8.0, 8.0),
            std::f32::consts::FRAC_PI_2,
            (8.0, 2.0),
            1.0,
        );
        assert_eq!(surface.image().get(8, 5), Color::WHITE);
        assert_eq!(surface.image().get(5, 8), Color::NULL);
    }

    #[test]
    fn opacity_scales_alpha() {
        let mut surface = Surface::new(Resolution::new(4, 4));
        surface.draw_sprite(&white_sprite(2, 2), (2.0, 2.0), 0.0, (4.0, 4.0), 0.5);
        let px = surface.image().get(2, 2);
        assert!(px.a() > 100 && px.a() < 150, "alpha {}", px.a());
    }

    #[test]
    fn zero_opacity_draws_nothing() {
        let mut surface = Surface::new(Resolution::new(4, 4));
        surface.draw_sprite(&white_sprite(2, 2), (2.0, 2.0), 0.0, (4.0, 4.0), 0.0);
        assert!(surface.image().is_blank());
    }

    #[test]
    fn offscreen_placement_is_clipped() {
        let mut surface = Surface::new(Resolution::new(4, 4));
        surface.draw_sprite(&white_sprite(2, 2), (-10.0, -10.0), 0.3, (4.0, 4.0), 1.0);
        assert!(surface.image().is_blank());
    }

    #[test]
    fn clear_resets_pixels() {
        let mut surface = Surface::new(Resolution::new(4, 4));
        surface.draw_sprite(&white_sprite(2, 2), (2.0, 2.0), 0.0, (4.0, 4.0), 1.0);
        assert!(!surface.image().is_blank());
        surface.clear();
        assert!(surface.image().is_blank());
    }
}
