//! Owned RGBA raster images.
//!
//! [`Image`] is the pixel container used for camera frames, decoded overlay
//! assets, and the drawing surface's backing store. Pixels are 8-bit sRGB
//! with non-premultiplied alpha.

use std::io::Cursor;
use std::path::Path;
use std::{fmt, ops::Index};

use anyhow::Context;
use image::{ImageBuffer, ImageOutputFormat, Rgba, RgbaImage};

use crate::viewport::Resolution;

/// An 8-bit sRGB image with alpha channel.
#[derive(Clone)]
pub struct Image {
    buf: RgbaImage,
}

impl Image {
    /// Creates an empty image of the given size.
    ///
    /// The image starts out black and fully transparent.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            buf: ImageBuffer::new(width, height),
        }
    }

    /// Wraps a raw RGBA byte buffer (row-major, 4 bytes per pixel).
    pub fn from_rgba_bytes(width: u32, height: u32, bytes: Vec<u8>) -> anyhow::Result<Self> {
        let buf = ImageBuffer::from_raw(width, height, bytes)
            .context("RGBA buffer size does not match dimensions")?;
        Ok(Self { buf })
    }

    /// Decodes an image from an in-memory byte buffer.
    ///
    /// The container format (PNG, JPEG or GIF) is detected from the bytes.
    pub fn decode(data: &[u8]) -> anyhow::Result<Self> {
        let buf = image::load_from_memory(data)?.to_rgba8();
        Ok(Self { buf })
    }

    /// Loads an image from the filesystem.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::decode(&data)
    }

    /// Returns the width of this image, in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.buf.width()
    }

    /// Returns the height of this image, in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.buf.height()
    }

    /// Returns the size of this image.
    #[inline]
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width(), self.height())
    }

    /// Gets the color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the bounds of this image.
    #[inline]
    pub(crate) fn get(&self, x: u32, y: u32) -> Color {
        Color(self.buf[(x, y)].0)
    }

    /// Sets the color at the given pixel coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is outside the bounds of this image.
    #[inline]
    pub(crate) fn set(&mut self, x: u32, y: u32, color: Color) {
        self.buf[(x, y)] = Rgba(color.0);
    }

    /// Sets every pixel to `color`.
    pub fn clear(&mut self, color: Color) {
        self.buf.pixels_mut().for_each(|pix| pix.0 = color.0);
    }

    /// Returns whether every pixel is fully transparent.
    pub fn is_blank(&self) -> bool {
        self.buf.pixels().all(|pix| pix.0[3] == 0)
    }

    pub fn flip_horizontal_in_place(&mut self) {
        image::imageops::flip_horizontal_in_place(&mut self.buf);
    }

    /// Resamples this image to a new size, adding transparent bars to keep the
    /// original aspect ratio.
    ///
    /// Runs on the CPU with nearest neighbor sampling, which is sufficient for
    /// conforming camera frames to the surface resolution.
    pub fn aspect_aware_resize(&self, new_res: Resolution) -> Image {
        let cur_ratio = match self.resolution().aspect_ratio() {
            Some(ratio) => ratio,
            // Zero-pixel input: just hand back an empty image of the right size.
            None => return Image::new(new_res.width(), new_res.height()),
        };

        log::trace!(
            "aspect-aware resize {} -> {}",
            self.resolution(),
            new_res,
        );

        let mut out = Image::new(new_res.width(), new_res.height());
        let (x0, y0, w, h) = new_res.fit_aspect_ratio(cur_ratio);
        for dest_y in 0..h {
            for dest_x in 0..w {
                let src_x = ((dest_x as f32 + 0.5) / w as f32 * self.width() as f32) as u32;
                let src_y = ((dest_y as f32 + 0.5) / h as f32 * self.height() as f32) as u32;
                out.set(x0 + dest_x, y0 + dest_y, self.get(src_x, src_y));
            }
        }
        out
    }

    /// Encodes this image as PNG.
    pub fn encode_png(&self) -> anyhow::Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.buf
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)?;
        Ok(bytes)
    }

    /// Saves this image to the filesystem; the format is chosen from the file
    /// extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        self.buf.save(path.as_ref())?;
        Ok(())
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} Image", self.width(), self.height())
    }
}

/// An 8-bit RGBA color in the sRGB color space with non-premultiplied alpha.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct Color(pub(crate) [u8; 4]);

impl Color {
    /// Fully transparent black (all components are 0).
    pub const NULL: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);
    pub const WHITE: Self = Self([255, 255, 255, 255]);

    #[inline]
    pub const fn from_rgb8(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }

    #[inline]
    pub const fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    #[inline]
    pub fn r(&self) -> u8 {
        self.0[0]
    }

    #[inline]
    pub fn g(&self) -> u8 {
        self.0[1]
    }

    #[inline]
    pub fn b(&self) -> u8 {
        self.0[2]
    }

    #[inline]
    pub fn a(&self) -> u8 {
        self.0[3]
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{:02x}{:02x}{:02x}{:02x}",
            self.r(),
            self.g(),
            self.b(),
            self.a(),
        )
    }
}

impl Index<usize> for Color {
    type Output = u8;

    #[inline]
    fn index(&self, index: usize) -> &u8 {
        &self.0[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_image_is_blank() {
        let image = Image::new(4, 4);
        assert!(image.is_blank());
        assert_eq!(image.get(0, 0), Color::NULL);
    }

    #[test]
    fn flip_horizontal() {
        let mut image = Image::new(2, 1);
        image.set(0, 0, Color::WHITE);
        image.flip_horizontal_in_place();
        assert_eq!(image.get(0, 0), Color::NULL);
        assert_eq!(image.get(1, 0), Color::WHITE);
    }

    #[test]
    fn png_round_trip() {
        let mut image = Image::new(2, 2);
        image.set(1, 0, Color::from_rgba8(10, 20, 30, 200));
        let png = image.encode_png().unwrap();
        let back = Image::decode(&png).unwrap();
        assert_eq!(back.resolution(), image.resolution());
        assert_eq!(back.get(1, 0), Color::from_rgba8(10, 20, 30, 200));
    }

    #[test]
    fn resize_letterboxes() {
        let mut image = Image::new(4, 2);
        image.clear(Color::WHITE);
        let out = image.aspect_aware_resize(Resolution::new(4, 4));
        // 4:2 content centered in a square output: rows 1..3 are content.
        assert_eq!(out.get(0, 0), Color::NULL);
        assert_eq!(out.get(0, 1), Color::WHITE);
        assert_eq!(out.get(3, 2), Color::WHITE);
        assert_eq!(out.get(3, 3), Color::NULL);
    }
}
