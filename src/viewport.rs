//! Viewport control: container size, capture resolution, and mirroring.
//!
//! Landmark coordinates are produced in camera-pixel space. The [`Viewport`]
//! keeps the camera request and the drawing surface at the same resolution so
//! those coordinates map 1:1 onto the surface, and applies the horizontal
//! mirror once per frame at the container level. All downstream geometry
//! (eye distances, roll angles, anchor offsets) is therefore computed in
//! already-mirrored space and needs no per-keypoint correction.

use std::fmt;

use crate::image::Image;

/// Resolution (`width x height`) of an image, camera mode, or surface.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    width: u32,
    height: u32,
}

impl Resolution {
    /// 1080p resolution: `1920x1080`
    pub const RES_1080P: Self = Self {
        width: 1920,
        height: 1080,
    };

    /// 720p resolution: `1280x720`
    pub const RES_720P: Self = Self {
        width: 1280,
        height: 720,
    };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Computes the [`AspectRatio`] of this resolution.
    ///
    /// Returns `None` if the width or height is 0.
    pub fn aspect_ratio(&self) -> Option<AspectRatio> {
        AspectRatio::new(self.width, self.height)
    }

    /// Computes a centered, maximally sized region inside `self` with the
    /// given aspect ratio, as `(x, y, width, height)`.
    ///
    /// The remainder is letterboxing (top/bottom bars) or pillarboxing
    /// (left/right bars).
    pub fn fit_aspect_ratio(&self, ratio: AspectRatio) -> (u32, u32, u32, u32) {
        let own_ratio = match self.aspect_ratio() {
            Some(ratio) => ratio.as_f32(),
            None => return (0, 0, self.width, self.height),
        };
        let ratio = ratio.as_f32();

        if ratio > own_ratio {
            // Content is wider than the target: width-limited, letterbox.
            let h = (self.width as f32 / ratio) as u32;
            (0, (self.height - h) / 2, self.width, h)
        } else {
            // Content is taller than (or equal to) the target: pillarbox.
            let w = (self.height as f32 * ratio) as u32;
            ((self.width - w) / 2, 0, w, self.height)
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Ratio of a width to a height.
#[derive(PartialEq, Eq, Clone, Copy)]
pub struct AspectRatio {
    // Invariant: nonzero and reduced (their GCD is 1).
    width: u32,
    height: u32,
}

impl AspectRatio {
    /// Creates the aspect ratio representing `width:height`.
    ///
    /// Returns `None` if either side is 0.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let gcd = gcd(width, height);
        Some(Self {
            width: width / gcd,
            height: height / gcd,
        })
    }

    #[inline]
    pub fn as_f32(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

impl fmt::Debug for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

const fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b > 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

/// Maps the host container onto camera and surface space.
#[derive(Debug, Clone, Copy)]
pub struct Viewport {
    container: Resolution,
    mirror: bool,
}

impl Viewport {
    /// Creates a viewport for a container of the given size, with mirroring
    /// enabled (the selfie view a front camera is expected to show).
    pub fn new(container: Resolution) -> Self {
        Self {
            container,
            mirror: true,
        }
    }

    pub fn mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirror
    }

    pub fn container(&self) -> Resolution {
        self.container
    }

    /// Updates the tracked container dimensions.
    ///
    /// The host calls this when its layout observer fires; the capture loop
    /// picks the new value up on its next frame.
    pub fn set_container(&mut self, container: Resolution) {
        if container != self.container {
            log::debug!("viewport container {} -> {}", self.container, container);
            self.container = container;
        }
    }

    /// The resolution to request from the camera, equal to the surface
    /// resolution so landmark coordinates map 1:1 onto the surface.
    ///
    /// Dimensions are snapped down to even values since camera formats
    /// commonly require them.
    pub fn capture_request(&self) -> Resolution {
        Resolution::new(self.container.width() & !1, self.container.height() & !1)
    }

    /// Conforms a camera frame to this viewport: resamples to the surface
    /// resolution if the camera delivered something else, then applies the
    /// horizontal mirror.
    pub fn conform(&self, mut frame: Image) -> Image {
        let target = self.capture_request();
        if frame.resolution() != target {
            frame = frame.aspect_aware_resize(target);
        }
        if self.mirror {
            frame.flip_horizontal_in_place();
        }
        frame
    }
}
