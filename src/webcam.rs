//! V4L2 webcam access.
//!
//! Only `VIDEO_CAPTURE` devices yielding JFIF JPEG or Motion JPEG frames are
//! supported; that covers essentially every UVC webcam. Frames are decoded to
//! RGBA with `zune-jpeg`.

use linuxvideo::{
    format::{PixFormat, Pixelformat},
    stream::ReadStream,
    CapabilityFlags, Device,
};

use crate::capture::FrameSource;
use crate::image::Image;
use crate::timer::Timer;
use crate::viewport::Resolution;
use crate::{Error, Result};

/// A webcam yielding a stream of [`Image`]s.
pub struct Webcam {
    stream: ReadStream,
    width: u32,
    height: u32,
    t_dequeue: Timer,
    t_decode: Timer,
}

/// Forces the device to use when set; useful to prefer the user-facing camera
/// on machines with several.
const ENV_VAR_WEBCAM_NAME: &str = "KAGAMI_WEBCAM_NAME";

impl Webcam {
    /// Opens the first supported webcam, requesting MJPEG at `request`.
    ///
    /// If `KAGAMI_WEBCAM_NAME` is set, only the device with that card name is
    /// considered. The driver may negotiate a different resolution; frames
    /// are conformed to the viewport downstream, so the delivered size is
    /// reported but not enforced. This can block for hundreds of milliseconds
    /// while the device initializes.
    ///
    /// Access problems are classified: permission failures become
    /// [`Error::Permission`], everything else [`Error::Camera`].
    pub fn open(request: Resolution) -> Result<Self> {
        if let Ok(name) = std::env::var(ENV_VAR_WEBCAM_NAME) {
            log::debug!("webcam override: `{ENV_VAR_WEBCAM_NAME}` is set to '{name}'");
        }
        let mut denied = None;
        let devices = linuxvideo::list().map_err(classify)?;
        for res in devices {
            match res {
                Ok(dev) => match Self::open_impl(dev, request) {
                    Ok(Some(webcam)) => return Ok(webcam),
                    Ok(None) => {}
                    Err(e @ Error::Permission(_)) => {
                        log::warn!("{}", e);
                        denied = Some(e);
                    }
                    Err(e) => log::warn!("{}", e),
                },
                Err(e) => log::warn!("{}", e),
            }
        }

        // If every capture device was unreadable because of permissions,
        // report that rather than a generic "no device".
        Err(denied.unwrap_or_else(|| Error::Camera("no supported webcam device found".into())))
    }

    fn open_impl(dev: Device, request: Resolution) -> Result<Option<Self>> {
        let caps = dev.capabilities().map_err(classify)?;
        if let Ok(name) = std::env::var(ENV_VAR_WEBCAM_NAME) {
            if caps.card() != name {
                return Ok(None);
            }
        }
        let path = dev.path().map_err(classify)?;
        log::debug!(
            "device {} ({}) capabilities: {:?}",
            caps.card(),
            path.display(),
            caps.device_capabilities(),
        );

        if !caps.device_capabilities().contains(CapabilityFlags::VIDEO_CAPTURE) {
            return Ok(None);
        }

        let capture = dev
            .video_capture(PixFormat::new(
                request.width(),
                request.height(),
                Pixelformat::MJPG,
            ))
            .map_err(classify)?;

        let format = capture.format();
        match format.pixelformat() {
            Pixelformat::JPEG | Pixelformat::MJPG => {}
            other => {
                return Err(Error::Camera(format!(
                    "unsupported pixel format {other}"
                )))
            }
        }

        log::info!(
            "opened {} ({}), {}x{} (requested {})",
            caps.card(),
            path.display(),
            format.width(),
            format.height(),
            request,
        );

        let (width, height) = (format.width(), format.height());
        let stream = capture.into_stream(2).map_err(classify)?;

        Ok(Some(Self {
            stream,
            width,
            height,
            t_dequeue: Timer::new("dequeue"),
            t_decode: Timer::new("decode"),
        }))
    }

    /// The resolution the driver actually delivers.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Reads the next frame from the camera, blocking until one is available.
    pub fn read(&mut self) -> Result<Image> {
        let (width, height) = (self.width, self.height);
        let t_decode = &mut self.t_decode;
        let dequeued = self.t_dequeue.time(|| {
            self.stream.dequeue(|buf| {
                let image = match t_decode.time(|| decode_mjpg(&buf)) {
                    Ok(image) => image,
                    Err(e) => {
                        // Even high-quality webcams produce occasional corrupt
                        // MJPG frames (USB data corruption). A blank frame
                        // keeps frame pacing intact; it simply yields no
                        // detection until the next frame.
                        log::error!("webcam decode error: {}", e);
                        Image::new(width, height)
                    }
                };
                Ok(image)
            })
        });
        dequeued.map_err(|e| Error::Camera(e.to_string()))
    }

    /// Returns profiling timers for frame dequeueing and decoding.
    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_dequeue, &self.t_decode].into_iter()
    }
}

impl FrameSource for Webcam {
    fn next_frame(&mut self) -> anyhow::Result<Image> {
        self.read().map_err(Into::into)
    }
}

/// Decodes a JFIF JPEG or Motion JPEG buffer to RGBA.
fn decode_mjpg(data: &[u8]) -> anyhow::Result<Image> {
    let mut decoder = zune_jpeg::Decoder::new();
    decoder.set_num_threads(1)?;
    decoder.rgba();
    let buf = decoder.decode_buffer(data)?;
    let (width, height) = (u32::from(decoder.width()), u32::from(decoder.height()));
    Image::from_rgba_bytes(width, height, buf)
}

/// Maps device-access failures onto the session error taxonomy.
fn classify(err: impl std::fmt::Display) -> Error {
    let message = err.to_string();
    if message.to_lowercase().contains("permission denied") {
        Error::Permission(message)
    } else {
        Error::Camera(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_permission() {
        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(classify(err), Error::Permission(_)));
        assert!(matches!(classify("device went away"), Error::Camera(_)));
    }
}
