//! Session and asset error taxonomy.
//!
//! Only session-fatal errors ([`Error::is_fatal`]) are surfaced to the host as
//! blocking error states. Per-frame problems (malformed keypoints, a frame
//! that fails to decode) never appear here; the capture loop absorbs them and
//! skips the frame's visual output.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Camera access was denied. The session never starts; the host should
    /// offer a retry action.
    #[error("camera permission denied: {0}")]
    Permission(String),

    /// The landmark model failed to initialize. Repeated failures indicate an
    /// environment problem (unsupported device, missing backend), so the
    /// session halts instead of retrying.
    #[error("landmark model initialization failed: {0}")]
    DetectorInit(String),

    /// A specific overlay asset failed to fetch or decode. Scoped to that
    /// asset; the capture loop keeps running without an overlay.
    #[error("failed to load asset '{reference}': {message}")]
    AssetLoad { reference: String, message: String },

    /// The camera stream failed outside of permission handling (device
    /// disappeared, no supported format, read error).
    #[error("camera error: {0}")]
    Camera(String),
}

impl Error {
    pub(crate) fn asset(reference: impl Into<String>, message: impl ToString) -> Self {
        Self::AssetLoad {
            reference: reference.into(),
            message: message.to_string(),
        }
    }

    /// Returns whether this error ends the capture session.
    ///
    /// [`Error::AssetLoad`] is the only non-fatal variant: the loop falls back
    /// to drawing no overlay until a valid asset is available.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::AssetLoad { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatality_policy() {
        assert!(Error::Permission("denied".into()).is_fatal());
        assert!(Error::DetectorInit("no backend".into()).is_fatal());
        assert!(Error::Camera("gone".into()).is_fatal());
        assert!(!Error::asset("glasses.png", "404").is_fatal());
    }
}
