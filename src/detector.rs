//! Adapter around a [`LandmarkModel`].
//!
//! Owns the model's one-time initialization state and per-frame timing. The
//! capture loop only ever talks to this wrapper, never to the model directly.

use crate::image::Image;
use crate::landmark::{FaceEstimate, LandmarkModel};
use crate::timer::Timer;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Uninitialized,
    Ready,
    Failed,
}

pub struct Detector {
    model: Box<dyn LandmarkModel>,
    state: State,
    t_estimate: Timer,
}

impl Detector {
    pub fn new<M: LandmarkModel>(model: M) -> Self {
        Self {
            model: Box::new(model),
            state: State::Uninitialized,
            t_estimate: Timer::new("estimate"),
        }
    }

    /// Brings up the underlying model.
    ///
    /// Idempotent: a second call on a ready detector is a no-op, and a failed
    /// detector stays failed (no automatic retry; repeated bring-up failures
    /// indicate an environment problem, not a transient one).
    pub fn initialize(&mut self) -> Result<()> {
        match self.state {
            State::Ready => Ok(()),
            State::Failed => Err(Error::DetectorInit(
                "model initialization already failed".into(),
            )),
            State::Uninitialized => match self.model.initialize() {
                Ok(()) => {
                    log::debug!("landmark model ready");
                    self.state = State::Ready;
                    Ok(())
                }
                Err(e) => {
                    self.state = State::Failed;
                    Err(Error::DetectorInit(e.to_string()))
                }
            },
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == State::Ready
    }

    /// Runs the model on one frame.
    ///
    /// Errors here are per-frame and transient: the caller logs and skips the
    /// frame. Calling this before a successful [`initialize`][Self::initialize]
    /// is a usage error and reports no faces.
    pub fn estimate(&mut self, frame: &Image) -> anyhow::Result<Vec<FaceEstimate>> {
        if self.state != State::Ready {
            log::warn!("estimate called on a detector that is not ready");
            return Ok(Vec::new());
        }
        let (model, timer) = (&mut self.model, &mut self.t_estimate);
        timer.time(|| model.estimate(frame))
    }

    /// Returns the per-frame estimation timer.
    pub fn timer(&self) -> &Timer {
        &self.t_estimate
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;

    struct FailingModel;

    impl LandmarkModel for FailingModel {
        fn initialize(&mut self) -> anyhow::Result<()> {
            bail!("no inference backend")
        }

        fn estimate(&mut self, _: &Image) -> anyhow::Result<Vec<FaceEstimate>> {
            unreachable!()
        }
    }

    #[test]
    fn init_failure_is_sticky() {
        let mut detector = Detector::new(FailingModel);
        assert!(matches!(
            detector.initialize(),
            Err(Error::DetectorInit(_))
        ));
        // No retry storm: the second call fails without touching the model.
        assert!(matches!(
            detector.initialize(),
            Err(Error::DetectorInit(_))
        ));
        assert!(!detector.is_ready());
    }

    #[test]
    fn estimate_before_init_reports_no_faces() {
        struct Never;
        impl LandmarkModel for Never {
            fn estimate(&mut self, _: &Image) -> anyhow::Result<Vec<FaceEstimate>> {
                unreachable!()
            }
        }

        let mut detector = Detector::new(Never);
        assert!(detector.estimate(&Image::new(1, 1)).unwrap().is_empty());
    }
}
