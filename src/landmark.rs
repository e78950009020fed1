//! Facial landmark types and the pluggable model boundary.
//!
//! The landmark model itself is a black box behind [`LandmarkModel`]: given a
//! frame, it returns zero or more faces, each as an ordered set of keypoints.
//! Which index means what is model-defined; a model publishes the two indices
//! this crate relies on (eye centers) through its [`LandmarkScheme`].

use std::collections::VecDeque;

use crate::image::Image;

/// A single facial landmark in surface-pixel coordinates.
#[derive(Debug, PartialEq, Clone, Copy)]
pub struct Keypoint {
    pos: [f32; 3],
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { pos: [x, y, 0.0] }
    }

    pub fn new_3d(x: f32, y: f32, z: f32) -> Self {
        Self { pos: [x, y, z] }
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.pos[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.pos[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.pos[2]
    }

    /// Returns whether all coordinates are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.pos.iter().all(|c| c.is_finite())
    }
}

/// Positions of the landmarks this crate consumes within a model's output.
///
/// The defaults match detection-style models that emit the eye centers as
/// their first two keypoints.
#[derive(Debug, Clone, Copy)]
pub struct LandmarkScheme {
    pub left_eye: usize,
    pub right_eye: usize,
    pub nose_tip: Option<usize>,
    pub forehead: Option<usize>,
}

impl Default for LandmarkScheme {
    fn default() -> Self {
        Self {
            left_eye: 0,
            right_eye: 1,
            nose_tip: None,
            forehead: None,
        }
    }
}

/// All keypoints of one detected face in one frame.
///
/// Created fresh each detection cycle and discarded after the frame's
/// composite is drawn; never retained across frames.
#[derive(Debug, Clone)]
pub struct FaceEstimate {
    keypoints: Vec<Keypoint>,
    scheme: LandmarkScheme,
}

impl FaceEstimate {
    pub fn new(keypoints: Vec<Keypoint>, scheme: LandmarkScheme) -> Self {
        Self { keypoints, scheme }
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }

    fn get(&self, index: usize) -> Option<Keypoint> {
        self.keypoints.get(index).copied()
    }

    pub fn left_eye(&self) -> Option<Keypoint> {
        self.get(self.scheme.left_eye)
    }

    pub fn right_eye(&self) -> Option<Keypoint> {
        self.get(self.scheme.right_eye)
    }

    pub fn nose_tip(&self) -> Option<Keypoint> {
        self.get(self.scheme.nose_tip?)
    }

    pub fn forehead(&self) -> Option<Keypoint> {
        self.get(self.scheme.forehead?)
    }
}

/// A face-landmark model.
///
/// Implementations wrap whatever inference backend produces the keypoints.
/// [`LandmarkModel::initialize`] is called exactly once, before the first
/// frame; estimation is called once per frame with exclusive access, so
/// implementations may reuse internal buffers.
pub trait LandmarkModel: Send + 'static {
    /// One-time model bring-up (loading weights, creating the inference
    /// session). Called before any [`estimate`][Self::estimate] call.
    fn initialize(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Estimates the faces visible in `frame`.
    ///
    /// An empty vector means no face this frame; an error means this frame's
    /// estimate is unusable (the caller skips the frame).
    fn estimate(&mut self, frame: &Image) -> anyhow::Result<Vec<FaceEstimate>>;
}

/// A deterministic model that replays a prepared sequence of estimates.
///
/// Stands in for a real network in demos and tests: each frame consumes the
/// next scripted entry, and once the script is exhausted every further frame
/// reports no faces.
pub struct ScriptedModel {
    script: VecDeque<Vec<FaceEstimate>>,
}

impl ScriptedModel {
    pub fn new<I: IntoIterator<Item = Vec<FaceEstimate>>>(script: I) -> Self {
        Self {
            script: script.into_iter().collect(),
        }
    }

    /// A script that reports the same single face for `frames` frames.
    pub fn repeating(face: FaceEstimate, frames: usize) -> Self {
        Self::new(std::iter::repeat_with(|| vec![face.clone()]).take(frames))
    }
}

impl LandmarkModel for ScriptedModel {
    fn estimate(&mut self, _frame: &Image) -> anyhow::Result<Vec<FaceEstimate>> {
        Ok(self.script.pop_front().unwrap_or_default())
    }
}
