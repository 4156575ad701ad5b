//! Render side of the bridge: pose in, frame out.

use std::sync::Arc;

use anyhow::{Context, Result};
use glam::Vec3;
use log::{debug, warn};
use thiserror::Error;

use crate::camera::Camera;
use crate::pose::Pose;
use crate::state::{RenderedFrame, SharedRenderState};

/// Errors raised when converting a rendered image into frame bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("image data holds {actual} values, expected {expected} for {channels}x{height}x{width}")]
    LengthMismatch {
        channels: usize,
        height: usize,
        width: usize,
        expected: usize,
        actual: usize,
    },
    #[error("frames must have 3 colour channels, image has {0}")]
    ChannelCount(usize),
    #[error("image of {width}x{height} does not fit the frame header")]
    TooLarge { width: usize, height: usize },
}

/// Channel-first float image as returned by a renderer, values nominally in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChwImage {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ChwImage {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self, ImageError> {
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(ImageError::LengthMismatch {
                channels,
                height,
                width,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Clamps to `[0, 1]`, scales to 8 bits (truncating) and interleaves
    /// the planes into row-major RGB.
    pub fn to_frame(&self) -> Result<RenderedFrame, ImageError> {
        if self.channels != 3 {
            return Err(ImageError::ChannelCount(self.channels));
        }
        let too_large = || ImageError::TooLarge {
            width: self.width,
            height: self.height,
        };
        let width = i32::try_from(self.width).map_err(|_| too_large())?;
        let height = i32::try_from(self.height).map_err(|_| too_large())?;

        let plane = self.width * self.height;
        let mut pixels = Vec::with_capacity(plane * 3);
        for index in 0..plane {
            for channel in 0..3 {
                let value = self.data[channel * plane + index];
                pixels.push((value.clamp(0.0, 1.0) * 255.0) as u8);
            }
        }
        Ok(RenderedFrame::new(width, height, pixels))
    }
}

/// The scene renderer the bridge drives.
///
/// Implementations own their scene model and pipeline configuration; the
/// bridge only supplies the camera, the background colour and the scaling
/// modifier taken from the pose.
pub trait SceneRenderer {
    fn render(&mut self, camera: &Camera, background: Vec3, scaling_modifier: f32)
        -> Result<ChwImage>;
}

impl<R: SceneRenderer + ?Sized> SceneRenderer for Box<R> {
    fn render(
        &mut self,
        camera: &Camera,
        background: Vec3,
        scaling_modifier: f32,
    ) -> Result<ChwImage> {
        (**self).render(camera, background, scaling_modifier)
    }
}

/// Result of one [`FrameProducer::run_cycle`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// No pose has arrived yet.
    NotReady,
    /// The latest pose does not have seven components.
    InvalidPose { len: usize },
    /// A frame was rendered and published.
    Rendered { width: i32, height: i32 },
}

/// Renders the latest pose and publishes the result for the connection handler.
pub struct FrameProducer<R> {
    state: Arc<SharedRenderState>,
    camera: Camera,
    origin: Vec3,
    renderer: R,
    background: Vec3,
}

impl<R: SceneRenderer> FrameProducer<R> {
    /// The camera's current translation becomes the origin poses are relative to.
    pub fn new(state: Arc<SharedRenderState>, camera: Camera, renderer: R, background: Vec3) -> Self {
        let origin = camera.translation;
        Self {
            state,
            camera,
            origin,
            renderer,
            background,
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn set_background(&mut self, background: Vec3) {
        self.background = background;
    }

    /// Runs one render cycle. Blocks for as long as the renderer does.
    ///
    /// On a renderer error the previously published frame stays in place.
    pub fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let Some(values) = self.state.latest_pose() else {
            debug!("no pose received yet; skipping render");
            return Ok(CycleOutcome::NotReady);
        };
        let Some(pose) = Pose::from_slice(&values) else {
            warn!(
                "latest pose has {} values, expected 7; skipping render",
                values.len()
            );
            return Ok(CycleOutcome::InvalidPose { len: values.len() });
        };

        self.camera
            .set_extrinsics(pose.rotation(), pose.translation(self.origin));
        let image = self
            .renderer
            .render(&self.camera, self.background, pose.scale)
            .context("renderer failed")?;
        let frame = image.to_frame().context("renderer returned an unusable image")?;
        let (width, height) = (frame.width, frame.height);
        self.state.publish_frame(frame);
        debug!("published {width}x{height} frame");
        Ok(CycleOutcome::Rendered { width, height })
    }
}
