//! One posed color+depth observation.

use crate::image::Image2;
use fusor_math::Transform;
use thiserror::Error;

/// Errors from frame validation.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Color and depth images have different pixel dimensions.
    #[error("color image is {color_w}x{color_h} but depth image is {depth_w}x{depth_h}")]
    DimensionMismatch {
        /// Color width.
        color_w: usize,
        /// Color height.
        color_h: usize,
        /// Depth width.
        depth_w: usize,
        /// Depth height.
        depth_h: usize,
    },

    /// The camera-to-world pose is not invertible.
    #[error("camera-to-world pose is singular")]
    SingularPose,

    /// Depth scale must be a positive number of metres per raw unit.
    #[error("depth scale must be positive, got {0}")]
    InvalidDepthScale(f32),
}

/// A single sensor frame: paired color and depth images plus the
/// camera-to-world pose they were captured under.
///
/// Depth is kept in raw sensor units; `depth_scale` converts one raw
/// unit to metres (e.g. `0.001` for millimetre depth). Read-only to the
/// engine during integration.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Color image, 8-bit RGB.
    pub color: Image2<[u8; 3]>,
    /// Depth image in raw sensor units; `0` marks an invalid sample.
    pub depth: Image2<u16>,
    /// Camera-to-world pose for this frame.
    pub cam_to_world: Transform,
    /// Cached inverse of the pose.
    pub(crate) world_to_cam: Transform,
    /// Metres per raw depth unit.
    pub depth_scale: f32,
}

impl Frame {
    /// Construct a validated frame.
    pub fn new(
        color: Image2<[u8; 3]>,
        depth: Image2<u16>,
        cam_to_world: Transform,
        depth_scale: f32,
    ) -> Result<Self, FrameError> {
        if color.width() != depth.width() || color.height() != depth.height() {
            return Err(FrameError::DimensionMismatch {
                color_w: color.width(),
                color_h: color.height(),
                depth_w: depth.width(),
                depth_h: depth.height(),
            });
        }
        if depth_scale <= 0.0 || !depth_scale.is_finite() {
            return Err(FrameError::InvalidDepthScale(depth_scale));
        }
        let world_to_cam = cam_to_world.inverse().ok_or(FrameError::SingularPose)?;
        Ok(Self {
            color,
            depth,
            cam_to_world,
            world_to_cam,
            depth_scale,
        })
    }

    /// The cached inverse of the camera-to-world pose.
    pub fn world_to_cam(&self) -> &Transform {
        &self.world_to_cam
    }

    /// Frame width in pixels.
    pub fn width(&self) -> usize {
        self.depth.width()
    }

    /// Frame height in pixels.
    pub fn height(&self) -> usize {
        self.depth.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_rejected() {
        let color = Image2::new(4, 4, [0u8; 3]);
        let depth = Image2::new(4, 3, 0u16);
        let err = Frame::new(color, depth, Transform::identity(), 0.001).unwrap_err();
        assert!(matches!(err, FrameError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_invalid_depth_scale_rejected() {
        let color = Image2::new(4, 4, [0u8; 3]);
        let depth = Image2::new(4, 4, 0u16);
        let err = Frame::new(color, depth, Transform::identity(), 0.0).unwrap_err();
        assert!(matches!(err, FrameError::InvalidDepthScale(_)));
    }

    #[test]
    fn test_singular_pose_rejected() {
        let color = Image2::new(2, 2, [0u8; 3]);
        let depth = Image2::new(2, 2, 0u16);
        let singular = Transform::scale(0.0, 0.0, 0.0);
        let err = Frame::new(color, depth, singular, 0.001).unwrap_err();
        assert!(matches!(err, FrameError::SingularPose));
    }

    #[test]
    fn test_valid_frame() {
        let color = Image2::new(2, 2, [10u8, 20, 30]);
        let depth = Image2::new(2, 2, 1000u16);
        let frame = Frame::new(color, depth, Transform::identity(), 0.001).unwrap();
        assert_eq!(frame.width(), 2);
        assert_eq!(frame.height(), 2);
    }
}
