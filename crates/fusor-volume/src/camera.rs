//! Pinhole camera intrinsics.

use fusor_math::{Point3, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from intrinsics validation.
#[derive(Debug, Error)]
pub enum CameraError {
    /// A focal length was zero or negative.
    #[error("focal length must be positive, got fx={fx}, fy={fy}")]
    InvalidFocal {
        /// Horizontal focal length in pixels.
        fx: f32,
        /// Vertical focal length in pixels.
        fy: f32,
    },

    /// The image size was zero in at least one dimension.
    #[error("image size must be nonzero, got {width}x{height}")]
    EmptyImage {
        /// Image width in pixels.
        width: usize,
        /// Image height in pixels.
        height: usize,
    },
}

/// Pinhole camera intrinsics: focal lengths, principal point, image size.
///
/// Read-only to the engine; one value per session, or per frame if the
/// sensor changes mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    /// Focal length in pixels (x-axis).
    pub fx: f32,
    /// Focal length in pixels (y-axis).
    pub fy: f32,
    /// Principal point x (pixels).
    pub cx: f32,
    /// Principal point y (pixels).
    pub cy: f32,
    /// Image width in pixels.
    pub width: usize,
    /// Image height in pixels.
    pub height: usize,
}

impl CameraIntrinsics {
    /// Construct validated intrinsics.
    pub fn new(
        fx: f32,
        fy: f32,
        cx: f32,
        cy: f32,
        width: usize,
        height: usize,
    ) -> Result<Self, CameraError> {
        if fx <= 0.0 || fy <= 0.0 {
            return Err(CameraError::InvalidFocal { fx, fy });
        }
        if width == 0 || height == 0 {
            return Err(CameraError::EmptyImage { width, height });
        }
        Ok(Self {
            fx,
            fy,
            cx,
            cy,
            width,
            height,
        })
    }

    /// Project a camera-space point to pixel coordinates.
    ///
    /// The caller rejects points with `p.z <= 0` before projecting;
    /// the division here assumes a point in front of the camera.
    #[inline]
    pub fn project(&self, p: &Point3) -> (f32, f32) {
        (
            self.fx * (p.x / p.z) + self.cx,
            self.fy * (p.y / p.z) + self.cy,
        )
    }

    /// Unproject a pixel to the unit-depth bearing vector in camera space.
    #[inline]
    pub fn unproject(&self, u: f32, v: f32) -> Vec3 {
        Vec3::new((u - self.cx) / self.fx, (v - self.cy) / self.fy, 1.0)
    }

    /// Whether continuous pixel coordinates land inside the image.
    #[inline]
    pub fn contains(&self, u: f32, v: f32) -> bool {
        u >= 0.0 && v >= 0.0 && (u as usize) < self.width && (v as usize) < self.height
    }
}
