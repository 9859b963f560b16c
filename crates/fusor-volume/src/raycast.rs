//! Per-pixel surface extraction by marching camera rays through the grid.

use crate::camera::CameraIntrinsics;
use crate::image::Image2;
use crate::volume::{TsdfVolume, VolumeError};
use fusor_math::{Aabb3, Point3, Ray, Transform};
use rayon::prelude::*;

/// March step in voxel units. Must stay at or below one voxel so a
/// truncation-band crossing cannot be stepped over.
const STEP: f32 = 0.5;

/// Result of ray casting one camera view: a world-space surface point
/// per pixel, or `None` where the ray found no surface.
#[derive(Debug, Clone)]
pub struct RaycastImage {
    width: usize,
    height: usize,
    points: Vec<Option<Point3>>,
}

impl RaycastImage {
    /// Assemble from a row-major hit vector; `None` if the length does
    /// not match `width * height`. Used by alternative backends that
    /// produce the hit buffer themselves.
    pub fn from_points(width: usize, height: usize, points: Vec<Option<Point3>>) -> Option<Self> {
        if points.len() != width * height {
            return None;
        }
        Some(Self {
            width,
            height,
            points,
        })
    }

    /// Image width in pixels.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height in pixels.
    pub fn height(&self) -> usize {
        self.height
    }

    /// The hit point for pixel `(u, v)`, or `None` for a miss or an
    /// out-of-image query.
    pub fn hit(&self, u: usize, v: usize) -> Option<Point3> {
        if u < self.width && v < self.height {
            self.points[v * self.width + u]
        } else {
            None
        }
    }

    /// Number of pixels that found a surface.
    pub fn hit_count(&self) -> usize {
        self.points.iter().filter(|p| p.is_some()).count()
    }

    /// Convert to a 3-channel vertex map with NaN marking misses, the
    /// layout the binary dump format expects.
    pub fn to_vertex_map(&self) -> Image2<[f32; 3]> {
        let data = self
            .points
            .iter()
            .map(|p| match p {
                Some(p) => [p.x, p.y, p.z],
                None => [f32::NAN; 3],
            })
            .collect();
        Image2::from_vec(self.width, self.height, data)
            .expect("points vector length matches image dimensions")
    }

    /// Re-project hits onto the camera's viewing axis, yielding a depth
    /// image in metres with `0` marking misses.
    pub fn depth_map(&self, cam_to_world: &Transform) -> Result<Image2<f32>, VolumeError> {
        let world_to_cam = cam_to_world.inverse().ok_or(VolumeError::SingularPose)?;
        let data = self
            .points
            .iter()
            .map(|p| match p {
                Some(p) => world_to_cam.apply_point(p).z,
                None => 0.0,
            })
            .collect();
        Ok(Image2::from_vec(self.width, self.height, data)
            .expect("points vector length matches image dimensions"))
    }
}

impl TsdfVolume {
    /// Cast one ray per pixel of the given view and report where each
    /// first crosses the zero level set.
    ///
    /// A positive-to-negative sign change between consecutive samples is
    /// refined by linear interpolation. A ray whose first valid sample
    /// is already negative reports no hit: a surface seen from behind is
    /// not a surface.
    pub fn raycast(
        &self,
        intrinsics: &CameraIntrinsics,
        cam_to_world: &Transform,
    ) -> Result<RaycastImage, VolumeError> {
        // Degenerate poses are rejected up front, not per pixel.
        cam_to_world.inverse().ok_or(VolumeError::SingularPose)?;

        let width = intrinsics.width;
        let height = intrinsics.height;
        let origin_v = self.world_to_voxelf(&cam_to_world.origin());

        let points = (0..width * height)
            .into_par_iter()
            .map(|i| {
                let (u, v) = (i % width, i / width);
                self.cast_pixel(intrinsics, cam_to_world, &origin_v, u, v)
            })
            .collect();

        Ok(RaycastImage {
            width,
            height,
            points,
        })
    }

    fn cast_pixel(
        &self,
        intrinsics: &CameraIntrinsics,
        cam_to_world: &Transform,
        origin_v: &Point3,
        u: usize,
        v: usize,
    ) -> Option<Point3> {
        let bearing = intrinsics.unproject(u as f32, v as f32);
        let dir_world = cam_to_world.apply_vec(&bearing);
        // Voxel space is a uniform scaling of volume space, so the
        // direction survives the mapping unchanged up to length.
        let dir_v = self.world_to_vol.apply_vec(&dir_world);
        if dir_v.norm_squared() < 1e-12 {
            return None;
        }

        let ray = Ray::new(*origin_v, dir_v);
        let bounds = Aabb3::new(
            Point3::origin(),
            Point3::new(
                self.dims[0] as f32,
                self.dims[1] as f32,
                self.dims[2] as f32,
            ),
        );
        let (t_entry, t_exit) = ray.intersect_aabb(&bounds)?;

        let mut t = t_entry + 1e-3;
        let mut prev: Option<(f32, f32)> = None;
        loop {
            let t_sample = t.min(t_exit);
            if let Some(curr) = self.tsdf_at(&ray.at(t_sample)) {
                match prev {
                    Some((t_prev, v_prev)) => {
                        if v_prev >= 0.0 && curr <= 0.0 && v_prev - curr > 0.0 {
                            let mu = v_prev / (v_prev - curr);
                            let t_hit = t_prev + mu * (t_sample - t_prev);
                            return Some(self.voxelf_to_world(&ray.at(t_hit)));
                        }
                    }
                    None => {
                        if curr < 0.0 {
                            return None;
                        }
                    }
                }
                prev = Some((t_sample, curr));
            }
            if t_sample >= t_exit {
                return None;
            }
            t += STEP;
        }
    }
}
