//! Per-frame fusion of one posed observation into the grid.

use crate::camera::CameraIntrinsics;
use crate::frame::Frame;
use crate::image::Image2;
use crate::volume::{voxel_coord, TsdfVolume, VolumeError};
use fusor_math::{Point3, Transform};
use rayon::prelude::*;

/// One accepted observation for a voxel: the normalized distance sample
/// and the frame color at the projected pixel.
struct Observation {
    tsdf: f32,
    color: [i32; 3],
}

/// Run the per-voxel rejection chain for the voxel at `idx`.
///
/// `None` means the voxel is left untouched this frame: behind the
/// camera, outside the image footprint, invalid depth, or outside the
/// truncation band. None of these are errors.
#[allow(clippy::too_many_arguments)]
fn observe(
    dims: [usize; 3],
    voxel_length: f32,
    sdf_trunc: f32,
    vol_to_cam: &Transform,
    intrinsics: &CameraIntrinsics,
    depth: &Image2<u16>,
    color: &Image2<[u8; 3]>,
    depth_scale: f32,
    idx: usize,
) -> Option<Observation> {
    let c = voxel_coord(dims, idx);
    let p_vol = Point3::new(
        c[0] as f32 * voxel_length,
        c[1] as f32 * voxel_length,
        c[2] as f32 * voxel_length,
    );
    let p_cam = vol_to_cam.apply_point(&p_vol);
    if p_cam.z <= 0.0 {
        return None;
    }

    let (u, v) = intrinsics.project(&p_cam);
    if !intrinsics.contains(u, v) {
        return None;
    }
    let (ui, vi) = (u as usize, v as usize);

    let raw = *depth.get(ui, vi)?;
    if raw == 0 {
        return None;
    }
    let measured = raw as f32 * depth_scale;

    let sdf = measured - p_cam.z;
    if !(-sdf_trunc..=sdf_trunc).contains(&sdf) {
        return None;
    }

    let rgb = *color.get(ui, vi)?;
    Some(Observation {
        tsdf: sdf / sdf_trunc,
        color: [rgb[0] as i32, rgb[1] as i32, rgb[2] as i32],
    })
}

/// Fold one observation into a voxel's running average.
///
/// The numerator uses the pre-saturation increment of 1 even once the
/// weight is capped, so a saturated voxel still moves by `1/(cap+1)` of
/// each new observation.
fn fuse(tsdf: &mut f32, weight: &mut u8, color: &mut [i32; 3], obs: &Observation) {
    let w_old = *weight as f32;
    let denom = w_old + 1.0;
    *tsdf = (*tsdf * w_old + obs.tsdf) / denom;
    for ch in 0..3 {
        let blended = (color[ch] as f32 * w_old + obs.color[ch] as f32) / denom;
        color[ch] = (blended.round() as i32).clamp(0, 255);
    }
    *weight = weight.saturating_add(1);
}

impl TsdfVolume {
    /// Fuse one frame into the grid.
    ///
    /// Parallel over voxels; each unit of work reads the frame and
    /// writes exactly one `(tsdf, weight, color)` triple, so no
    /// synchronization is needed and the result is independent of
    /// execution order.
    pub fn integrate(
        &mut self,
        frame: &Frame,
        intrinsics: &CameraIntrinsics,
    ) -> Result<(), VolumeError> {
        if frame.width() != intrinsics.width || frame.height() != intrinsics.height {
            return Err(VolumeError::ImageMismatch {
                frame_w: frame.width(),
                frame_h: frame.height(),
                intr_w: intrinsics.width,
                intr_h: intrinsics.height,
            });
        }

        let dims = self.dims;
        let voxel_length = self.voxel_length;
        let sdf_trunc = self.sdf_trunc;
        let depth_scale = frame.depth_scale;
        let vol_to_cam = frame.world_to_cam.then(&self.vol_to_world);
        let depth = &frame.depth;
        let color_img = &frame.color;

        self.tsdf
            .par_iter_mut()
            .zip(self.weight.par_iter_mut())
            .zip(self.color.par_iter_mut())
            .enumerate()
            .for_each(|(idx, ((t, w), c))| {
                if let Some(obs) = observe(
                    dims,
                    voxel_length,
                    sdf_trunc,
                    &vol_to_cam,
                    intrinsics,
                    depth,
                    color_img,
                    depth_scale,
                    idx,
                ) {
                    fuse(t, w, c, &obs);
                }
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{VolumeParams, WEIGHT_MAX};

    /// Camera at the world origin looking along +z, and a 2 m cubic
    /// grid in front of it spanning x, y in [-1, 1], z in [0, 2].
    fn plane_setup(image_size: usize) -> (TsdfVolume, CameraIntrinsics, Frame) {
        let volume = TsdfVolume::new(VolumeParams::anchored(
            [20, 20, 20],
            0.1,
            0.3,
            Point3::new(-1.0, -1.0, 0.0),
        ))
        .unwrap();
        let f = image_size as f32;
        let intrinsics = CameraIntrinsics::new(
            f,
            f,
            (f - 1.0) / 2.0,
            (f - 1.0) / 2.0,
            image_size,
            image_size,
        )
        .unwrap();
        // Flat wall at z = 1 m, red, depth in millimetre raw units.
        let depth = Image2::new(image_size, image_size, 1000u16);
        let color = Image2::new(image_size, image_size, [200u8, 10, 10]);
        let frame = Frame::new(color, depth, Transform::identity(), 0.001).unwrap();
        (volume, intrinsics, frame)
    }

    /// Serial reference integration with a caller-chosen voxel order.
    fn integrate_in_order(
        volume: &mut TsdfVolume,
        frame: &Frame,
        intrinsics: &CameraIntrinsics,
        order: impl Iterator<Item = usize>,
    ) {
        let dims = volume.dims;
        let vol_to_cam = frame.world_to_cam.then(&volume.vol_to_world);
        for idx in order {
            if let Some(obs) = observe(
                dims,
                volume.voxel_length,
                volume.sdf_trunc,
                &vol_to_cam,
                intrinsics,
                &frame.depth,
                &frame.color,
                frame.depth_scale,
                idx,
            ) {
                fuse(
                    &mut volume.tsdf[idx],
                    &mut volume.weight[idx],
                    &mut volume.color[idx],
                    &obs,
                )
            }
        }
    }

    #[test]
    fn test_plane_voxel_converges_to_surface() {
        let (mut volume, intrinsics, frame) = plane_setup(64);
        // World (0, 0, 1) is on the wall: voxel (10, 10, 10).
        let on_plane = [10, 10, 10];
        let mut prev = f32::INFINITY;
        for k in 1..=5u8 {
            volume.integrate(&frame, &intrinsics).unwrap();
            let (t, w, _) = volume.voxel(on_plane).unwrap();
            assert_eq!(w, k);
            assert!(t.abs() <= prev);
            prev = t.abs();
        }
        let (t, _, c) = volume.voxel(on_plane).unwrap();
        assert!(t.abs() < 1e-4);
        assert_eq!(c, [200, 10, 10]);
    }

    #[test]
    fn test_voxel_in_front_of_plane_is_positive() {
        let (mut volume, intrinsics, frame) = plane_setup(64);
        volume.integrate(&frame, &intrinsics).unwrap();
        // Voxel (10, 10, 8): world z = 0.8, so sdf = +0.2 -> 0.2/0.3.
        let (t, w, _) = volume.voxel([10, 10, 8]).unwrap();
        assert_eq!(w, 1);
        assert!((t - 0.2 / 0.3).abs() < 1e-3);
        // Behind the plane by the same margin: mirrored sign.
        let (t, _, _) = volume.voxel([10, 10, 12]).unwrap();
        assert!((t + 0.2 / 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_out_of_band_voxels_untouched() {
        let (mut volume, intrinsics, frame) = plane_setup(64);
        volume.integrate(&frame, &intrinsics).unwrap();
        // World z = 0.2 is 0.8 m in front of the wall, far outside the
        // 0.3 m truncation band.
        let (t, w, _) = volume.voxel([10, 10, 2]).unwrap();
        assert_eq!(w, 0);
        assert_eq!(t, 1.0);
    }

    #[test]
    fn test_invalid_depth_untouched() {
        let (mut volume, intrinsics, mut frame) = plane_setup(64);
        // Zero out the whole depth image: nothing integrates.
        frame.depth = Image2::new(64, 64, 0u16);
        volume.integrate(&frame, &intrinsics).unwrap();
        assert!(volume.weight_data().iter().all(|&w| w == 0));
    }

    #[test]
    fn test_volume_behind_camera_untouched() {
        let (_, intrinsics, frame) = plane_setup(64);
        let mut behind = TsdfVolume::new(VolumeParams::anchored(
            [8, 8, 8],
            0.1,
            0.3,
            Point3::new(-0.4, -0.4, -3.0),
        ))
        .unwrap();
        behind.integrate(&frame, &intrinsics).unwrap();
        assert!(behind.weight_data().iter().all(|&w| w == 0));
    }

    #[test]
    fn test_weight_saturates_at_cap() {
        let (mut volume, intrinsics, frame) = plane_setup(8);
        for _ in 0..(WEIGHT_MAX as usize + 40) {
            volume.integrate(&frame, &intrinsics).unwrap();
        }
        let (_, w, _) = volume.voxel([10, 10, 10]).unwrap();
        assert_eq!(w, WEIGHT_MAX);
        assert!(volume.weight_data().iter().all(|&w| w <= WEIGHT_MAX));
    }

    #[test]
    fn test_saturated_average_still_moves() {
        let (mut volume, intrinsics, frame) = plane_setup(8);
        let idx = volume.index_of([10, 10, 10]);
        volume.weight[idx] = WEIGHT_MAX;
        volume.tsdf[idx] = 1.0;
        volume.integrate(&frame, &intrinsics).unwrap();
        let t = volume.tsdf[idx];
        // One observation of 0 against a saturated weight of 255.
        let expected = 255.0 / 256.0;
        assert!((t - expected).abs() < 1e-4);
    }

    #[test]
    fn test_execution_order_independence() {
        let (mut parallel, intrinsics, frame) = plane_setup(32);
        parallel.integrate(&frame, &intrinsics).unwrap();

        let (mut forward, _, _) = plane_setup(32);
        integrate_in_order(&mut forward, &frame, &intrinsics, 0..parallel.len());

        let (mut reverse, _, _) = plane_setup(32);
        integrate_in_order(&mut reverse, &frame, &intrinsics, (0..parallel.len()).rev());

        assert_eq!(parallel.snapshot(), forward.snapshot());
        assert_eq!(parallel.snapshot(), reverse.snapshot());
    }

    #[test]
    fn test_image_mismatch_rejected() {
        let (mut volume, _, frame) = plane_setup(64);
        let other = CameraIntrinsics::new(32.0, 32.0, 15.5, 15.5, 32, 32).unwrap();
        let err = volume.integrate(&frame, &other).unwrap_err();
        assert!(matches!(err, VolumeError::ImageMismatch { .. }));
    }
}
