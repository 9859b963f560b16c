//! Trilinear sampling and finite-difference gradients over the grid.
//!
//! Boundary policy: corner lattice indices are clamped to the valid
//! grid, so queries inside `[0, dims)` always resolve; queries outside
//! return `None`.

use crate::volume::TsdfVolume;
use fusor_math::{Point3, Vec3};

/// The 8-corner neighborhood of a continuous voxel-space point:
/// clamped lattice indices and interpolation fractions per axis.
struct Corners {
    lo: [usize; 3],
    hi: [usize; 3],
    frac: [f32; 3],
}

impl TsdfVolume {
    fn corners(&self, p: &Point3) -> Option<Corners> {
        if !self.in_volumef(p) {
            return None;
        }
        let mut lo = [0usize; 3];
        let mut hi = [0usize; 3];
        let mut frac = [0f32; 3];
        for (axis, coord) in [p.x, p.y, p.z].into_iter().enumerate() {
            let base = coord.floor();
            let i = base as usize;
            lo[axis] = i.min(self.dims[axis] - 1);
            hi[axis] = (i + 1).min(self.dims[axis] - 1);
            frac[axis] = coord - base;
        }
        Some(Corners { lo, hi, frac })
    }

    /// Trilinear blend of `values` (indexed by the canonical linear
    /// index) around `p`.
    fn interpolate(&self, c: &Corners, values: impl Fn(usize) -> f32) -> f32 {
        let [fx, fy, fz] = c.frac;
        let mut acc = 0.0;
        for (zi, wz) in [(c.lo[2], 1.0 - fz), (c.hi[2], fz)] {
            for (yi, wy) in [(c.lo[1], 1.0 - fy), (c.hi[1], fy)] {
                for (xi, wx) in [(c.lo[0], 1.0 - fx), (c.hi[0], fx)] {
                    let w = wx * wy * wz;
                    if w > 0.0 {
                        acc += w * values(self.index_of([xi, yi, zi]));
                    }
                }
            }
        }
        acc
    }

    /// Interpolated distance at a continuous voxel-space point.
    ///
    /// At an exact lattice coordinate this returns the stored value.
    pub fn tsdf_at(&self, p: &Point3) -> Option<f32> {
        let c = self.corners(p)?;
        Some(self.interpolate(&c, |i| self.tsdf[i]))
    }

    /// Interpolated confidence weight at a continuous voxel-space point.
    pub fn weight_at(&self, p: &Point3) -> Option<f32> {
        let c = self.corners(p)?;
        Some(self.interpolate(&c, |i| self.weight[i] as f32))
    }

    /// Interpolated color at a continuous voxel-space point, one blend
    /// per channel.
    pub fn color_at(&self, p: &Point3) -> Option<Vec3> {
        let c = self.corners(p)?;
        Some(Vec3::new(
            self.interpolate(&c, |i| self.color[i][0] as f32),
            self.interpolate(&c, |i| self.color[i][1] as f32),
            self.interpolate(&c, |i| self.color[i][2] as f32),
        ))
    }

    /// Finite-difference distance gradient at an integer voxel.
    ///
    /// Central difference over the two lattice neighbors per axis,
    /// falling back to a one-sided difference at the grid faces.
    /// Un-normalized; callers normalize to obtain a surface normal.
    pub fn gradient(&self, c: [i32; 3]) -> Option<Vec3> {
        if !self.in_volume(c) {
            return None;
        }
        let mut g = [0f32; 3];
        for axis in 0..3 {
            let mut lo = c;
            let mut hi = c;
            lo[axis] -= 1;
            hi[axis] += 1;
            let (lo_v, lo_step) = if self.in_volume(lo) {
                (self.stored(lo), 1.0)
            } else {
                (self.stored(c), 0.0)
            };
            let (hi_v, hi_step) = if self.in_volume(hi) {
                (self.stored(hi), 1.0)
            } else {
                (self.stored(c), 0.0)
            };
            let span = lo_step + hi_step;
            g[axis] = if span > 0.0 { (hi_v - lo_v) / span } else { 0.0 };
        }
        Some(Vec3::new(g[0], g[1], g[2]))
    }

    /// Gradient at a continuous voxel-space point, evaluated at the
    /// nearest lattice voxel (the neighbor lookups themselves are never
    /// interpolated).
    pub fn gradient_at(&self, p: &Point3) -> Option<Vec3> {
        if !self.in_volumef(p) {
            return None;
        }
        // Rounding at the far faces may land one past the last lattice
        // voxel; clamp back in.
        let c = [
            (p.x.round() as usize).min(self.dims[0] - 1) as i32,
            (p.y.round() as usize).min(self.dims[1] - 1) as i32,
            (p.z.round() as usize).min(self.dims[2] - 1) as i32,
        ];
        self.gradient(c)
    }

    #[inline]
    fn stored(&self, c: [i32; 3]) -> f32 {
        self.tsdf[self.index_of([c[0] as usize, c[1] as usize, c[2] as usize])]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::VolumeParams;
    use approx::assert_relative_eq;

    fn ramp_volume() -> TsdfVolume {
        // tsdf = 0.1 * x, a linear ramp along the x axis.
        let mut v = TsdfVolume::new(VolumeParams::anchored(
            [5, 4, 4],
            0.1,
            0.3,
            Point3::origin(),
        ))
        .unwrap();
        for idx in 0..v.len() {
            let [x, _, _] = v.coord_of(idx);
            v.tsdf[idx] = 0.1 * x as f32;
        }
        v
    }

    #[test]
    fn test_lattice_point_exactness() {
        let mut v = ramp_volume();
        let idx = v.index_of([2, 1, 3]);
        v.tsdf[idx] = -0.7;
        let sampled = v.tsdf_at(&Point3::new(2.0, 1.0, 3.0)).unwrap();
        assert_eq!(sampled, -0.7);
    }

    #[test]
    fn test_midpoint_interpolation() {
        let v = ramp_volume();
        // Halfway between x=1 (0.1) and x=2 (0.2).
        let sampled = v.tsdf_at(&Point3::new(1.5, 2.0, 2.0)).unwrap();
        assert_relative_eq!(sampled, 0.15, epsilon = 1e-6);
    }

    #[test]
    fn test_outside_returns_none() {
        let v = ramp_volume();
        assert!(v.tsdf_at(&Point3::new(-0.01, 1.0, 1.0)).is_none());
        assert!(v.tsdf_at(&Point3::new(5.0, 1.0, 1.0)).is_none());
        assert!(v.weight_at(&Point3::new(0.0, 4.0, 0.0)).is_none());
    }

    #[test]
    fn test_boundary_corner_clamping() {
        let v = ramp_volume();
        // Query in the last cell along x: the +1 corner clamps to x=4,
        // so the blend stays within stored values.
        let sampled = v.tsdf_at(&Point3::new(4.5, 1.0, 1.0)).unwrap();
        assert_relative_eq!(sampled, 0.4, epsilon = 1e-6);
    }

    #[test]
    fn test_weight_interpolation() {
        let mut v = ramp_volume();
        let a = v.index_of([1, 1, 1]);
        let b = v.index_of([2, 1, 1]);
        v.weight[a] = 10;
        v.weight[b] = 20;
        let w = v.weight_at(&Point3::new(1.25, 1.0, 1.0)).unwrap();
        assert!((w - 12.5).abs() < 1e-4);
    }

    #[test]
    fn test_color_interpolation() {
        let mut v = ramp_volume();
        let a = v.index_of([1, 1, 1]);
        let b = v.index_of([2, 1, 1]);
        v.color[a] = [100, 0, 50];
        v.color[b] = [200, 0, 150];
        let c = v.color_at(&Point3::new(1.5, 1.0, 1.0)).unwrap();
        assert!((c.x - 150.0).abs() < 1e-3);
        assert!((c.y - 0.0).abs() < 1e-3);
        assert!((c.z - 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_gradient_on_ramp() {
        let v = ramp_volume();
        let g = v.gradient([2, 2, 2]).unwrap();
        assert!((g.x - 0.1).abs() < 1e-6);
        assert!(g.y.abs() < 1e-6);
        assert!(g.z.abs() < 1e-6);
    }

    #[test]
    fn test_gradient_one_sided_at_face() {
        let v = ramp_volume();
        // x=0 has no x-1 neighbor; one-sided difference still sees the ramp.
        let g = v.gradient([0, 2, 2]).unwrap();
        assert!((g.x - 0.1).abs() < 1e-6);
        assert!(v.gradient([-1, 2, 2]).is_none());
    }

    #[test]
    fn test_gradient_at_rounds_to_lattice() {
        let v = ramp_volume();
        let g = v.gradient_at(&Point3::new(2.4, 2.1, 1.9)).unwrap();
        assert!((g.x - 0.1).abs() < 1e-6);
    }
}
