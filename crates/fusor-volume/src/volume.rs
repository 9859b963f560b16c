//! Voxel grid storage, linear indexing, and coordinate conversions.

use fusor_math::{Point3, Transform};
use thiserror::Error;

/// Saturation cap for the per-voxel confidence weight.
pub const WEIGHT_MAX: u8 = u8::MAX;

/// Errors from volume construction and snapshot exchange.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// A grid dimension was zero.
    #[error("grid dimensions must be positive, got {0:?}")]
    EmptyDims([usize; 3]),

    /// Voxel edge length was zero, negative, or non-finite.
    #[error("voxel length must be positive, got {0}")]
    InvalidVoxelLength(f32),

    /// Truncation distance was zero, negative, or non-finite.
    #[error("truncation distance must be positive, got {0}")]
    InvalidTruncation(f32),

    /// The volume-to-world transform is not invertible.
    #[error("volume-to-world transform is singular")]
    SingularTransform,

    /// A camera pose handed to an operation is not invertible.
    #[error("camera pose is singular")]
    SingularPose,

    /// Frame pixel dimensions disagree with the intrinsics.
    #[error("frame is {frame_w}x{frame_h} but intrinsics describe {intr_w}x{intr_h}")]
    ImageMismatch {
        /// Frame width.
        frame_w: usize,
        /// Frame height.
        frame_h: usize,
        /// Intrinsics width.
        intr_w: usize,
        /// Intrinsics height.
        intr_h: usize,
    },

    /// A snapshot array length disagrees with the grid size.
    #[error("snapshot {field} has {actual} elements, volume holds {expected}")]
    SnapshotSizeMismatch {
        /// Which array mismatched.
        field: &'static str,
        /// Voxel count of the volume.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },
}

/// Creation-time parameters of a volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeParams {
    /// Voxel counts along each axis.
    pub dims: [usize; 3],
    /// Metric edge length of one voxel.
    pub voxel_length: f32,
    /// Metric truncation distance around the surface.
    pub sdf_trunc: f32,
    /// Placement of the volume in the world.
    pub volume_to_world: Transform,
}

impl VolumeParams {
    /// Axis-aligned cubic volume anchored at a world-space origin corner.
    pub fn anchored(dims: [usize; 3], voxel_length: f32, sdf_trunc: f32, origin: Point3) -> Self {
        Self {
            dims,
            voxel_length,
            sdf_trunc,
            volume_to_world: Transform::translation(origin.x, origin.y, origin.z),
        }
    }

    /// Total voxel count.
    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Reject degenerate parameters; returns the world-to-volume inverse
    /// on success. Shared by the CPU and GPU volume constructors so both
    /// fail synchronously, before any storage is allocated.
    pub fn validate(&self) -> Result<Transform, VolumeError> {
        let [dx, dy, dz] = self.dims;
        if dx == 0 || dy == 0 || dz == 0 {
            return Err(VolumeError::EmptyDims(self.dims));
        }
        if self.voxel_length <= 0.0 || !self.voxel_length.is_finite() {
            return Err(VolumeError::InvalidVoxelLength(self.voxel_length));
        }
        if self.sdf_trunc <= 0.0 || !self.sdf_trunc.is_finite() {
            return Err(VolumeError::InvalidTruncation(self.sdf_trunc));
        }
        self.volume_to_world
            .inverse()
            .ok_or(VolumeError::SingularTransform)
    }
}

/// Full host-side copy of a volume's voxel data, in canonical linear
/// order. The upload/download interchange and checkpoint payload type.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeSnapshot {
    /// Normalized truncated signed distance per voxel.
    pub tsdf: Vec<f32>,
    /// Confidence weight per voxel.
    pub weight: Vec<u8>,
    /// RGB color per voxel, channels in `[0, 255]`.
    pub color: Vec<[i32; 3]>,
}

/// The linear index of voxel `(x, y, z)`: x varies fastest, then y.
///
/// Every reader and writer of the grid - integration, sampling,
/// gradient, ray casting, the GPU kernels - uses this one bijection.
#[inline]
pub(crate) fn linear_index(dims: [usize; 3], c: [usize; 3]) -> usize {
    (c[2] * dims[1] + c[1]) * dims[0] + c[0]
}

/// Exact inverse of [`linear_index`].
#[inline]
pub(crate) fn voxel_coord(dims: [usize; 3], index: usize) -> [usize; 3] {
    [
        index % dims[0],
        (index / dims[0]) % dims[1],
        index / (dims[0] * dims[1]),
    ]
}

/// A dense truncated-signed-distance-field volume.
///
/// Three parallel arrays (distance, weight, color) over a fixed grid,
/// plus the transforms that place the grid in the world. The grid's
/// placement is immutable; re-create the volume to move it.
#[derive(Debug, Clone)]
pub struct TsdfVolume {
    pub(crate) dims: [usize; 3],
    pub(crate) voxel_length: f32,
    pub(crate) inv_voxel_length: f32,
    pub(crate) sdf_trunc: f32,
    pub(crate) vol_to_world: Transform,
    pub(crate) world_to_vol: Transform,
    pub(crate) tsdf: Vec<f32>,
    pub(crate) weight: Vec<u8>,
    pub(crate) color: Vec<[i32; 3]>,
}

impl TsdfVolume {
    /// Allocate a volume in its reset state.
    ///
    /// Degenerate parameters (zero dimension, non-positive voxel length
    /// or truncation distance, singular placement) are rejected here,
    /// synchronously, so the per-voxel kernels never see them.
    pub fn new(params: VolumeParams) -> Result<Self, VolumeError> {
        let world_to_vol = params.validate()?;
        let n = params.voxel_count();
        Ok(Self {
            dims: params.dims,
            voxel_length: params.voxel_length,
            inv_voxel_length: 1.0 / params.voxel_length,
            sdf_trunc: params.sdf_trunc,
            vol_to_world: params.volume_to_world,
            world_to_vol,
            tsdf: vec![1.0; n],
            weight: vec![0; n],
            color: vec![[0; 3]; n],
        })
    }

    /// Rebuild a volume from its parameters and a snapshot.
    pub fn from_parts(params: VolumeParams, snapshot: &VolumeSnapshot) -> Result<Self, VolumeError> {
        let mut volume = Self::new(params)?;
        volume.restore(snapshot)?;
        Ok(volume)
    }

    /// Voxel counts along each axis.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// The creation-time parameters, sufficient to rebuild the volume
    /// together with a snapshot.
    pub fn params(&self) -> VolumeParams {
        VolumeParams {
            dims: self.dims,
            voxel_length: self.voxel_length,
            sdf_trunc: self.sdf_trunc,
            volume_to_world: self.vol_to_world,
        }
    }

    /// Metric edge length of one voxel.
    pub fn voxel_length(&self) -> f32 {
        self.voxel_length
    }

    /// Metric truncation distance.
    pub fn sdf_trunc(&self) -> f32 {
        self.sdf_trunc
    }

    /// The volume's placement in the world.
    pub fn volume_to_world_transform(&self) -> &Transform {
        &self.vol_to_world
    }

    /// Total voxel count.
    pub fn len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Whether the grid holds zero voxels (never true after construction).
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Linear index of an in-bounds voxel coordinate.
    #[inline]
    pub fn index_of(&self, c: [usize; 3]) -> usize {
        linear_index(self.dims, c)
    }

    /// Voxel coordinate of a linear index; inverse of [`Self::index_of`].
    #[inline]
    pub fn coord_of(&self, index: usize) -> [usize; 3] {
        voxel_coord(self.dims, index)
    }

    /// Whether an integer voxel coordinate lies within `[0, dims)`.
    #[inline]
    pub fn in_volume(&self, c: [i32; 3]) -> bool {
        c[0] >= 0
            && c[1] >= 0
            && c[2] >= 0
            && (c[0] as usize) < self.dims[0]
            && (c[1] as usize) < self.dims[1]
            && (c[2] as usize) < self.dims[2]
    }

    /// Whether a continuous voxel-space point lies within `[0, dims)`.
    #[inline]
    pub fn in_volumef(&self, p: &Point3) -> bool {
        p.x >= 0.0
            && p.y >= 0.0
            && p.z >= 0.0
            && p.x < self.dims[0] as f32
            && p.y < self.dims[1] as f32
            && p.z < self.dims[2] as f32
    }

    /// World space to volume-local metric space.
    #[inline]
    pub fn world_to_volume(&self, p: &Point3) -> Point3 {
        self.world_to_vol.apply_point(p)
    }

    /// Volume-local metric space to world space.
    #[inline]
    pub fn volume_to_world(&self, p: &Point3) -> Point3 {
        self.vol_to_world.apply_point(p)
    }

    /// Volume-local metric space to continuous voxel space.
    ///
    /// Integer voxel `(x, y, z)` sits exactly at voxel-space `(x, y, z)`.
    #[inline]
    pub fn volume_to_voxelf(&self, p: &Point3) -> Point3 {
        Point3::new(
            p.x * self.inv_voxel_length,
            p.y * self.inv_voxel_length,
            p.z * self.inv_voxel_length,
        )
    }

    /// Continuous voxel space to volume-local metric space.
    #[inline]
    pub fn voxelf_to_volume(&self, p: &Point3) -> Point3 {
        Point3::new(
            p.x * self.voxel_length,
            p.y * self.voxel_length,
            p.z * self.voxel_length,
        )
    }

    /// World space to continuous voxel space.
    #[inline]
    pub fn world_to_voxelf(&self, p: &Point3) -> Point3 {
        self.volume_to_voxelf(&self.world_to_volume(p))
    }

    /// Continuous voxel space to world space.
    #[inline]
    pub fn voxelf_to_world(&self, p: &Point3) -> Point3 {
        self.volume_to_world(&self.voxelf_to_volume(p))
    }

    /// Reinitialize every voxel to `(tsdf = +1, weight = 0, color = 0)`
    /// without reallocating.
    pub fn reset(&mut self) {
        self.tsdf.fill(1.0);
        self.weight.fill(0);
        self.color.fill([0; 3]);
    }

    /// The stored `(tsdf, weight, color)` of a voxel, or `None` outside
    /// the grid.
    pub fn voxel(&self, c: [i32; 3]) -> Option<(f32, u8, [i32; 3])> {
        if !self.in_volume(c) {
            return None;
        }
        let idx = self.index_of([c[0] as usize, c[1] as usize, c[2] as usize]);
        Some((self.tsdf[idx], self.weight[idx], self.color[idx]))
    }

    /// Stored distances in canonical linear order.
    pub fn tsdf_data(&self) -> &[f32] {
        &self.tsdf
    }

    /// Stored weights in canonical linear order.
    pub fn weight_data(&self) -> &[u8] {
        &self.weight
    }

    /// Stored colors in canonical linear order.
    pub fn color_data(&self) -> &[[i32; 3]] {
        &self.color
    }

    /// Copy the full grid out (the host-side "download").
    pub fn snapshot(&self) -> VolumeSnapshot {
        VolumeSnapshot {
            tsdf: self.tsdf.clone(),
            weight: self.weight.clone(),
            color: self.color.clone(),
        }
    }

    /// Overwrite the full grid from a snapshot (the host-side "upload").
    ///
    /// Every array length is checked against the grid size before any
    /// element is copied; a mismatch aborts with no partial write.
    pub fn restore(&mut self, snapshot: &VolumeSnapshot) -> Result<(), VolumeError> {
        let n = self.len();
        for (field, actual) in [
            ("tsdf", snapshot.tsdf.len()),
            ("weight", snapshot.weight.len()),
            ("color", snapshot.color.len()),
        ] {
            if actual != n {
                return Err(VolumeError::SnapshotSizeMismatch {
                    field,
                    expected: n,
                    actual,
                });
            }
        }
        self.tsdf.copy_from_slice(&snapshot.tsdf);
        self.weight.copy_from_slice(&snapshot.weight);
        self.color.copy_from_slice(&snapshot.color);
        Ok(())
    }
}
