//! WGSL shader sources for the TSDF kernels.

/// Volume kernels: `reset` and `integrate`, one invocation per voxel.
pub const TSDF_SHADER: &str = include_str!("tsdf.wgsl");

/// Ray casting kernel, one invocation per output pixel.
pub const RAYCAST_SHADER: &str = include_str!("raycast.wgsl");
