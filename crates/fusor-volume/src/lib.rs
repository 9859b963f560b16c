#![warn(missing_docs)]

//! TSDF voxel volume engine.
//!
//! Fuses a stream of posed depth/color frames into a truncated signed
//! distance field stored on a dense voxel grid, and extracts surface
//! information back out by ray casting. This crate is the CPU reference
//! implementation; `fusor-gpu` mirrors it with wgpu compute kernels.
//!
//! # Architecture
//!
//! - [`CameraIntrinsics`] - pinhole projection model
//! - [`Frame`] - one posed color+depth observation
//! - [`TsdfVolume`] - the voxel grid and its update/query algorithms
//! - [`RaycastImage`] - per-pixel surface extraction result
//!
//! The distance field is stored normalized: every voxel holds
//! `sdf / sdf_trunc`, clamped to `[-1, 1]`, negative behind the observed
//! surface. Unobserved voxels sit at `+1` with weight `0`.

mod camera;
mod frame;
mod image;
mod integrate;
mod raycast;
mod sample;
mod volume;

pub use camera::{CameraError, CameraIntrinsics};
pub use frame::{Frame, FrameError};
pub use image::Image2;
pub use raycast::RaycastImage;
pub use volume::{TsdfVolume, VolumeError, VolumeParams, VolumeSnapshot, WEIGHT_MAX};
