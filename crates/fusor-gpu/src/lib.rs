//! GPU-accelerated TSDF fusion for fusor.
//!
//! This crate mirrors the `fusor-volume` engine with WebGPU compute
//! shaders: one thread per voxel for reset and integration, one thread
//! per pixel for ray casting. The host side owns all device storage and
//! serializes every operation on a volume; the kernels share the exact
//! index bijection and update rules of the CPU implementation.

#![warn(missing_docs)]

mod context;
mod frame;
mod volume;

pub mod shaders;

pub use context::{GpuContext, GpuError};
pub use frame::GpuFrame;
pub use volume::GpuTsdfVolume;
