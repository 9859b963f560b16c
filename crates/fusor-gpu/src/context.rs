//! GPU context management for wgpu device and queue.

use std::sync::OnceLock;
use thiserror::Error;
use wgpu::{Device, Instance, Queue};

static GPU_CONTEXT: OnceLock<GpuContext> = OnceLock::new();

/// Errors that can occur during GPU operations.
#[derive(Debug, Error)]
pub enum GpuError {
    /// No compatible GPU adapter found.
    #[error("No compatible GPU adapter found")]
    NoAdapter,

    /// GPU context was already initialized.
    #[error("GPU context already initialized")]
    AlreadyInitialized,

    /// Failed to request GPU device.
    #[error("Failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// Buffer mapping failed.
    #[error("Buffer mapping failed")]
    BufferMapping,

    /// GPU context not initialized.
    #[error("GPU context not initialized - call GpuContext::init() first")]
    NotInitialized,

    /// Device memory exhausted while allocating volume storage.
    #[error("Device allocation failed: {0}")]
    Allocation(String),

    /// A host buffer length disagrees with the device volume size.
    #[error("{field} has {actual} elements, device volume holds {expected}")]
    SizeMismatch {
        /// Which array mismatched.
        field: &'static str,
        /// Element count of the device volume.
        expected: usize,
        /// Element count actually supplied.
        actual: usize,
    },

    /// Operation attempted on a released volume.
    #[error("Volume storage has been released")]
    Released,

    /// Parameter validation failed before touching the device.
    #[error(transparent)]
    Volume(#[from] fusor_volume::VolumeError),
}

/// Global GPU context holding device and queue.
pub struct GpuContext {
    /// The wgpu device for creating resources and pipelines.
    pub device: Device,
    /// The command queue for submitting work.
    pub queue: Queue,
}

impl GpuContext {
    /// Initialize the GPU context asynchronously.
    ///
    /// This should be called once at application startup. Subsequent
    /// calls return the existing context.
    pub async fn init() -> Result<&'static Self, GpuError> {
        if let Some(ctx) = GPU_CONTEXT.get() {
            return Ok(ctx);
        }

        let instance = Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await?;

        GPU_CONTEXT
            .set(GpuContext { device, queue })
            .map_err(|_| GpuError::AlreadyInitialized)?;

        Ok(GPU_CONTEXT.get().expect("context was just stored"))
    }

    /// Get the GPU context if it has been initialized.
    pub fn get() -> Option<&'static Self> {
        GPU_CONTEXT.get()
    }

    /// Get the GPU context, returning an error if not initialized.
    pub fn require() -> Result<&'static Self, GpuError> {
        GPU_CONTEXT.get().ok_or(GpuError::NotInitialized)
    }

    /// Initialize the GPU context synchronously (native only).
    #[cfg(not(target_arch = "wasm32"))]
    pub fn init_blocking() -> Result<&'static Self, GpuError> {
        pollster::block_on(Self::init())
    }

    /// Block until all submitted work has completed.
    ///
    /// Kernel launches and copies are queued asynchronously; callers
    /// that are about to read results go through this barrier.
    pub fn sync(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
