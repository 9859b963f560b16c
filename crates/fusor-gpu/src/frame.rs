//! Device-resident frame buffers.

use crate::context::GpuContext;
use fusor_math::Transform;
use fusor_volume::Frame;
use wgpu::util::DeviceExt;

/// One frame's color and depth samples resident on the GPU, read-only
/// input to integration.
///
/// Depth keeps its raw `u16` values widened to one `u32` per pixel;
/// color is packed `0x00BBGGRR`. Both layouts match what the kernels
/// unpack.
pub struct GpuFrame {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) depth_scale: f32,
    pub(crate) cam_to_world: Transform,
    pub(crate) world_to_cam: Transform,
    pub(crate) depth: wgpu::Buffer,
    pub(crate) color: wgpu::Buffer,
}

impl GpuFrame {
    /// Upload a host frame to the device.
    pub fn upload(ctx: &GpuContext, frame: &Frame) -> Self {
        let depth_data: Vec<u32> = frame.depth.as_slice().iter().map(|&d| d as u32).collect();
        let color_data: Vec<u32> = frame
            .color
            .as_slice()
            .iter()
            .map(|&[r, g, b]| (r as u32) | ((g as u32) << 8) | ((b as u32) << 16))
            .collect();

        let depth = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frame Depth Buffer"),
                contents: bytemuck::cast_slice(&depth_data),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let color = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frame Color Buffer"),
                contents: bytemuck::cast_slice(&color_data),
                usage: wgpu::BufferUsages::STORAGE,
            });

        Self {
            width: frame.width() as u32,
            height: frame.height() as u32,
            depth_scale: frame.depth_scale,
            cam_to_world: frame.cam_to_world,
            world_to_cam: *frame.world_to_cam(),
            depth,
            color,
        }
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// The camera-to-world pose the frame was captured under.
    pub fn cam_to_world(&self) -> &Transform {
        &self.cam_to_world
    }
}
