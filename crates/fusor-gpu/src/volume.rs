//! Device-side volume lifecycle: allocation, kernel launches, transfers.

use crate::context::{GpuContext, GpuError};
use crate::frame::GpuFrame;
use bytemuck::{Pod, Zeroable};
use fusor_math::{Point3, Transform};
use fusor_volume::{CameraIntrinsics, RaycastImage, VolumeError, VolumeParams, VolumeSnapshot};
use wgpu::util::DeviceExt;

/// Workgroup width for the 1D per-voxel kernels.
const VOXEL_WORKGROUP: u32 = 256;

/// Workgroup edge for the 2D per-pixel kernel.
const PIXEL_WORKGROUP: u32 = 8;

/// Uniform mirror of the volume metadata, bound to every kernel.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct VolumeUniform {
    world_to_vol: [f32; 16],
    vol_to_world: [f32; 16],
    dims: [u32; 3],
    voxel_count: u32,
    voxel_length: f32,
    inv_voxel_length: f32,
    sdf_trunc: f32,
    weight_cap: u32,
}

/// Per-integration uniform: volume-to-camera transform plus intrinsics.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct FrameUniform {
    vol_to_cam: [f32; 16],
    width: u32,
    height: u32,
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
    depth_scale: f32,
    _pad: f32,
}

/// Per-raycast uniform: view pose, camera origin in voxel space,
/// intrinsics.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ViewUniform {
    cam_to_world: [f32; 16],
    origin_v: [f32; 4],
    width: u32,
    height: u32,
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
    _pad0: f32,
    _pad1: f32,
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// The compiled kernels and the layouts their per-dispatch bind groups
/// are created against.
struct Pipelines {
    reset: wgpu::ComputePipeline,
    integrate: wgpu::ComputePipeline,
    raycast: wgpu::ComputePipeline,
    frame_layout: wgpu::BindGroupLayout,
    view_layout: wgpu::BindGroupLayout,
}

/// A TSDF volume resident in GPU memory.
///
/// Owns the device storage and serializes every operation on it: all
/// mutating operations take `&mut self`, so two kernels or a kernel and
/// a transfer can never overlap on one volume. Duplicating the volume
/// goes through [`GpuTsdfVolume::try_clone`], which deep-copies device
/// storage; the handle is deliberately not `Clone`.
pub struct GpuTsdfVolume {
    params: VolumeParams,
    world_to_vol: Transform,
    voxel_count: usize,
    uniform: wgpu::Buffer,
    tsdf: wgpu::Buffer,
    weight: wgpu::Buffer,
    color: wgpu::Buffer,
    volume_group: wgpu::BindGroup,
    raycast_volume_group: wgpu::BindGroup,
    pipelines: Pipelines,
    released: bool,
}

impl GpuTsdfVolume {
    /// Allocate device storage for a volume and reset it.
    ///
    /// Allocation runs under an out-of-memory error scope; on failure
    /// every buffer created so far is dropped and the error is returned,
    /// leaving no half-allocated volume behind.
    pub fn new(ctx: &GpuContext, params: VolumeParams) -> Result<Self, GpuError> {
        let world_to_vol = params.validate()?;
        let voxel_count = params.voxel_count();

        let uniform_data = VolumeUniform {
            world_to_vol: world_to_vol.to_cols_array(),
            vol_to_world: params.volume_to_world.to_cols_array(),
            dims: [
                params.dims[0] as u32,
                params.dims[1] as u32,
                params.dims[2] as u32,
            ],
            voxel_count: voxel_count as u32,
            voxel_length: params.voxel_length,
            inv_voxel_length: 1.0 / params.voxel_length,
            sdf_trunc: params.sdf_trunc,
            weight_cap: fusor_volume::WEIGHT_MAX as u32,
        };

        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let uniform = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Volume Uniform"),
                contents: bytemuck::bytes_of(&uniform_data),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let storage_usage =
            wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        let tsdf = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Volume TSDF Buffer"),
            size: (voxel_count * 4) as u64,
            usage: storage_usage,
            mapped_at_creation: false,
        });
        let weight = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Volume Weight Buffer"),
            size: (voxel_count * 4) as u64,
            usage: storage_usage,
            mapped_at_creation: false,
        });
        let color = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Volume Color Buffer"),
            size: (voxel_count * 3 * 4) as u64,
            usage: storage_usage,
            mapped_at_creation: false,
        });

        if let Some(err) = pollster::block_on(ctx.device.pop_error_scope()) {
            return Err(GpuError::Allocation(err.to_string()));
        }

        let (pipelines, volume_group, raycast_volume_group) =
            build_pipelines(ctx, &uniform, &tsdf, &weight, &color);

        let mut volume = Self {
            params,
            world_to_vol,
            voxel_count,
            uniform,
            tsdf,
            weight,
            color,
            volume_group,
            raycast_volume_group,
            pipelines,
            released: false,
        };
        volume.reset(ctx)?;
        Ok(volume)
    }

    /// Creation-time parameters of this volume.
    pub fn params(&self) -> &VolumeParams {
        &self.params
    }

    /// Total voxel count.
    pub fn voxel_count(&self) -> usize {
        self.voxel_count
    }

    fn ensure_live(&self) -> Result<(), GpuError> {
        if self.released {
            Err(GpuError::Released)
        } else {
            Ok(())
        }
    }

    /// Free the device storage. Idempotent; later operations on this
    /// volume fail with [`GpuError::Released`].
    pub fn release(&mut self) {
        if !self.released {
            self.tsdf.destroy();
            self.weight.destroy();
            self.color.destroy();
            self.uniform.destroy();
            self.released = true;
        }
    }

    /// Reinitialize every voxel to `(tsdf = +1, weight = 0, color = 0)`.
    pub fn reset(&mut self, ctx: &GpuContext) -> Result<(), GpuError> {
        self.ensure_live()?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Reset Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Reset Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.reset);
            pass.set_bind_group(0, &self.volume_group, &[]);
            pass.dispatch_workgroups((self.voxel_count as u32).div_ceil(VOXEL_WORKGROUP), 1, 1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        ctx.sync();
        Ok(())
    }

    /// Fuse one uploaded frame into the volume.
    pub fn integrate(
        &mut self,
        ctx: &GpuContext,
        frame: &GpuFrame,
        intrinsics: &CameraIntrinsics,
    ) -> Result<(), GpuError> {
        self.ensure_live()?;
        if frame.width as usize != intrinsics.width || frame.height as usize != intrinsics.height {
            return Err(GpuError::Volume(VolumeError::ImageMismatch {
                frame_w: frame.width as usize,
                frame_h: frame.height as usize,
                intr_w: intrinsics.width,
                intr_h: intrinsics.height,
            }));
        }

        let vol_to_cam = frame.world_to_cam.then(&self.params.volume_to_world);
        let frame_uniform = FrameUniform {
            vol_to_cam: vol_to_cam.to_cols_array(),
            width: frame.width,
            height: frame.height,
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            cx: intrinsics.cx,
            cy: intrinsics.cy,
            depth_scale: frame.depth_scale,
            _pad: 0.0,
        };
        let frame_uniform = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Frame Uniform"),
                contents: bytemuck::bytes_of(&frame_uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let frame_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Frame Bind Group"),
            layout: &self.pipelines.frame_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: frame.depth.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: frame.color.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Integrate Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Integrate Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.integrate);
            pass.set_bind_group(0, &self.volume_group, &[]);
            pass.set_bind_group(1, &frame_group, &[]);
            pass.dispatch_workgroups((self.voxel_count as u32).div_ceil(VOXEL_WORKGROUP), 1, 1);
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
        ctx.sync();
        Ok(())
    }

    /// Cast one ray per pixel of the view and read the hit image back.
    pub fn raycast(
        &self,
        ctx: &GpuContext,
        intrinsics: &CameraIntrinsics,
        cam_to_world: &Transform,
    ) -> Result<RaycastImage, GpuError> {
        self.ensure_live()?;
        cam_to_world
            .inverse()
            .ok_or(GpuError::Volume(VolumeError::SingularPose))?;

        let width = intrinsics.width as u32;
        let height = intrinsics.height as u32;
        let pixel_count = (width * height) as usize;

        let origin_world = cam_to_world.origin();
        let origin_vol = self.world_to_vol.apply_point(&origin_world);
        let inv_len = 1.0 / self.params.voxel_length;
        let view_uniform = ViewUniform {
            cam_to_world: cam_to_world.to_cols_array(),
            origin_v: [
                origin_vol.x * inv_len,
                origin_vol.y * inv_len,
                origin_vol.z * inv_len,
                0.0,
            ],
            width,
            height,
            fx: intrinsics.fx,
            fy: intrinsics.fy,
            cx: intrinsics.cx,
            cy: intrinsics.cy,
            _pad0: 0.0,
            _pad1: 0.0,
        };
        let view_uniform = ctx
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("View Uniform"),
                contents: bytemuck::bytes_of(&view_uniform),
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let hits = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Hit Buffer"),
            size: (pixel_count * 16) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let view_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("View Bind Group"),
            layout: &self.pipelines.view_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: view_uniform.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: hits.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Raycast Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Raycast Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines.raycast);
            pass.set_bind_group(0, &self.raycast_volume_group, &[]);
            pass.set_bind_group(1, &view_group, &[]);
            pass.dispatch_workgroups(
                width.div_ceil(PIXEL_WORKGROUP),
                height.div_ceil(PIXEL_WORKGROUP),
                1,
            );
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));

        let bytes = read_buffer(ctx, &hits, (pixel_count * 16) as u64)?;
        let raw: Vec<[f32; 4]> = bytemuck::pod_collect_to_vec(&bytes);
        let points = raw
            .iter()
            .map(|&[x, y, z, hit]| {
                if hit != 0.0 {
                    Some(Point3::new(x, y, z))
                } else {
                    None
                }
            })
            .collect();
        RaycastImage::from_points(intrinsics.width, intrinsics.height, points)
            .ok_or(GpuError::BufferMapping)
    }

    /// Overwrite the full device volume from a host snapshot.
    ///
    /// Every array length is checked before any byte is queued; a
    /// mismatch aborts with no partial copy.
    pub fn upload(&mut self, ctx: &GpuContext, snapshot: &VolumeSnapshot) -> Result<(), GpuError> {
        self.ensure_live()?;
        for (field, actual) in [
            ("tsdf", snapshot.tsdf.len()),
            ("weight", snapshot.weight.len()),
            ("color", snapshot.color.len()),
        ] {
            if actual != self.voxel_count {
                return Err(GpuError::SizeMismatch {
                    field,
                    expected: self.voxel_count,
                    actual,
                });
            }
        }

        let weight_wide: Vec<u32> = snapshot.weight.iter().map(|&w| w as u32).collect();
        ctx.queue
            .write_buffer(&self.tsdf, 0, bytemuck::cast_slice(&snapshot.tsdf));
        ctx.queue
            .write_buffer(&self.weight, 0, bytemuck::cast_slice(&weight_wide));
        ctx.queue
            .write_buffer(&self.color, 0, bytemuck::cast_slice(&snapshot.color));
        ctx.queue.submit(std::iter::empty());
        ctx.sync();
        Ok(())
    }

    /// Copy the full device volume into a host snapshot.
    pub fn download(&self, ctx: &GpuContext) -> Result<VolumeSnapshot, GpuError> {
        self.ensure_live()?;
        let tsdf_bytes = read_buffer(ctx, &self.tsdf, (self.voxel_count * 4) as u64)?;
        let weight_bytes = read_buffer(ctx, &self.weight, (self.voxel_count * 4) as u64)?;
        let color_bytes = read_buffer(ctx, &self.color, (self.voxel_count * 3 * 4) as u64)?;

        let tsdf: Vec<f32> = bytemuck::pod_collect_to_vec(&tsdf_bytes);
        let weight: Vec<u8> = bytemuck::pod_collect_to_vec::<u8, u32>(&weight_bytes)
            .iter()
            .map(|&w| w.min(fusor_volume::WEIGHT_MAX as u32) as u8)
            .collect();
        let color: Vec<[i32; 3]> = bytemuck::pod_collect_to_vec(&color_bytes);

        Ok(VolumeSnapshot {
            tsdf,
            weight,
            color,
        })
    }

    /// Duplicate the logical volume into freshly allocated device
    /// storage. The copy shares nothing with `self`.
    pub fn try_clone(&self, ctx: &GpuContext) -> Result<Self, GpuError> {
        self.ensure_live()?;
        let clone = Self::new(ctx, self.params)?;
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clone Encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.tsdf, 0, &clone.tsdf, 0, (self.voxel_count * 4) as u64);
        encoder.copy_buffer_to_buffer(
            &self.weight,
            0,
            &clone.weight,
            0,
            (self.voxel_count * 4) as u64,
        );
        encoder.copy_buffer_to_buffer(
            &self.color,
            0,
            &clone.color,
            0,
            (self.voxel_count * 3 * 4) as u64,
        );
        ctx.queue.submit(std::iter::once(encoder.finish()));
        ctx.sync();
        Ok(clone)
    }
}

/// Synchronous staged readback of a device buffer.
fn read_buffer(ctx: &GpuContext, src: &wgpu::Buffer, size: u64) -> Result<Vec<u8>, GpuError> {
    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Buffer"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_buffer_to_buffer(src, 0, &staging, 0, size);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.sync();
    rx.recv()
        .map_err(|_| GpuError::BufferMapping)?
        .map_err(|_| GpuError::BufferMapping)?;

    let data = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(data)
}

/// Compile both shader modules and wire up their layouts and the
/// per-volume bind groups.
fn build_pipelines(
    ctx: &GpuContext,
    uniform: &wgpu::Buffer,
    tsdf: &wgpu::Buffer,
    weight: &wgpu::Buffer,
    color: &wgpu::Buffer,
) -> (Pipelines, wgpu::BindGroup, wgpu::BindGroup) {
    let tsdf_module = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("TSDF Shader"),
            source: wgpu::ShaderSource::Wgsl(crate::shaders::TSDF_SHADER.into()),
        });
    let raycast_module = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Raycast Shader"),
            source: wgpu::ShaderSource::Wgsl(crate::shaders::RAYCAST_SHADER.into()),
        });

    let volume_layout = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Volume Bind Group Layout"),
            entries: &[
                uniform_entry(0),
                storage_entry(1, false),
                storage_entry(2, false),
                storage_entry(3, false),
            ],
        });
    let frame_layout = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Frame Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, true), storage_entry(2, true)],
        });
    let raycast_volume_layout = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Raycast Volume Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, true)],
        });
    let view_layout = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("View Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, false)],
        });

    let reset_layout = ctx
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Reset Pipeline Layout"),
            bind_group_layouts: &[&volume_layout],
            push_constant_ranges: &[],
        });
    let integrate_layout = ctx
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Integrate Pipeline Layout"),
            bind_group_layouts: &[&volume_layout, &frame_layout],
            push_constant_ranges: &[],
        });
    let raycast_layout = ctx
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Raycast Pipeline Layout"),
            bind_group_layouts: &[&raycast_volume_layout, &view_layout],
            push_constant_ranges: &[],
        });

    let reset = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Reset Pipeline"),
            layout: Some(&reset_layout),
            module: &tsdf_module,
            entry_point: Some("reset"),
            compilation_options: Default::default(),
            cache: None,
        });
    let integrate = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Integrate Pipeline"),
            layout: Some(&integrate_layout),
            module: &tsdf_module,
            entry_point: Some("integrate"),
            compilation_options: Default::default(),
            cache: None,
        });
    let raycast = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Raycast Pipeline"),
            layout: Some(&raycast_layout),
            module: &raycast_module,
            entry_point: Some("raycast"),
            compilation_options: Default::default(),
            cache: None,
        });

    let volume_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Volume Bind Group"),
        layout: &volume_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: tsdf.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: weight.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: color.as_entire_binding(),
            },
        ],
    });
    let raycast_volume_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Raycast Volume Bind Group"),
        layout: &raycast_volume_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: tsdf.as_entire_binding(),
            },
        ],
    });

    (
        Pipelines {
            reset,
            integrate,
            raycast,
            frame_layout,
            view_layout,
        },
        volume_group,
        raycast_volume_group,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusor_volume::{Frame, Image2, TsdfVolume};

    fn params() -> VolumeParams {
        VolumeParams::anchored([8, 8, 8], 0.1, 0.3, Point3::new(-0.4, -0.4, 0.6))
    }

    fn synthetic_frame() -> (Frame, CameraIntrinsics) {
        let intrinsics = CameraIntrinsics::new(16.0, 16.0, 7.5, 7.5, 16, 16).unwrap();
        let depth = Image2::new(16, 16, 1000u16);
        let color = Image2::new(16, 16, [50u8, 100, 150]);
        let frame = Frame::new(color, depth, Transform::identity(), 0.001).unwrap();
        (frame, intrinsics)
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_create_starts_reset() {
        let ctx = GpuContext::init_blocking().unwrap();
        let volume = GpuTsdfVolume::new(ctx, params()).unwrap();
        let snap = volume.download(ctx).unwrap();
        assert!(snap.tsdf.iter().all(|&t| t == 1.0));
        assert!(snap.weight.iter().all(|&w| w == 0));
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_upload_download_round_trip() {
        let ctx = GpuContext::init_blocking().unwrap();
        let mut volume = GpuTsdfVolume::new(ctx, params()).unwrap();
        let mut snap = volume.download(ctx).unwrap();
        snap.tsdf[17] = -0.25;
        snap.weight[17] = 42;
        snap.color[17] = [10, 20, 30];
        volume.upload(ctx, &snap).unwrap();
        assert_eq!(volume.download(ctx).unwrap(), snap);
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_upload_size_mismatch() {
        let ctx = GpuContext::init_blocking().unwrap();
        let mut volume = GpuTsdfVolume::new(ctx, params()).unwrap();
        let mut snap = volume.download(ctx).unwrap();
        snap.tsdf.pop();
        let err = volume.upload(ctx, &snap).unwrap_err();
        assert!(matches!(err, GpuError::SizeMismatch { field: "tsdf", .. }));
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_integrate_matches_cpu() {
        let ctx = GpuContext::init_blocking().unwrap();
        let (frame, intrinsics) = synthetic_frame();

        let mut gpu = GpuTsdfVolume::new(ctx, params()).unwrap();
        let gpu_frame = GpuFrame::upload(ctx, &frame);
        gpu.integrate(ctx, &gpu_frame, &intrinsics).unwrap();
        let gpu_snap = gpu.download(ctx).unwrap();

        let mut cpu = TsdfVolume::new(params()).unwrap();
        cpu.integrate(&frame, &intrinsics).unwrap();
        let cpu_snap = cpu.snapshot();

        assert_eq!(gpu_snap.weight, cpu_snap.weight);
        assert_eq!(gpu_snap.color, cpu_snap.color);
        for (g, c) in gpu_snap.tsdf.iter().zip(&cpu_snap.tsdf) {
            assert!((g - c).abs() < 1e-4, "gpu {g} vs cpu {c}");
        }
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_raycast_matches_cpu() {
        let ctx = GpuContext::init_blocking().unwrap();
        let (frame, intrinsics) = synthetic_frame();
        let pose = Transform::identity();

        let mut gpu = GpuTsdfVolume::new(ctx, params()).unwrap();
        let gpu_frame = GpuFrame::upload(ctx, &frame);
        for _ in 0..5 {
            gpu.integrate(ctx, &gpu_frame, &intrinsics).unwrap();
        }
        let gpu_image = gpu.raycast(ctx, &intrinsics, &pose).unwrap();

        let mut cpu = TsdfVolume::new(params()).unwrap();
        for _ in 0..5 {
            cpu.integrate(&frame, &intrinsics).unwrap();
        }
        let cpu_image = cpu.raycast(&intrinsics, &pose).unwrap();

        for v in 0..intrinsics.height {
            for u in 0..intrinsics.width {
                match (gpu_image.hit(u, v), cpu_image.hit(u, v)) {
                    (Some(g), Some(c)) => assert!((g - c).norm() < 0.05),
                    (None, None) => {}
                    (g, c) => panic!("pixel ({u}, {v}): gpu {g:?} vs cpu {c:?}"),
                }
            }
        }
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_clone_is_independent() {
        let ctx = GpuContext::init_blocking().unwrap();
        let (frame, intrinsics) = synthetic_frame();
        let mut volume = GpuTsdfVolume::new(ctx, params()).unwrap();
        let gpu_frame = GpuFrame::upload(ctx, &frame);
        volume.integrate(ctx, &gpu_frame, &intrinsics).unwrap();

        let clone = volume.try_clone(ctx).unwrap();
        let before = clone.download(ctx).unwrap();
        volume.reset(ctx).unwrap();
        assert_eq!(clone.download(ctx).unwrap(), before);
        assert!(volume.download(ctx).unwrap().weight.iter().all(|&w| w == 0));
    }

    #[test]
    #[ignore = "requires GPU"]
    fn test_release_is_idempotent() {
        let ctx = GpuContext::init_blocking().unwrap();
        let mut volume = GpuTsdfVolume::new(ctx, params()).unwrap();
        volume.release();
        volume.release();
        assert!(matches!(volume.download(ctx), Err(GpuError::Released)));
        assert!(matches!(volume.reset(ctx), Err(GpuError::Released)));
    }
}
