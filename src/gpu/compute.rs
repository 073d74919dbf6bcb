/// Compute path: one storage-texture dispatch per operation

use wgpu::util::DeviceExt;

use super::context::GpuContext;
use super::params::{GpuKernelParams, Kernel};
use super::shaders;
use super::surface::{Surface, SURFACE_FORMAT};
use crate::geometry::workgroup_count;

/// The three compute pipelines and their shared bind group layout
pub struct ComputeKernels {
    bind_group_layout: wgpu::BindGroupLayout,
    pipelines: [wgpu::ComputePipeline; 3],
}

impl ComputeKernels {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Preprocess Compute Shader"),
            source: wgpu::ShaderSource::Wgsl(shaders::compute_shader().into()),
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Compute Bind Group Layout"),
            entries: &[
                // Source surface
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Destination surface
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::StorageTexture {
                        access: wgpu::StorageTextureAccess::WriteOnly,
                        format: SURFACE_FORMAT,
                        view_dimension: wgpu::TextureViewDimension::D2,
                    },
                    count: None,
                },
                // Kernel params
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Compute Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipelines = Kernel::ALL.map(|kernel| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.compute_entry()),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: kernel.compute_entry(),
            })
        });

        log::debug!("compute kernels compiled");

        Self {
            bind_group_layout,
            pipelines,
        }
    }

    /// Encode and submit one dispatch covering `dst` with 8x8 workgroups
    pub fn dispatch(
        &self,
        ctx: &GpuContext,
        kernel: Kernel,
        src: &Surface,
        dst: &Surface,
        params: &GpuKernelParams,
    ) {
        let uniform_buffer = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Kernel Params Uniform Buffer"),
            contents: bytemuck::bytes_of(params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Compute Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(src.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(dst.view()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let (groups_x, groups_y) = workgroup_count(dst.extent());
        log::debug!(
            "dispatch {} {} -> {} ({}x{} groups)",
            kernel.compute_entry(),
            src.extent(),
            dst.extent(),
            groups_x,
            groups_y,
        );

        let mut encoder = ctx.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Compute Encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(kernel.compute_entry()),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipelines[kernel.index()]);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(groups_x, groups_y, 1);
        }
        ctx.queue.submit(Some(encoder.finish()));
    }
}
