use anyhow::Result;
use crossbeam_channel::Receiver;
use image::RgbaImage;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;

use crate::backend::{DrawCall, PipelineKind, RenderBackend};
use crate::compile::Program;
use crate::error::RenderError;
use crate::types::{
    Antialiasing, BackendKind, ELEMENT_STRIDE_BYTES, FULLSCREEN_TRIANGLE, UNIT_QUAD,
};

use super::context::GpuContext;
use super::pipeline::{self, PipelineTargets};
use super::probe::DeviceEvent;
use super::textures::TextureSlots;

const INITIAL_UNIFORM_BYTES: u64 = 256;

struct MultisampleTarget {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

impl MultisampleTarget {
    fn new(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        size: PhysicalSize<u32>,
        sample_count: u32,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("msaa color target"),
            size: wgpu::Extent3d {
                width: size.width.max(1),
                height: size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self {
            _texture: texture,
            view,
        }
    }
}

struct ActivePipeline {
    kind: PipelineKind,
    pipeline: wgpu::RenderPipeline,
    vertices: wgpu::Buffer,
}

/// [`RenderBackend`] drawing into a window surface through wgpu.
pub struct WgpuBackend {
    kind: BackendKind,
    context: GpuContext,
    uniform_layout: wgpu::BindGroupLayout,
    texture_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    instance_buffer: Option<wgpu::Buffer>,
    instance_bytes: u64,
    pipeline: Option<ActivePipeline>,
    textures: TextureSlots,
    multisample_target: Option<MultisampleTarget>,
}

impl WgpuBackend {
    pub fn new<T>(
        target: &T,
        size: PhysicalSize<u32>,
        kind: BackendKind,
        antialiasing: Antialiasing,
    ) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = GpuContext::new(target, size, kind, antialiasing)?;
        let uniform_layout = pipeline::uniform_layout(&context.device);
        let texture_layout = pipeline::texture_layout(&context.device);
        let (uniform_buffer, uniform_bind_group) =
            create_uniforms(&context.device, &uniform_layout, INITIAL_UNIFORM_BYTES);
        let textures = TextureSlots::new(&context.device, &context.queue);
        let multisample_target = (context.sample_count > 1).then(|| {
            MultisampleTarget::new(
                &context.device,
                context.surface_format,
                context.size,
                context.sample_count,
            )
        });

        tracing::info!(
            backend = %kind,
            adapter = %context.adapter_name,
            format = ?context.surface_format,
            sample_count = context.sample_count,
            "GPU backend ready"
        );

        Ok(Self {
            kind,
            context,
            uniform_layout,
            texture_layout,
            uniform_buffer,
            uniform_bind_group,
            instance_buffer: None,
            instance_bytes: 0,
            pipeline: None,
            textures,
            multisample_target,
        })
    }

    /// Device-lost and uncaptured-error notifications for this device.
    pub fn events(&self) -> &Receiver<DeviceEvent> {
        &self.context.events
    }

    fn rebuild_multisample_target(&mut self) {
        self.multisample_target = (self.context.sample_count > 1).then(|| {
            MultisampleTarget::new(
                &self.context.device,
                self.context.surface_format,
                self.context.size,
                self.context.sample_count,
            )
        });
    }
}

impl RenderBackend for WgpuBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn surface_size(&self) -> PhysicalSize<u32> {
        self.context.size
    }

    fn configure(&mut self, size: PhysicalSize<u32>) {
        if size == self.context.size || size.width == 0 || size.height == 0 {
            return;
        }
        self.context.resize(size);
        self.rebuild_multisample_target();
    }

    fn create_pipeline(&mut self, program: &Program, kind: PipelineKind) -> Result<(), RenderError> {
        let targets = PipelineTargets {
            uniform_layout: &self.uniform_layout,
            texture_layout: &self.texture_layout,
            surface_format: self.context.surface_format,
            sample_count: self.context.sample_count,
        };
        let pipeline = pipeline::create_pipeline(&self.context.device, program, kind, &targets)?;

        let contents: &[[f32; 2]] = match kind {
            PipelineKind::FullscreenTriangle => &FULLSCREEN_TRIANGLE,
            PipelineKind::InstancedQuad => &UNIT_QUAD,
        };
        let vertices = self
            .context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("static vertices"),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::VERTEX,
            });

        self.pipeline = Some(ActivePipeline {
            kind,
            pipeline,
            vertices,
        });
        Ok(())
    }

    fn upload_texture(&mut self, unit: u32, image: &RgbaImage) -> Result<(), RenderError> {
        self.textures
            .upload(&self.context.device, &self.context.queue, unit, image)
    }

    fn release_texture(&mut self, unit: u32) {
        self.textures.release(unit);
    }

    fn write_uniforms(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let len = bytes.len() as u64;
        if len > self.uniform_buffer.size() {
            let capacity = len.next_power_of_two();
            let (buffer, bind_group) =
                create_uniforms(&self.context.device, &self.uniform_layout, capacity);
            self.uniform_buffer = buffer;
            self.uniform_bind_group = bind_group;
        }
        self.context.queue.write_buffer(&self.uniform_buffer, 0, bytes);
    }

    fn write_instances(&mut self, bytes: &[u8]) {
        let len = bytes.len() as u64;
        self.instance_bytes = len;
        if len == 0 {
            return;
        }

        let fits = self
            .instance_buffer
            .as_ref()
            .is_some_and(|buffer| buffer.size() >= len);
        if !fits {
            self.instance_buffer = Some(self.context.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("element instances"),
                size: len.next_power_of_two(),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            }));
        }
        if let Some(buffer) = &self.instance_buffer {
            self.context.queue.write_buffer(buffer, 0, bytes);
        }
    }

    fn draw(&mut self, call: DrawCall) -> Result<(), RenderError> {
        let frame = match self.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                tracing::debug!("surface lost or outdated; reconfiguring");
                self.context.reconfigure();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                tracing::warn!("timed out acquiring surface texture; skipping frame");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let texture_group = match &self.pipeline {
            Some(active) if active.kind == PipelineKind::InstancedQuad => Some(
                self.textures
                    .bind_group(&self.context.device, &self.texture_layout)
                    .clone(),
            ),
            _ => None,
        };

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let (color_view, resolve_target, store) = match &self.multisample_target {
            Some(target) => (&target.view, Some(&view), wgpu::StoreOp::Discard),
            None => (&view, None, wgpu::StoreOp::Store),
        };

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("afterglow frame"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("afterglow pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color_view,
                    depth_slice: None,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some(active) = self.pipeline.as_ref().filter(|active| active.kind == call.pipeline) {
                let instances = match active.kind {
                    PipelineKind::FullscreenTriangle => call.instances,
                    PipelineKind::InstancedQuad => {
                        let stored = self.instance_bytes / ELEMENT_STRIDE_BYTES;
                        call.instances.min(stored as u32)
                    }
                };

                if instances > 0 && call.vertices > 0 {
                    pass.set_pipeline(&active.pipeline);
                    pass.set_bind_group(0, &self.uniform_bind_group, &[]);
                    pass.set_vertex_buffer(0, active.vertices.slice(..));
                    if let (Some(group), Some(buffer)) = (&texture_group, &self.instance_buffer) {
                        pass.set_bind_group(1, group, &[]);
                        pass.set_vertex_buffer(1, buffer.slice(..self.instance_bytes));
                    }
                    pass.draw(0..call.vertices, 0..instances);
                }
            }
        }

        self.context.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn release_all(&mut self) {
        self.pipeline = None;
        self.textures.clear();
        self.instance_buffer = None;
        self.instance_bytes = 0;
        tracing::debug!("released GPU objects");
    }
}

fn create_uniforms(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    size: u64,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("uniform buffer"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("uniform bind group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    });
    (buffer, bind_group)
}
