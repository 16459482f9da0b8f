use std::borrow::Cow;

use wgpu::naga::ShaderStage;

use crate::backend::PipelineKind;
use crate::compile::Program;
use crate::error::RenderError;
use crate::types::{ELEMENT_STRIDE_BYTES, MAX_TEXTURE_UNITS};

/// Binding of the shared sampler inside the texture group.
pub(crate) const SAMPLER_BINDING: u32 = MAX_TEXTURE_UNITS as u32;

const VEC2_BYTES: u64 = 2 * std::mem::size_of::<f32>() as u64;

const QUAD_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];

// aSize, aPos, aTexUnit at offsets 0, 8 and 16 of each element record.
const ELEMENT_ATTRIBUTES: [wgpu::VertexAttribute; 3] =
    wgpu::vertex_attr_array![1 => Float32x2, 2 => Float32x2, 3 => Float32];

pub(crate) fn uniform_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("uniform layout"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

/// One 2D texture per unit followed by a single filtering sampler.
pub(crate) fn texture_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let mut entries = Vec::with_capacity(MAX_TEXTURE_UNITS + 1);
    for unit in 0..MAX_TEXTURE_UNITS {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: unit as u32,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
    }
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: SAMPLER_BINDING,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture layout"),
        entries: &entries,
    })
}

pub(crate) struct PipelineTargets<'a> {
    pub uniform_layout: &'a wgpu::BindGroupLayout,
    pub texture_layout: &'a wgpu::BindGroupLayout,
    pub surface_format: wgpu::TextureFormat,
    pub sample_count: u32,
}

/// Builds the render pipeline for a linked program.
///
/// Creation runs inside a validation error scope so a rejected pipeline comes
/// back as an error instead of reaching the uncaptured-error handler.
pub(crate) fn create_pipeline(
    device: &wgpu::Device,
    program: &Program,
    kind: PipelineKind,
    targets: &PipelineTargets<'_>,
) -> Result<wgpu::RenderPipeline, RenderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("afterglow vertex"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(program.vertex_source().to_owned()),
            stage: ShaderStage::Vertex,
            defines: &[],
        },
    });
    let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("afterglow fragment"),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(program.fragment_source().to_owned()),
            stage: ShaderStage::Fragment,
            defines: &[],
        },
    });

    let bind_group_layouts: Vec<&wgpu::BindGroupLayout> = match kind {
        PipelineKind::FullscreenTriangle => vec![targets.uniform_layout],
        PipelineKind::InstancedQuad => vec![targets.uniform_layout, targets.texture_layout],
    };
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("afterglow pipeline layout"),
        bind_group_layouts: &bind_group_layouts,
        push_constant_ranges: &[],
    });

    let quad_buffer = wgpu::VertexBufferLayout {
        array_stride: VEC2_BYTES,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &QUAD_ATTRIBUTES,
    };
    let element_buffer = wgpu::VertexBufferLayout {
        array_stride: ELEMENT_STRIDE_BYTES,
        step_mode: wgpu::VertexStepMode::Instance,
        attributes: &ELEMENT_ATTRIBUTES,
    };
    let (buffers, blend) = match kind {
        PipelineKind::FullscreenTriangle => (vec![quad_buffer], None),
        PipelineKind::InstancedQuad => (
            vec![quad_buffer, element_buffer],
            Some(wgpu::BlendState::ALPHA_BLENDING),
        ),
    };

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(match kind {
            PipelineKind::FullscreenTriangle => "glow pipeline",
            PipelineKind::InstancedQuad => "compositor pipeline",
        }),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &vertex_module,
            entry_point: Some("main"),
            buffers: &buffers,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: targets.sample_count,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module: &fragment_module,
            entry_point: Some("main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: targets.surface_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    });

    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(RenderError::Device(err.to_string())),
        None => Ok(pipeline),
    }
}
