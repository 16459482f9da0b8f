use image::imageops::flip_vertical_in_place;
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::error::RenderError;
use crate::types::MAX_TEXTURE_UNITS;

use super::pipeline::SAMPLER_BINDING;

struct LoadedTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

/// Texture units bound to the compositor's texture group.
///
/// Unused units point at a 1x1 transparent placeholder so the bind group is
/// always complete. The group is rebuilt lazily after any slot changes.
pub(crate) struct TextureSlots {
    slots: Vec<Option<LoadedTexture>>,
    placeholder: LoadedTexture,
    sampler: wgpu::Sampler,
    bind_group: Option<wgpu::BindGroup>,
}

impl TextureSlots {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let placeholder = create_texture(
            device,
            queue,
            "placeholder texture",
            1,
            1,
            &[0, 0, 0, 0],
        );
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("element sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            slots: (0..MAX_TEXTURE_UNITS).map(|_| None).collect(),
            placeholder,
            sampler,
            bind_group: None,
        }
    }

    /// Uploads `image` into `unit`, flipped so row 0 is the bottom scanline.
    pub fn upload(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        unit: u32,
        image: &RgbaImage,
    ) -> Result<(), RenderError> {
        let index = unit as usize;
        if index >= MAX_TEXTURE_UNITS {
            return Err(RenderError::TooManyTextures {
                max: MAX_TEXTURE_UNITS,
            });
        }

        let (width, height) = image.dimensions();
        let max_dimension = device.limits().max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max_dimension || height > max_dimension {
            return Err(RenderError::Device(format!(
                "texture {width}x{height} for unit {unit} exceeds device limit {max_dimension}"
            )));
        }

        let mut flipped = image.clone();
        flip_vertical_in_place(&mut flipped);
        let label = format!("element texture {unit}");
        self.slots[index] = Some(create_texture(
            device,
            queue,
            &label,
            width,
            height,
            flipped.as_raw(),
        ));
        self.bind_group = None;
        Ok(())
    }

    pub fn release(&mut self, unit: u32) {
        if let Some(slot) = self.slots.get_mut(unit as usize) {
            if slot.take().is_some() {
                self.bind_group = None;
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.bind_group = None;
    }

    pub fn bind_group(
        &mut self,
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
    ) -> &wgpu::BindGroup {
        let Self {
            slots,
            placeholder,
            sampler,
            bind_group,
        } = self;
        bind_group.get_or_insert_with(|| {
            let mut entries = Vec::with_capacity(MAX_TEXTURE_UNITS + 1);
            for (unit, slot) in slots.iter().enumerate() {
                let view = slot.as_ref().map_or(&placeholder.view, |loaded| &loaded.view);
                entries.push(wgpu::BindGroupEntry {
                    binding: unit as u32,
                    resource: wgpu::BindingResource::TextureView(view),
                });
            }
            entries.push(wgpu::BindGroupEntry {
                binding: SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(sampler),
            });
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("texture bind group"),
                layout,
                entries: &entries,
            })
        })
    }
}

fn create_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    width: u32,
    height: u32,
    data: &[u8],
) -> LoadedTexture {
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        data,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    LoadedTexture {
        _texture: texture,
        view,
    }
}
