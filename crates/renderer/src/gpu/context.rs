use anyhow::{anyhow, Context as AnyhowContext, Result};
use crossbeam_channel::Receiver;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use wgpu::TextureFormatFeatureFlags;
use winit::dpi::PhysicalSize;

use crate::types::{Antialiasing, BackendKind};

use super::probe::{self, DeviceEvent};

/// Sample count `Antialiasing::Auto` settles on when the format allows it.
const AUTO_SAMPLE_CEILING: u32 = 4;

/// Window surface plus the device that renders into it.
pub(crate) struct GpuContext {
    pub _instance: wgpu::Instance,
    pub surface: wgpu::Surface<'static>,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub config: wgpu::SurfaceConfiguration,
    pub size: PhysicalSize<u32>,
    pub sample_count: u32,
    pub surface_format: wgpu::TextureFormat,
    pub adapter_name: String,
    pub events: Receiver<DeviceEvent>,
}

impl GpuContext {
    pub(crate) fn new<T>(
        target: &T,
        initial_size: PhysicalSize<u32>,
        backend: BackendKind,
        antialiasing: Antialiasing,
    ) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let backends = probe::backends_for(backend)
            .ok_or_else(|| anyhow!("the {backend} backend has no GPU surface"))?;
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            flags: wgpu::InstanceFlags::default(),
            memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
            backend_options: wgpu::BackendOptions::default(),
        });

        let window_handle = target
            .window_handle()
            .map_err(|err| anyhow!("failed to acquire window handle: {err}"))?;
        let display_handle = target
            .display_handle()
            .map_err(|err| anyhow!("failed to acquire display handle: {err}"))?;
        let surface = unsafe {
            instance.create_surface_unsafe(wgpu::SurfaceTargetUnsafe::RawHandle {
                raw_display_handle: display_handle.as_raw(),
                raw_window_handle: window_handle.as_raw(),
            })
        }
        .context("failed to create rendering surface")?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .with_context(|| format!("no {backend} adapter can present to this window"))?;
        let adapter_info = adapter.get_info();
        let adapter_limits = adapter.limits();

        let size = PhysicalSize::new(initial_size.width.max(1), initial_size.height.max(1));
        let max_dimension = adapter_limits.max_texture_dimension_2d;
        if size.width > max_dimension || size.height > max_dimension {
            anyhow::bail!(
                "window is {}x{} but the adapter caps textures at {max_dimension}",
                size.width,
                size.height
            );
        }

        let caps = surface.get_capabilities(&adapter);
        let surface_format = choose_surface_format(&caps.formats)
            .ok_or_else(|| anyhow!("surface reports no supported formats"))?;
        if surface_format.is_srgb() {
            tracing::warn!(
                ?surface_format,
                "only sRGB surface formats available; glow colours will be re-encoded"
            );
        }

        let format_features = adapter.get_texture_format_features(surface_format);
        let sample_count = resolve_sample_count(
            antialiasing,
            &format_features.flags.supported_sample_counts(),
            format_features
                .flags
                .contains(TextureFormatFeatureFlags::MULTISAMPLE_RESOLVE),
        );

        let required_features = if sample_count > AUTO_SAMPLE_CEILING {
            wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES
        } else {
            wgpu::Features::empty()
        };
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("afterglow device"),
            required_features,
            required_limits: wgpu::Limits::downlevel_webgl2_defaults()
                .using_resolution(adapter_limits),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::default(),
        }))
        .context("failed to create GPU device")?;
        let events = probe::attach_device_listeners(&device);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width,
            height: size.height,
            present_mode: choose_present_mode(&caps.present_modes),
            alpha_mode: choose_alpha_mode(&caps.alpha_modes),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        tracing::debug!(
            adapter = %adapter_info.name,
            api = ?adapter_info.backend,
            present_mode = ?config.present_mode,
            alpha_mode = ?config.alpha_mode,
            sample_count,
            "configuring surface"
        );
        surface.configure(&device, &config);

        Ok(Self {
            _instance: instance,
            surface,
            device,
            queue,
            config,
            size,
            sample_count,
            surface_format,
            adapter_name: adapter_info.name,
            events,
        })
    }

    /// Reconfigures the swapchain for a new backing size. Zero sizes are ignored.
    pub(crate) fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width == 0 || new_size.height == 0 {
            return;
        }
        self.size = new_size;
        self.config.width = new_size.width;
        self.config.height = new_size.height;
        self.surface.configure(&self.device, &self.config);
    }

    pub(crate) fn reconfigure(&mut self) {
        self.surface.configure(&self.device, &self.config);
    }
}

/// Shaders write final colour values, so a linear format is preferred.
fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> Option<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|format| !format.is_srgb())
        .or_else(|| formats.first().copied())
}

fn choose_present_mode(modes: &[wgpu::PresentMode]) -> wgpu::PresentMode {
    if modes.contains(&wgpu::PresentMode::Mailbox) {
        wgpu::PresentMode::Mailbox
    } else {
        wgpu::PresentMode::Fifo
    }
}

/// Premultiplied output lets the glow's transparent regions show the desktop.
fn choose_alpha_mode(modes: &[wgpu::CompositeAlphaMode]) -> wgpu::CompositeAlphaMode {
    if modes.contains(&wgpu::CompositeAlphaMode::PreMultiplied) {
        wgpu::CompositeAlphaMode::PreMultiplied
    } else {
        modes
            .first()
            .copied()
            .unwrap_or(wgpu::CompositeAlphaMode::Auto)
    }
}

/// MSAA sample count for a policy given what the surface format supports.
fn resolve_sample_count(antialiasing: Antialiasing, supported: &[u32], can_resolve: bool) -> u32 {
    let best_at_most = |ceiling: u32| {
        supported
            .iter()
            .copied()
            .filter(|&count| count <= ceiling)
            .max()
            .unwrap_or(1)
    };

    let count = match antialiasing {
        Antialiasing::Off => 1,
        Antialiasing::Auto => best_at_most(AUTO_SAMPLE_CEILING),
        Antialiasing::Samples(requested) if supported.contains(&requested) => requested,
        Antialiasing::Samples(requested) => {
            let fallback = best_at_most(requested);
            tracing::warn!(
                requested,
                fallback,
                ?supported,
                "requested MSAA sample count not supported; falling back"
            );
            fallback
        }
    };

    if count > 1 && !can_resolve {
        tracing::warn!("surface format cannot resolve multisampled targets; disabling MSAA");
        return 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_caps_at_four_samples() {
        assert_eq!(resolve_sample_count(Antialiasing::Auto, &[1, 2, 4, 8], true), 4);
        assert_eq!(resolve_sample_count(Antialiasing::Auto, &[1, 2], true), 2);
        assert_eq!(resolve_sample_count(Antialiasing::Auto, &[], true), 1);
    }

    #[test]
    fn unsupported_request_falls_back_downward() {
        assert_eq!(resolve_sample_count(Antialiasing::Samples(16), &[1, 4, 8], true), 8);
        assert_eq!(resolve_sample_count(Antialiasing::Samples(2), &[1, 4], true), 1);
        assert_eq!(resolve_sample_count(Antialiasing::Samples(4), &[1, 4], false), 1);
        assert_eq!(resolve_sample_count(Antialiasing::Off, &[1, 4], true), 1);
    }

    #[test]
    fn prefers_linear_formats() {
        let formats = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Bgra8Unorm,
        ];
        assert_eq!(choose_surface_format(&formats), Some(wgpu::TextureFormat::Bgra8Unorm));
        assert_eq!(
            choose_surface_format(&formats[..1]),
            Some(wgpu::TextureFormat::Bgra8UnormSrgb)
        );
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn surface_modes() {
        assert_eq!(
            choose_present_mode(&[wgpu::PresentMode::Fifo, wgpu::PresentMode::Mailbox]),
            wgpu::PresentMode::Mailbox
        );
        assert_eq!(choose_present_mode(&[]), wgpu::PresentMode::Fifo);
        assert_eq!(
            choose_alpha_mode(&[wgpu::CompositeAlphaMode::Opaque]),
            wgpu::CompositeAlphaMode::Opaque
        );
    }
}
